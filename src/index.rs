//! index: RAM-индекс ключей (фиксированной ёмкости).
//!
//! В RAM хранится только 32-битный hash ключа; сам ключ всегда на flash и сверяется
//! чтением при поиске. Дескриптор ключа:
//! - key_hash, transaction_id последней версии, состояние Valid/Deleted;
//! - адреса копий последней версии (до REDUNDANCY, первый: primary).

use heapless::Vec as HVec;

use crate::error::{Error, Result};
use crate::flash::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Valid,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDescriptor<const REDUNDANCY: usize> {
    pub key_hash: u32,
    pub transaction_id: u32,
    pub state: EntryState,
    addresses: HVec<Address, REDUNDANCY>,
}

impl<const REDUNDANCY: usize> KeyDescriptor<REDUNDANCY> {
    pub fn new(key_hash: u32, transaction_id: u32, state: EntryState, address: Address) -> Self {
        let mut addresses = HVec::new();
        // REDUNDANCY >= 1 проверяется в init
        let _ = addresses.push(address);
        Self {
            key_hash,
            transaction_id,
            state,
            addresses,
        }
    }

    /// Дескриптор только что записанной версии (все копии сразу).
    pub fn with_addresses(
        key_hash: u32,
        transaction_id: u32,
        state: EntryState,
        addresses: HVec<Address, REDUNDANCY>,
    ) -> Self {
        Self {
            key_hash,
            transaction_id,
            state,
            addresses,
        }
    }

    #[inline]
    pub fn deleted(&self) -> bool {
        self.state == EntryState::Deleted
    }

    #[inline]
    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    #[inline]
    pub fn first_address(&self) -> Option<Address> {
        self.addresses.first().copied()
    }

    #[inline]
    pub fn has_all_copies(&self) -> bool {
        self.addresses.len() >= REDUNDANCY
    }

    /// Добавить копию; false: все слоты заняты.
    pub fn add_address(&mut self, address: Address) -> bool {
        self.addresses.push(address).is_ok()
    }

    pub fn remove_address(&mut self, address: Address) -> bool {
        let before = self.addresses.len();
        // порядок копий сохраняется: первая остаётся primary
        self.addresses = self.addresses.iter().copied().filter(|&a| a != address).collect();
        self.addresses.len() != before
    }

    pub fn replace_address(&mut self, old: Address, new: Address) -> bool {
        match self.addresses.iter_mut().find(|a| **a == old) {
            Some(slot) => {
                *slot = new;
                true
            }
            None => false,
        }
    }

    /// Новая версия ключа: id, состояние и набор адресов целиком.
    pub fn set_version(
        &mut self,
        transaction_id: u32,
        state: EntryState,
        addresses: HVec<Address, REDUNDANCY>,
    ) {
        self.transaction_id = transaction_id;
        self.state = state;
        self.addresses = addresses;
    }
}

/// Что сделал upsert с записью, найденной при скане.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert<const REDUNDANCY: usize> {
    /// Новый ключ.
    Inserted,
    /// Более новая версия; прежние адреса больше не живые.
    Superseded(HVec<Address, REDUNDANCY>),
    /// Та же версия: ещё одна копия.
    CopyAdded,
    /// Та же версия, но все слоты копий заняты: запись лишняя.
    CopyExcess,
    /// Более старая версия: запись не живая.
    Stale,
}

#[derive(Debug, Clone)]
pub struct EntryIndex<const MAX_ENTRIES: usize, const REDUNDANCY: usize> {
    descriptors: HVec<KeyDescriptor<REDUNDANCY>, MAX_ENTRIES>,
}

impl<const MAX_ENTRIES: usize, const REDUNDANCY: usize> Default
    for EntryIndex<MAX_ENTRIES, REDUNDANCY>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<const MAX_ENTRIES: usize, const REDUNDANCY: usize> EntryIndex<MAX_ENTRIES, REDUNDANCY> {
    pub fn new() -> Self {
        Self {
            descriptors: HVec::new(),
        }
    }

    pub fn clear(&mut self) {
        self.descriptors.clear();
    }

    /// Число дескрипторов, включая удалённые (tombstones).
    #[inline]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.descriptors.len() >= MAX_ENTRIES
    }

    /// Число живых (не удалённых) ключей.
    pub fn present_count(&self) -> usize {
        self.descriptors.iter().filter(|d| !d.deleted()).count()
    }

    pub fn find(&self, key_hash: u32) -> Option<usize> {
        self.descriptors.iter().position(|d| d.key_hash == key_hash)
    }

    #[inline]
    pub fn get(&self, i: usize) -> &KeyDescriptor<REDUNDANCY> {
        &self.descriptors[i]
    }

    #[inline]
    pub fn get_mut(&mut self, i: usize) -> &mut KeyDescriptor<REDUNDANCY> {
        &mut self.descriptors[i]
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyDescriptor<REDUNDANCY>> {
        self.descriptors.iter()
    }

    pub fn insert(&mut self, desc: KeyDescriptor<REDUNDANCY>) -> Result<usize> {
        self.descriptors.push(desc).map_err(|_| {
            Error::exhausted(format!("key index is full ({} entries)", MAX_ENTRIES))
        })?;
        Ok(self.descriptors.len() - 1)
    }

    /// Удалить дескриптор (порядок остальных не сохраняется).
    pub fn remove(&mut self, i: usize) -> KeyDescriptor<REDUNDANCY> {
        self.descriptors.swap_remove(i)
    }

    /// Хэши всех ключей (снимок для обходов, меняющих индекс).
    pub fn hashes(&self) -> Vec<u32> {
        self.descriptors.iter().map(|d| d.key_hash).collect()
    }

    /// Учесть запись, найденную при скане (ключ уже сверен вызывающим).
    ///
    /// Больший transaction_id побеждает; равный: ещё одна копия той же версии.
    pub fn upsert(
        &mut self,
        key_hash: u32,
        transaction_id: u32,
        state: EntryState,
        address: Address,
    ) -> Result<Upsert<REDUNDANCY>> {
        let Some(i) = self.find(key_hash) else {
            self.insert(KeyDescriptor::new(key_hash, transaction_id, state, address))?;
            return Ok(Upsert::Inserted);
        };
        let d = &mut self.descriptors[i];
        if transaction_id > d.transaction_id {
            let previous = d.addresses.clone();
            let mut addresses = HVec::new();
            let _ = addresses.push(address);
            d.set_version(transaction_id, state, addresses);
            Ok(Upsert::Superseded(previous))
        } else if transaction_id < d.transaction_id {
            Ok(Upsert::Stale)
        } else if d.add_address(address) {
            Ok(Upsert::CopyAdded)
        } else {
            Ok(Upsert::CopyExcess)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_resolves_versions() {
        let mut idx = EntryIndex::<4, 2>::new();
        assert_eq!(idx.upsert(7, 5, EntryState::Valid, 0).unwrap(), Upsert::Inserted);
        assert_eq!(idx.upsert(7, 5, EntryState::Valid, 512).unwrap(), Upsert::CopyAdded);
        assert_eq!(idx.upsert(7, 5, EntryState::Valid, 1024).unwrap(), Upsert::CopyExcess);
        assert_eq!(idx.upsert(7, 4, EntryState::Valid, 32).unwrap(), Upsert::Stale);

        match idx.upsert(7, 6, EntryState::Deleted, 64).unwrap() {
            Upsert::Superseded(prev) => assert_eq!(prev.as_slice(), &[0, 512]),
            other => panic!("unexpected {:?}", other),
        }
        let d = idx.get(0);
        assert!(d.deleted());
        assert_eq!(d.addresses(), &[64]);
        assert_eq!(idx.present_count(), 0);
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn capacity_is_bounded() {
        let mut idx = EntryIndex::<2, 1>::new();
        idx.upsert(1, 1, EntryState::Valid, 0).unwrap();
        idx.upsert(2, 2, EntryState::Valid, 32).unwrap();
        assert!(idx.is_full());
        assert!(idx.upsert(3, 3, EntryState::Valid, 64).unwrap_err().is_resource_exhausted());
        // обновление существующего ключа места не требует
        idx.upsert(1, 4, EntryState::Valid, 96).unwrap();
    }

    #[test]
    fn address_edits() {
        let mut d = KeyDescriptor::<3>::new(1, 1, EntryState::Valid, 0);
        assert!(d.add_address(32));
        assert!(!d.has_all_copies());
        assert!(d.replace_address(0, 64));
        assert_eq!(d.addresses(), &[64, 32]);
        assert!(d.remove_address(64));
        assert_eq!(d.first_address(), Some(32));
    }
}
