//! store/kv: одиночные операции get/put/delete и обход ключей.
//!
//! Что внутри:
//! - get/get_at/value_size: поиск по hash, сверка ключа с flash, чтение первой
//!   целой копии (при verify_on_read: с проверкой чексуммы, иначе fallback на следующую);
//! - put/delete: новая версия с transaction_id = last + 1, REDUNDANCY копий в разных
//!   секторах; put идентичного значения: no-op без записи на flash;
//! - размещение копий с GC по политике gc_on_write: сектора под все копии выбираются
//!   до первой записи; если часть копий легла, а запись провалилась, прежняя версия
//!   дописывается заново с новым id.
//!
//! Индекс обновляется только после записи всех копий: неудачная запись оставляет
//! прежнюю версию читаемой.

use heapless::Vec as HVec;
use log::{debug, error, info, warn};

use crate::checksum::key_hash;
use crate::config::{ErrorRecovery, GcOnWrite};
use crate::entry::codec::{encoded_size, validate_key_value};
use crate::entry::encode_entry;
use crate::error::{Error, Result};
use crate::flash::{Address, FlashPartition};
use crate::index::{EntryState, KeyDescriptor};
use crate::metrics;

use super::core::KeyValueStore;

// ----------------- публичные методы -----------------

impl<P: FlashPartition, const MAX_ENTRIES: usize, const MAX_SECTORS: usize, const REDUNDANCY: usize>
    KeyValueStore<P, MAX_ENTRIES, MAX_SECTORS, REDUNDANCY>
{
    /// Прочитать значение ключа в `buf`. Возвращает длину значения.
    ///
    /// ResourceExhausted, если буфер меньше значения (буфер не трогается).
    pub fn get(&mut self, key: &[u8], buf: &mut [u8]) -> Result<usize> {
        self.get_at(key, buf, 0)
    }

    /// Прочитать значение начиная со смещения `offset`.
    pub fn get_at(&mut self, key: &[u8], buf: &mut [u8], offset: usize) -> Result<usize> {
        self.check_initialized()?;
        let i = self.find_live(key)?;
        let verify = self.options.verify_on_read;
        let (entry, copy) = self.first_good_copy(i, verify).map_err(|e| {
            error!("get: no intact copy of key ({})", e);
            e
        })?;
        if copy > 0 {
            metrics::record_read_fallback();
        }

        let vlen = entry.value_len();
        if offset > vlen {
            return Err(Error::invalid(format!(
                "offset {} beyond value length {}",
                offset, vlen
            )));
        }
        let want = vlen - offset;
        if buf.len() < want {
            return Err(Error::exhausted(format!(
                "buffer of {} bytes is too small for {} value bytes",
                buf.len(),
                want
            )));
        }
        entry.read_value(&self.partition, &mut buf[..want], offset)?;
        Ok(want)
    }

    /// Длина значения ключа.
    pub fn value_size(&mut self, key: &[u8]) -> Result<usize> {
        self.check_initialized()?;
        let i = self.find_live(key)?;
        let verify = self.options.verify_on_read;
        let (entry, _) = self.first_good_copy(i, verify)?;
        Ok(entry.value_len())
    }

    /// Записать ключ/значение.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_initialized()?;
        validate_key_value(key, Some(value))?;
        let size = encoded_size(key.len(), value.len(), self.alignment);
        if size > self.sectors.sector_size() {
            return Err(Error::invalid(format!(
                "entry of {} bytes does not fit into a {}-byte sector",
                size,
                self.sectors.sector_size()
            )));
        }
        self.write_entry(key, Some(value))
    }

    /// Удалить ключ (записать tombstone). NotFound, если ключа нет или он уже удалён.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.check_initialized()?;
        validate_key_value(key, None)?;
        self.write_entry(key, None)
    }

    /// Обойти все живые ключи: f(key, value).
    ///
    /// Ключи без единой целой копии пропускаются (с предупреждением в лог).
    pub fn for_each<F: FnMut(&[u8], &[u8])>(&mut self, mut f: F) -> Result<()> {
        self.check_initialized()?;
        let verify = self.options.verify_on_read;
        for i in 0..self.index.len() {
            if self.index.get(i).deleted() {
                continue;
            }
            let entry = match self.first_good_copy(i, verify) {
                Ok((e, _)) => e,
                Err(e @ Error::Storage(_)) => return Err(e),
                Err(e) => {
                    warn!("for_each: skipping unreadable key: {}", e);
                    continue;
                }
            };
            let key = entry.read_key(&self.partition)?;
            let mut value = vec![0u8; entry.value_len()];
            entry.read_value(&self.partition, &mut value, 0)?;
            f(&key, &value);
        }
        Ok(())
    }

    /// Все живые ключи (порядок не определён).
    pub fn keys(&mut self) -> Result<Vec<Vec<u8>>> {
        let mut out = Vec::with_capacity(self.size());
        self.for_each(|k, _| out.push(k.to_vec()))?;
        Ok(out)
    }
}

// ----------------- внутренние хелперы -----------------

impl<P: FlashPartition, const MAX_ENTRIES: usize, const MAX_SECTORS: usize, const REDUNDANCY: usize>
    KeyValueStore<P, MAX_ENTRIES, MAX_SECTORS, REDUNDANCY>
{
    /// Индекс дескриптора ключа.
    ///
    /// Ok(None): ключа нет; AlreadyExists: hash занят другим ключом.
    pub(crate) fn lookup(&mut self, key: &[u8]) -> Result<Option<usize>> {
        validate_key_value(key, None)?;
        let Some(i) = self.index.find(key_hash(key)) else {
            return Ok(None);
        };

        let addresses: Vec<Address> = self.index.get(i).addresses().to_vec();
        let mut readable = false;
        for addr in addresses {
            match self.read_entry(addr) {
                Ok(e) => {
                    readable = true;
                    if e.key_matches(&self.partition, key)? {
                        return Ok(Some(i));
                    }
                }
                Err(e @ Error::Storage(_)) => return Err(e),
                Err(e) => {
                    warn!("lookup: copy at 0x{:x} unreadable: {}", addr, e);
                    let s = self.sectors.index_of(addr);
                    self.sectors.get_mut(s).mark_corrupt();
                    self.flag_error();
                }
            }
        }
        if readable {
            Err(Error::AlreadyExists)
        } else {
            Err(Error::data_loss("no readable copy to verify the key"))
        }
    }

    /// Индекс живого (не удалённого) ключа, иначе NotFound.
    fn find_live(&mut self, key: &[u8]) -> Result<usize> {
        match self.lookup(key) {
            Ok(Some(i)) if !self.index.get(i).deleted() => Ok(i),
            Ok(_) | Err(Error::AlreadyExists) => Err(Error::NotFound),
            Err(e) => Err(e),
        }
    }

    /// Лимит GC-компактаций на одну операцию записи.
    fn gc_limit(&self) -> usize {
        match self.options.gc_on_write {
            GcOnWrite::Disabled => 0,
            GcOnWrite::OneSector => 1,
            GcOnWrite::AsNeeded => usize::MAX,
        }
    }

    fn write_entry(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        if self.error_detected && self.options.recovery == ErrorRecovery::Lazy {
            if let Err(e) = self.repair() {
                warn!("write: lazy recovery failed: {}", e);
            }
        }

        let existing = match self.lookup(key) {
            Err(Error::AlreadyExists) if value.is_none() => return Err(Error::NotFound),
            other => other?,
        };
        match existing {
            Some(i) => {
                let deleted = self.index.get(i).deleted();
                match value {
                    None if deleted => return Err(Error::NotFound),
                    Some(v) if !deleted && self.stored_value_equals(i, v)? => {
                        metrics::record_put_skipped_identical();
                        debug!("put: value unchanged, skipping write");
                        return Ok(());
                    }
                    _ => {}
                }
            }
            None => {
                if value.is_none() {
                    return Err(Error::NotFound);
                }
                if self.index.is_full() {
                    return Err(Error::exhausted(format!(
                        "key index is full ({} entries)",
                        MAX_ENTRIES
                    )));
                }
            }
        }
        let limit = self.gc_limit();
        self.write_new_version(key, value, limit)
    }

    /// Совпадает ли текущее значение ключа с `value` (сравнение с flash).
    fn stored_value_equals(&mut self, i: usize, value: &[u8]) -> Result<bool> {
        let verify = self.options.verify_on_read;
        match self.first_good_copy(i, verify) {
            Ok((entry, _)) => entry.value_matches(&self.partition, value),
            Err(e @ Error::Storage(_)) => Err(e),
            Err(_) => Ok(false),
        }
    }

    /// Записать новую версию ключа (все копии) и обновить индекс.
    pub(crate) fn write_new_version(
        &mut self,
        key: &[u8],
        value: Option<&[u8]>,
        gc_limit: usize,
    ) -> Result<()> {
        self.write_version(key, value, gc_limit, true)
    }

    /// `supersede_torn`: если часть копий легла на flash, а запись провалилась,
    /// дописать прежнюю версию поверх (иначе после init победит недописанная).
    fn write_version(
        &mut self,
        key: &[u8],
        value: Option<&[u8]>,
        gc_limit: usize,
        supersede_torn: bool,
    ) -> Result<()> {
        let id = self
            .last_transaction_id
            .checked_add(1)
            .ok_or_else(|| Error::exhausted("transaction id space exhausted"))?;
        let bytes = encode_entry(key, value, id, &mut self.formats[0], self.alignment)?;
        // id расходуется до записи: частично записанная запись не переиспользует его
        self.last_transaction_id = id;

        // место под все копии ищется до первой записи на flash
        let targets = self.find_sectors_for_copies(bytes.len(), gc_limit)?;
        let mut addresses: HVec<Address, REDUNDANCY> = HVec::new();
        if let Err(e) = self.write_copies(&bytes, &targets, &mut addresses) {
            self.abandon_copies(&addresses, bytes.len());
            if supersede_torn && !addresses.is_empty() {
                self.supersede_torn_write(key);
            }
            return Err(e);
        }

        let state = if value.is_some() {
            EntryState::Valid
        } else {
            EntryState::Deleted
        };

        // GC во время записи мог переставить дескрипторы: ищем заново
        let hash = key_hash(key);
        match self.index.find(hash) {
            Some(i) => {
                let previous: Vec<Address> = self.index.get(i).addresses().to_vec();
                self.index.get_mut(i).set_version(id, state, addresses);
                for a in previous {
                    self.reclaim_entry_at(a)?;
                }
            }
            None => {
                self.index
                    .insert(KeyDescriptor::with_addresses(hash, id, state, addresses))?;
            }
        }
        Ok(())
    }

    /// REDUNDANCY разных секторов, в каждом есть место под `size` байт.
    fn find_sectors_for_copies(&mut self, size: usize, gc_limit: usize) -> Result<HVec<usize, REDUNDANCY>> {
        let mut targets: HVec<usize, REDUNDANCY> = HVec::new();
        let mut gc_runs = 0usize;
        for _ in 0..REDUNDANCY {
            let sector = self.find_space_for_write(size, &targets, gc_limit, &mut gc_runs)?;
            let _ = targets.push(sector);
        }
        Ok(targets)
    }

    /// Записать копии в выбранные сектора; `written`: адреса легших копий.
    fn write_copies(
        &mut self,
        bytes: &[u8],
        targets: &[usize],
        written: &mut HVec<Address, REDUNDANCY>,
    ) -> Result<()> {
        for &sector in targets {
            let addr = self.sectors.next_writable_address(sector);
            self.write_entry_bytes(sector, addr, bytes)?;
            let _ = written.push(addr);
        }
        Ok(())
    }

    /// Копии прерванной записи не попадут в индекс: их байты reclaimable.
    fn abandon_copies(&mut self, written: &[Address], size: usize) {
        for &a in written {
            warn!("write: abandoning copy at 0x{:x}", a);
            let s = self.sectors.index_of(a);
            self.sectors.get_mut(s).remove_valid(size);
        }
    }

    /// Перекрыть недописанную версию последней закоммиченной (для нового ключа: tombstone)
    /// с новым transaction_id.
    fn supersede_torn_write(&mut self, key: &[u8]) {
        let committed = match self.committed_value(key) {
            Ok(v) => v,
            Err(e) => {
                error!("write: cannot read committed value to supersede a torn write: {}", e);
                return;
            }
        };
        match self.write_version(key, committed.as_deref(), usize::MAX, false) {
            Ok(()) => info!("write: torn write superseded by the committed version"),
            Err(e) => error!("write: torn write not superseded, it may win after restart: {}", e),
        }
    }

    /// Значение из индекса (None: ключа нет или он удалён).
    fn committed_value(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some(i) = self.index.find(key_hash(key)) else {
            return Ok(None);
        };
        let (entry, _) = self.first_good_copy(i, true)?;
        if entry.deleted() {
            return Ok(None);
        }
        let mut value = vec![0u8; entry.value_len()];
        entry.read_value(&self.partition, &mut value, 0)?;
        Ok(Some(value))
    }

    /// Сектор под запись `size` байт; при нехватке: GC (не более `gc_limit` за операцию).
    pub(crate) fn find_space_for_write(
        &mut self,
        size: usize,
        reserved: &[usize],
        gc_limit: usize,
        gc_runs: &mut usize,
    ) -> Result<usize> {
        loop {
            if let Some(s) = self.sectors.find_space(size, reserved, false) {
                return Ok(s);
            }
            if *gc_runs >= gc_limit || !self.sectors.has_reclaimable() {
                return Err(self.no_space_error(size));
            }
            *gc_runs += 1;
            match self.garbage_collect_one(reserved) {
                Ok(()) => {}
                Err(Error::ResourceExhausted(msg)) => {
                    debug!("write: garbage collection could not help: {}", msg);
                    return Err(self.no_space_error(size));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn no_space_error(&self, size: usize) -> Error {
        if self.sectors.empty_count() == 0 {
            Error::precondition("no empty sector left for garbage collection; run maintenance")
        } else {
            Error::exhausted(format!("no sector has room for a {}-byte entry", size))
        }
    }

    /// Записать готовые байты записи по адресу в секторе и учесть их.
    ///
    /// При ошибке flash байты считаются занятыми (reclaimable), выставляется error_detected.
    pub(crate) fn write_entry_bytes(&mut self, sector: usize, address: Address, bytes: &[u8]) -> Result<()> {
        let size = bytes.len();
        if let Err(e) = self.partition.write(address, bytes) {
            self.sectors.get_mut(sector).remove_writable(size);
            self.flag_error();
            metrics::record_write_failure();
            warn!("flash write of {} bytes at 0x{:x} failed: {:#}", size, address, e);
            return Err(Error::Storage(e));
        }
        {
            let d = self.sectors.get_mut(sector);
            d.remove_writable(size);
            d.add_valid(size);
        }
        metrics::record_entry_written(size);

        if self.options.verify_on_write {
            if let Err(e) = self.load_entry(address, true) {
                self.sectors.get_mut(sector).remove_valid(size);
                self.flag_error();
                error!("read-back verification at 0x{:x} failed: {}", address, e);
                return Err(match e {
                    Error::Storage(_) => e,
                    other => Error::data_loss(format!(
                        "write verification at 0x{:x} failed: {}",
                        address, other
                    )),
                });
            }
        }
        Ok(())
    }
}
