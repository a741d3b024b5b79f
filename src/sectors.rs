//! sectors: RAM-учёт секторов раздела.
//!
//! Для каждого сектора держим:
//! - tail_free_bytes: стёртый хвост, куда ещё можно дописывать;
//! - valid_bytes    : байты живых записей (на них ссылается индекс);
//! - corrupt        : при скане найдена порча (дописывать нельзя до GC).
//!
//! reclaimable = sector_size - valid - tail_free: старые версии, tombstones после heavy
//! maintenance, хвосты неудачных записей. GC переносит живые записи и стирает сектор.
//!
//! Политика размещения (find_space):
//! 1) частично записанный сектор (не пустой, не битый) с достаточным хвостом, младший индекс;
//! 2) иначе пустой сектор по кругу после последнего выбранного, но только если после
//!    этого останется хотя бы один пустой сектор (запас для GC);
//! 3) перенос при GC может занять и последний пустой сектор.

use heapless::Vec as HVec;
use log::warn;

use crate::error::{Error, Result};
use crate::flash::Address;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectorDescriptor {
    tail_free_bytes: u32,
    valid_bytes: u32,
    corrupt: bool,
}

impl SectorDescriptor {
    pub fn empty(sector_size: usize) -> Self {
        Self {
            tail_free_bytes: sector_size as u32,
            valid_bytes: 0,
            corrupt: false,
        }
    }

    #[inline]
    pub fn writable_bytes(&self) -> usize {
        self.tail_free_bytes as usize
    }

    #[inline]
    pub fn valid_bytes(&self) -> usize {
        self.valid_bytes as usize
    }

    #[inline]
    pub fn is_corrupt(&self) -> bool {
        self.corrupt
    }

    #[inline]
    pub fn reclaimable_bytes(&self, sector_size: usize) -> usize {
        sector_size.saturating_sub(self.valid_bytes() + self.writable_bytes())
    }

    #[inline]
    pub fn is_empty(&self, sector_size: usize) -> bool {
        !self.corrupt && self.writable_bytes() == sector_size
    }

    #[inline]
    pub fn has_space(&self, size: usize) -> bool {
        !self.corrupt && self.writable_bytes() >= size
    }

    pub fn add_valid(&mut self, bytes: usize) {
        self.valid_bytes = self.valid_bytes.saturating_add(bytes as u32);
    }

    pub fn remove_valid(&mut self, bytes: usize) {
        if (self.valid_bytes as usize) < bytes {
            warn!(
                "sector valid bytes underflow: have {}, removing {}",
                self.valid_bytes, bytes
            );
            self.valid_bytes = 0;
        } else {
            self.valid_bytes -= bytes as u32;
        }
    }

    /// Хвост стал занят `bytes` байтами (запись или неудачная попытка записи).
    pub fn remove_writable(&mut self, bytes: usize) {
        self.tail_free_bytes = self.tail_free_bytes.saturating_sub(bytes as u32);
    }

    pub fn set_writable(&mut self, bytes: usize) {
        self.tail_free_bytes = bytes as u32;
    }

    /// Битый сектор: хвост не используется, всё кроме valid: reclaimable.
    pub fn mark_corrupt(&mut self) {
        self.corrupt = true;
        self.tail_free_bytes = 0;
    }

    pub fn reset(&mut self, sector_size: usize) {
        *self = Self::empty(sector_size);
    }
}

/// Дескрипторы всех секторов раздела (ёмкость фиксирована MAX_SECTORS).
#[derive(Debug, Clone)]
pub struct Sectors<const MAX_SECTORS: usize> {
    descriptors: HVec<SectorDescriptor, MAX_SECTORS>,
    sector_size: usize,
    last_new: Option<usize>,
}

impl<const MAX_SECTORS: usize> Default for Sectors<MAX_SECTORS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const MAX_SECTORS: usize> Sectors<MAX_SECTORS> {
    pub fn new() -> Self {
        Self {
            descriptors: HVec::new(),
            sector_size: 0,
            last_new: None,
        }
    }

    /// Все сектора пустые (перед сканом в init).
    pub fn reset(&mut self, sector_count: usize, sector_size: usize) -> Result<()> {
        if sector_count > MAX_SECTORS {
            return Err(Error::invalid(format!(
                "partition has {} sectors, store is built for at most {}",
                sector_count, MAX_SECTORS
            )));
        }
        self.descriptors.clear();
        for _ in 0..sector_count {
            self.descriptors
                .push(SectorDescriptor::empty(sector_size))
                .map_err(|_| Error::invalid("sector table overflow"))?;
        }
        self.sector_size = sector_size;
        self.last_new = None;
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    #[inline]
    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    #[inline]
    pub fn get(&self, index: usize) -> &SectorDescriptor {
        &self.descriptors[index]
    }

    #[inline]
    pub fn get_mut(&mut self, index: usize) -> &mut SectorDescriptor {
        &mut self.descriptors[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &SectorDescriptor> {
        self.descriptors.iter()
    }

    #[inline]
    pub fn index_of(&self, address: Address) -> usize {
        address as usize / self.sector_size
    }

    #[inline]
    pub fn base_address(&self, index: usize) -> Address {
        (index * self.sector_size) as Address
    }

    #[inline]
    pub fn end_address(&self, index: usize) -> Address {
        ((index + 1) * self.sector_size) as Address
    }

    /// Адрес начала стёртого хвоста сектора.
    #[inline]
    pub fn next_writable_address(&self, index: usize) -> Address {
        let used = self.sector_size - self.descriptors[index].writable_bytes();
        self.base_address(index) + used as Address
    }

    pub fn empty_count(&self) -> usize {
        let ss = self.sector_size;
        self.descriptors.iter().filter(|d| d.is_empty(ss)).count()
    }

    /// Сектор для записи `size` байт; `reserved`: сектора, занятые другими копиями.
    ///
    /// `for_gc` разрешает занять последний пустой сектор.
    pub fn find_space(&mut self, size: usize, reserved: &[usize], for_gc: bool) -> Option<usize> {
        let ss = self.sector_size;
        if size > ss {
            return None;
        }

        for (i, d) in self.descriptors.iter().enumerate() {
            if reserved.contains(&i) || d.is_empty(ss) {
                continue;
            }
            if d.has_space(size) {
                return Some(i);
            }
        }

        // пустые сектора, уже выбранные под другие копии, в запас не входят
        let spare_empty = self
            .descriptors
            .iter()
            .enumerate()
            .filter(|(i, d)| !reserved.contains(i) && d.is_empty(ss))
            .count();
        if !for_gc && spare_empty <= 1 {
            return None;
        }

        let n = self.descriptors.len();
        let start = self.last_new.map(|l| l + 1).unwrap_or(0);
        for step in 0..n {
            let i = (start + step) % n;
            if reserved.contains(&i) {
                continue;
            }
            if self.descriptors[i].is_empty(ss) {
                self.last_new = Some(i);
                return Some(i);
            }
        }
        None
    }

    /// Сектор для GC: сначала полностью мёртвые (valid == 0), затем max reclaimable.
    pub fn find_sector_to_gc(&self, reserved: &[usize]) -> Option<usize> {
        let ss = self.sector_size;
        let mut best: Option<(usize, usize)> = None;
        let mut best_dead: Option<(usize, usize)> = None;

        for (i, d) in self.descriptors.iter().enumerate() {
            if reserved.contains(&i) {
                continue;
            }
            let r = d.reclaimable_bytes(ss);
            if r == 0 {
                continue;
            }
            if d.valid_bytes() == 0 && best_dead.map_or(true, |(_, br)| r > br) {
                best_dead = Some((i, r));
            }
            if best.map_or(true, |(_, br)| r > br) {
                best = Some((i, r));
            }
        }
        best_dead.or(best).map(|(i, _)| i)
    }

    /// Есть ли вообще что собирать.
    pub fn has_reclaimable(&self) -> bool {
        let ss = self.sector_size;
        self.descriptors.iter().any(|d| d.reclaimable_bytes(ss) > 0)
    }
}
