//! store/gc: сборка мусора и обслуживание.
//!
//! Реализовано:
//! - garbage_collect_sector: перенос живых копий из сектора (байты как есть, тот же
//!   transaction_id) в другие сектора, затем стирание сектора;
//! - repair: GC битых секторов, восстановление запаса пустого сектора и недостающих копий;
//! - partial_maintenance: GC одного сектора с наибольшим reclaimable;
//! - full_maintenance: repair + миграция записей в основной формат + GC всего reclaimable;
//! - heavy_maintenance: full + удаление tombstones из индекса и повторный GC.

use log::{debug, error, info, warn};

use crate::config::ErrorRecovery;
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::flash::{Address, FlashPartition};
use crate::metrics;

use super::core::KeyValueStore;

impl<P: FlashPartition, const MAX_ENTRIES: usize, const MAX_SECTORS: usize, const REDUNDANCY: usize>
    KeyValueStore<P, MAX_ENTRIES, MAX_SECTORS, REDUNDANCY>
{
    /// Собрать один сектор (с наибольшим reclaimable). Ничего не делает, если собирать нечего.
    pub fn partial_maintenance(&mut self) -> Result<()> {
        self.check_initialized()?;
        if self.error_detected && self.options.recovery == ErrorRecovery::Lazy {
            self.repair()?;
        }
        match self.sectors.find_sector_to_gc(&[]) {
            Some(s) => self.garbage_collect_sector(s, &[]),
            None => {
                debug!("partial maintenance: nothing to collect");
                Ok(())
            }
        }
    }

    /// Полное обслуживание: ремонт, миграция форматов, GC всего reclaimable.
    pub fn full_maintenance(&mut self) -> Result<()> {
        self.run_maintenance(false)
    }

    /// Как full_maintenance, плюс удаление tombstones (освобождает слоты индекса).
    pub fn heavy_maintenance(&mut self) -> Result<()> {
        self.run_maintenance(true)
    }

    fn run_maintenance(&mut self, heavy: bool) -> Result<()> {
        self.check_initialized()?;
        let kind = if heavy { "heavy" } else { "full" };
        info!("{} maintenance: start", kind);

        if self.error_detected {
            self.repair()?;
        }
        let migrated = self.update_entries_to_primary_format()?;
        let mut collected = self.collect_all()?;
        let mut dropped = 0usize;
        if heavy {
            dropped = self.drop_tombstones()?;
            collected += self.collect_all()?;
        }
        self.ensure_redundancy()?;

        if self.sectors.empty_count() == 0 {
            self.flag_error();
            return Err(Error::exhausted(
                "no empty sector left after maintenance: partition is full of live data",
            ));
        }
        self.clear_error();
        info!(
            "{} maintenance: done (migrated {}, sectors collected {}, tombstones dropped {})",
            kind, migrated, collected, dropped
        );
        Ok(())
    }

    /// Починить всё, что можно: битые сектора, запас пустого сектора, недостающие копии.
    ///
    /// При успехе снимает error_detected.
    pub(crate) fn repair(&mut self) -> Result<()> {
        info!("repair: start");
        let mut first_err: Option<Error> = None;

        for s in 0..self.sectors.len() {
            if !self.sectors.get(s).is_corrupt() {
                continue;
            }
            match self.garbage_collect_sector(s, &[]) {
                Ok(()) => {
                    self.error_stats.corrupt_sectors_recovered += 1;
                    info!("repair: recovered corrupt sector {}", s);
                }
                Err(e) => {
                    warn!("repair: sector {} not recovered: {}", s, e);
                    first_err.get_or_insert(e);
                }
            }
        }

        if self.sectors.empty_count() == 0 {
            if let Err(e) = self.garbage_collect_one(&[]) {
                warn!("repair: cannot free a sector: {}", e);
                first_err.get_or_insert(e);
            }
        }

        if let Err(e) = self.ensure_redundancy() {
            first_err.get_or_insert(e);
        }

        match first_err {
            Some(e) => Err(e),
            None => {
                self.clear_error();
                info!("repair: done");
                Ok(())
            }
        }
    }

    /// GC сектора с наибольшим reclaimable, кроме `reserved`.
    pub(crate) fn garbage_collect_one(&mut self, reserved: &[usize]) -> Result<()> {
        let Some(s) = self.sectors.find_sector_to_gc(reserved) else {
            return Err(Error::exhausted("no sector has reclaimable bytes"));
        };
        self.garbage_collect_sector(s, reserved)
    }

    /// GC пока есть reclaimable. Возвращает число собранных секторов.
    fn collect_all(&mut self) -> Result<usize> {
        let mut n = 0usize;
        while let Some(s) = self.sectors.find_sector_to_gc(&[]) {
            self.garbage_collect_sector(s, &[])?;
            n += 1;
        }
        Ok(n)
    }

    /// Перенести живые копии из сектора `s` и стереть его.
    ///
    /// Копии переносятся в сектора вне `reserved` и вне секторов других копий того же ключа.
    pub(crate) fn garbage_collect_sector(&mut self, s: usize, reserved: &[usize]) -> Result<()> {
        let ss = self.sectors.sector_size();
        let base = self.sectors.base_address(s);
        let end = self.sectors.end_address(s);
        debug!(
            "gc: sector {} (valid {}, reclaimable {}, corrupt {})",
            s,
            self.sectors.get(s).valid_bytes(),
            self.sectors.get(s).reclaimable_bytes(ss),
            self.sectors.get(s).is_corrupt()
        );
        metrics::record_gc_run();

        let mut lost = 0usize;
        for hash in self.index.hashes() {
            let Some(i) = self.index.find(hash) else {
                continue;
            };
            let in_sector: Vec<Address> = self
                .index
                .get(i)
                .addresses()
                .iter()
                .copied()
                .filter(|&a| a >= base && a < end)
                .collect();
            for addr in in_sector {
                if !self.relocate_copy(hash, addr, s, reserved)? {
                    lost += 1;
                }
            }
        }

        let leftover = self.sectors.get(s).valid_bytes();
        if leftover != 0 && lost == 0 {
            warn!(
                "gc: sector {} still accounts {} valid bytes after relocation",
                s, leftover
            );
        }

        self.partition.erase(s, 1)?;
        self.sectors.get_mut(s).reset(ss);
        metrics::record_sector_erased();

        if lost > 0 {
            error!("gc: sector {}: {} entry copies had no intact source and were dropped", s, lost);
            self.flag_error();
        }
        Ok(())
    }

    /// Перенести копию ключа по адресу `addr` из сектора `s`. false: целой копии нет.
    fn relocate_copy(&mut self, hash: u32, addr: Address, s: usize, reserved: &[usize]) -> Result<bool> {
        let Some(i) = self.index.find(hash) else {
            return Ok(true);
        };

        // источник: сама копия, иначе любая другая целая копия той же версии
        let mut candidates: Vec<Address> = vec![addr];
        candidates.extend(self.index.get(i).addresses().iter().copied().filter(|&a| a != addr));
        let mut source: Option<Entry> = None;
        for a in candidates {
            match self.load_entry(a, true) {
                Ok(e) => {
                    source = Some(e);
                    break;
                }
                Err(e @ Error::Storage(_)) => return Err(e),
                Err(e) => warn!("gc: copy at 0x{:x} unusable: {}", a, e),
            }
        }
        let Some(src) = source else {
            let d = self.index.get_mut(i);
            d.remove_address(addr);
            if d.addresses().is_empty() {
                error!("gc: key hash 0x{:08x} lost its last copy", hash);
                self.index.remove(i);
            }
            return Ok(false);
        };

        let raw = src.read_raw(&self.partition)?;
        let size = raw.len();

        let mut excluded: Vec<usize> = reserved.to_vec();
        excluded.push(s);
        excluded.extend(
            self.index
                .get(i)
                .addresses()
                .iter()
                .map(|&a| self.sectors.index_of(a)),
        );
        let Some(dst) = self.sectors.find_space(size, &excluded, true) else {
            return Err(Error::exhausted(format!(
                "no room to relocate a {}-byte entry out of sector {}",
                size, s
            )));
        };

        let new_addr = self.sectors.next_writable_address(dst);
        self.write_entry_bytes(dst, new_addr, &raw)?;
        self.index.get_mut(i).replace_address(addr, new_addr);
        self.sectors.get_mut(s).remove_valid(size);
        metrics::record_gc_relocation();
        debug!("gc: moved entry 0x{:x} -> 0x{:x}", addr, new_addr);
        Ok(true)
    }

    /// Дописать недостающие копии, чтобы у каждого ключа было REDUNDANCY копий.
    pub(crate) fn ensure_redundancy(&mut self) -> Result<()> {
        let mut first_err: Option<Error> = None;
        for hash in self.index.hashes() {
            loop {
                let Some(i) = self.index.find(hash) else {
                    break;
                };
                if self.index.get(i).has_all_copies() {
                    break;
                }
                let src = match self.first_good_copy(i, true) {
                    Ok((e, _)) => e,
                    Err(e @ Error::Storage(_)) => return Err(e),
                    Err(e) => {
                        error!("redundancy: key hash 0x{:08x} has no intact copy: {}", hash, e);
                        first_err.get_or_insert(e);
                        break;
                    }
                };
                let raw = src.read_raw(&self.partition)?;
                let reserved: Vec<usize> = self
                    .index
                    .get(i)
                    .addresses()
                    .iter()
                    .map(|&a| self.sectors.index_of(a))
                    .collect();

                let mut gc_runs = 0usize;
                let sector = self.find_space_for_write(raw.len(), &reserved, usize::MAX, &mut gc_runs)?;
                let addr = self.sectors.next_writable_address(sector);
                self.write_entry_bytes(sector, addr, &raw)?;

                if let Some(i) = self.index.find(hash) {
                    self.index.get_mut(i).add_address(addr);
                }
                self.error_stats.missing_redundant_entries_recovered += 1;
                debug!("redundancy: restored copy at 0x{:x}", addr);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Переписать записи старых форматов в основной (новая версия, новый id).
    fn update_entries_to_primary_format(&mut self) -> Result<usize> {
        if self.formats.len() < 2 {
            return Ok(0);
        }
        let mut migrated = 0usize;
        for hash in self.index.hashes() {
            let Some(i) = self.index.find(hash) else {
                continue;
            };
            let entry = match self.first_good_copy(i, true) {
                Ok((e, _)) => e,
                Err(e @ Error::Storage(_)) => return Err(e),
                Err(e) => {
                    warn!("migrate: skipping unreadable key: {}", e);
                    continue;
                }
            };
            if entry.format_index == 0 {
                continue;
            }
            let key = entry.read_key(&self.partition)?;
            let value = if entry.deleted() {
                None
            } else {
                let mut v = vec![0u8; entry.value_len()];
                entry.read_value(&self.partition, &mut v, 0)?;
                Some(v)
            };
            debug!(
                "migrate: rewriting entry 0x{:x} from format 0x{:08x}",
                entry.address, self.formats[entry.format_index].magic
            );
            self.write_new_version(&key, value.as_deref(), usize::MAX)?;
            migrated += 1;
        }
        if migrated > 0 {
            info!("migrate: {} entries rewritten in the primary format", migrated);
        }
        Ok(migrated)
    }

    /// Убрать tombstones из индекса; их байты становятся reclaimable.
    ///
    /// Вызывать только когда reclaimable == 0: старых версий удалённых ключей на flash нет.
    fn drop_tombstones(&mut self) -> Result<usize> {
        let mut dropped = 0usize;
        let mut i = 0usize;
        while i < self.index.len() {
            if !self.index.get(i).deleted() {
                i += 1;
                continue;
            }
            let desc = self.index.remove(i);
            for &a in desc.addresses() {
                self.reclaim_entry_at(a)?;
            }
            dropped += 1;
        }
        Ok(dropped)
    }
}
