//! store/init: восстановление RAM-состояния сканом flash.
//!
//! Скан идёт по каждому сектору с начала:
//! - стёртый заголовок (16 x 0xFF) и стёртый остаток: конец данных сектора;
//! - запись с известной магией и верной чексуммой: в индекс (upsert по transaction_id);
//! - порча: сектор помечается битым, поиск следующей магии с шагом 16 байт;
//! - после последней записи хвост обязан быть стёрт, иначе сектор битый.
//!
//! Конфликты версий:
//! - больший transaction_id побеждает, прежние копии становятся reclaimable;
//! - равный id и одинаковые размер+чексумма: избыточная копия (лишние сверх REDUNDANCY: reclaimable);
//! - равный id и разное содержимое: побеждает первая по порядку скана, вторая reclaimable;
//! - одинаковый hash у разных ключей: коллизия, запись не индексируется.
//!
//! Любая порча/конфликт => Err(DataLoss) после построения индекса (даже если lazy-ремонт
//! всё починил). Ошибки flash (Storage) прерывают init.

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, error, info, warn};

use crate::checksum::key_hash;
use crate::config::ErrorRecovery;
use crate::consts::{ENTRY_HEADER_SIZE, MIN_ALIGNMENT_BYTES};
use crate::entry::{find_format, Entry, EntryHeader};
use crate::error::{Error, Result};
use crate::flash::{Address, FlashPartition};
use crate::index::{EntryState, Upsert};

use super::core::{ErrorStats, KeyValueStore, StoreState};

/// Итог скана одного сектора.
#[derive(Debug, Default, Clone, Copy)]
struct SectorScan {
    corrupt: bool,
    entries: usize,
    conflicts: usize,
}

impl<P: FlashPartition, const MAX_ENTRIES: usize, const MAX_SECTORS: usize, const REDUNDANCY: usize>
    KeyValueStore<P, MAX_ENTRIES, MAX_SECTORS, REDUNDANCY>
{
    /// Просканировать раздел и построить индекс/учёт секторов.
    ///
    /// Ok: ничего подозрительного; DataLoss: найдена порча (store при этом
    /// инициализирован и пригоден к работе, initialized() == true).
    pub fn init(&mut self) -> Result<()> {
        self.state = StoreState::NotInitialized;
        self.alignment = self.validate_geometry()?;

        let ss = self.partition.sector_size_bytes();
        let count = self.partition.sector_count();
        self.index.clear();
        self.sectors.reset(count, ss)?;
        self.error_detected = false;
        self.last_transaction_id = 0;
        self.error_stats = ErrorStats::default();

        debug!(
            "init: scanning {} sectors x {} bytes (redundancy {}, formats {})",
            count,
            ss,
            REDUNDANCY,
            self.formats.len()
        );

        let mut corrupt_sectors = 0usize;
        let mut conflicts = 0usize;
        let mut entries = 0usize;
        for sector in 0..count {
            let scan = self.scan_sector(sector)?;
            if scan.corrupt {
                corrupt_sectors += 1;
            }
            conflicts += scan.conflicts;
            entries += scan.entries;
        }

        let missing = self.index.iter().filter(|d| !d.has_all_copies()).count();
        if missing > 0 {
            warn!(
                "init: {} keys have fewer than {} copies",
                missing, REDUNDANCY
            );
            self.error_detected = true;
        }
        if self.sectors.empty_count() == 0 {
            warn!("init: no empty sector left for garbage collection");
            self.error_detected = true;
        }
        let corruption = corrupt_sectors > 0 || conflicts > 0;
        if corruption {
            self.error_detected = true;
        }

        self.state = if self.error_detected {
            StoreState::NeedsMaintenance
        } else {
            StoreState::Ready
        };
        info!(
            "init: {} entries scanned, {} keys ({} incl. deleted), last transaction {}, corrupt sectors {}, conflicts {}",
            entries,
            self.index.present_count(),
            self.index.len(),
            self.last_transaction_id,
            corrupt_sectors,
            conflicts
        );

        if self.error_detected && self.options.recovery == ErrorRecovery::Lazy {
            match self.repair() {
                Ok(()) => info!("init: lazy recovery completed"),
                Err(e) => warn!("init: lazy recovery failed: {}", e),
            }
        }

        if corruption {
            return Err(Error::data_loss(format!(
                "init found {} corrupt sectors and {} conflicting entries",
                corrupt_sectors, conflicts
            )));
        }
        Ok(())
    }

    fn scan_sector(&mut self, sector: usize) -> Result<SectorScan> {
        let end = self.sectors.end_address(sector);
        let mut addr = self.sectors.base_address(sector);
        let mut scan = SectorScan::default();
        let mut hb = [0u8; ENTRY_HEADER_SIZE];

        while ((end - addr) as usize) >= ENTRY_HEADER_SIZE {
            self.partition.read(addr, &mut hb)?;
            if EntryHeader::is_erased(&hb) {
                if self.partition.is_region_erased(addr, (end - addr) as usize)? {
                    break;
                }
                warn!(
                    "init: sector {} has an erased gap at 0x{:x} followed by data",
                    sector, addr
                );
                scan.corrupt = true;
                addr = self.scan_for_entry(addr + MIN_ALIGNMENT_BYTES as Address, end)?;
                continue;
            }

            match self.load_entry(addr, true) {
                Ok(entry) => {
                    if self.add_scanned_entry(sector, &entry)? {
                        scan.conflicts += 1;
                    }
                    scan.entries += 1;
                    addr = entry.next_address();
                }
                Err(e @ Error::Storage(_)) => return Err(e),
                Err(e) => {
                    warn!("init: sector {}: bad entry at 0x{:x}: {}", sector, addr, e);
                    scan.corrupt = true;
                    addr = self.scan_for_entry(addr + MIN_ALIGNMENT_BYTES as Address, end)?;
                }
            }
        }

        if !scan.corrupt && addr < end && !self.partition.is_region_erased(addr, (end - addr) as usize)? {
            warn!("init: sector {} tail at 0x{:x} is not erased", sector, addr);
            scan.corrupt = true;
        }

        let d = self.sectors.get_mut(sector);
        if scan.corrupt {
            d.mark_corrupt();
        } else {
            d.set_writable((end - addr) as usize);
        }
        Ok(scan)
    }

    /// Следующий адрес (шаг 16) с известной магией; `end`, если таких нет.
    fn scan_for_entry(&self, from: Address, end: Address) -> Result<Address> {
        let mut mb = [0u8; 4];
        let mut addr = from;
        while ((end - addr) as usize) >= ENTRY_HEADER_SIZE {
            self.partition.read(addr, &mut mb)?;
            if find_format(&self.formats, LittleEndian::read_u32(&mb)).is_some() {
                debug!("init: resuming scan at 0x{:x}", addr);
                return Ok(addr);
            }
            addr += MIN_ALIGNMENT_BYTES as Address;
        }
        Ok(end)
    }

    /// Учесть валидную запись из скана. true: конфликт (коллизия/расхождение копий).
    fn add_scanned_entry(&mut self, sector: usize, entry: &Entry) -> Result<bool> {
        let key = entry.read_key(&self.partition)?;
        let hash = key_hash(&key);
        let size = entry.size();
        let id = entry.transaction_id();

        self.sectors.get_mut(sector).add_valid(size);
        self.last_transaction_id = self.last_transaction_id.max(id);

        if let Some(existing) = self.index.find(hash).and_then(|i| self.index.get(i).first_address()) {
            let other = self.read_entry(existing)?;
            if !other.key_matches(&self.partition, &key)? {
                error!(
                    "init: key hash 0x{:08x} collision between entries at 0x{:x} and 0x{:x}",
                    hash, existing, entry.address
                );
                self.sectors.get_mut(sector).remove_valid(size);
                return Ok(true);
            }
            if other.transaction_id() == id
                && (other.size() != size || other.header.checksum != entry.header.checksum)
            {
                warn!(
                    "init: copies of transaction {} at 0x{:x} and 0x{:x} disagree, keeping the first",
                    id, existing, entry.address
                );
                self.sectors.get_mut(sector).remove_valid(size);
                return Ok(true);
            }
        }

        let state = if entry.deleted() {
            EntryState::Deleted
        } else {
            EntryState::Valid
        };
        match self.index.upsert(hash, id, state, entry.address)? {
            Upsert::Inserted | Upsert::CopyAdded => {}
            Upsert::Superseded(previous) => {
                for a in previous {
                    self.reclaim_entry_at(a)?;
                }
            }
            Upsert::Stale | Upsert::CopyExcess => {
                self.sectors.get_mut(sector).remove_valid(size);
            }
        }
        Ok(false)
    }
}
