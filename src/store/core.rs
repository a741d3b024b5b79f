//! store/core: структура KeyValueStore, состояние и базовые хелперы.
//!
//! Ёмкости заданы const generics (RAM-бюджет известен на этапе компиляции):
//! - MAX_ENTRIES: число ключей в индексе (включая tombstones);
//! - MAX_SECTORS: число секторов раздела;
//! - REDUNDANCY : число копий каждой записи (в разных секторах).
//!
//! Все операции синхронные; store не потокобезопасен (внешняя сериализация доступа).

use log::warn;

use crate::config::Options;
use crate::entry::{entry_alignment_for, Entry, EntryFormat};
use crate::error::{Error, Result};
use crate::flash::{Address, FlashPartition};
use crate::index::EntryIndex;
use crate::metrics;
use crate::sectors::Sectors;

/// Жизненный цикл store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    NotInitialized,
    Ready,
    /// init прошёл, но найдена порча/нехватка копий: нужен ремонт.
    NeedsMaintenance,
}

/// Счётчики восстановления (на экземпляр, сбрасываются в init).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorStats {
    pub corrupt_sectors_recovered: usize,
    pub missing_redundant_entries_recovered: usize,
}

pub struct KeyValueStore<
    P: FlashPartition,
    const MAX_ENTRIES: usize,
    const MAX_SECTORS: usize,
    const REDUNDANCY: usize = 1,
> {
    pub(crate) partition: P,
    pub(crate) formats: Vec<EntryFormat>,
    pub(crate) options: Options,
    pub(crate) index: EntryIndex<MAX_ENTRIES, REDUNDANCY>,
    pub(crate) sectors: Sectors<MAX_SECTORS>,
    pub(crate) state: StoreState,
    pub(crate) error_detected: bool,
    pub(crate) last_transaction_id: u32,
    pub(crate) error_stats: ErrorStats,
    pub(crate) alignment: usize,
}

impl<P: FlashPartition, const MAX_ENTRIES: usize, const MAX_SECTORS: usize, const REDUNDANCY: usize>
    KeyValueStore<P, MAX_ENTRIES, MAX_SECTORS, REDUNDANCY>
{
    /// Новый (неинициализированный) store. До init() доступны только accessors.
    ///
    /// `formats[0]`: формат для новых записей, остальные распознаются при чтении.
    pub fn new(partition: P, formats: Vec<EntryFormat>, options: Options) -> Self {
        Self {
            partition,
            formats,
            options,
            index: EntryIndex::new(),
            sectors: Sectors::new(),
            state: StoreState::NotInitialized,
            error_detected: false,
            last_transaction_id: 0,
            error_stats: ErrorStats::default(),
            alignment: 0,
        }
    }

    // ---------- accessors ----------

    #[inline]
    pub fn initialized(&self) -> bool {
        self.state != StoreState::NotInitialized
    }

    #[inline]
    pub fn state(&self) -> StoreState {
        self.state
    }

    /// Найдена порча или нехватка копий, которые ещё не починены.
    #[inline]
    pub fn error_detected(&self) -> bool {
        self.error_detected
    }

    /// Число живых (не удалённых) ключей.
    pub fn size(&self) -> usize {
        self.index.present_count()
    }

    pub fn empty(&self) -> bool {
        self.size() == 0
    }

    /// Ёмкость индекса.
    #[inline]
    pub fn max_size(&self) -> usize {
        MAX_ENTRIES
    }

    /// Дескрипторы ключей, включая удалённые.
    pub fn total_entries_with_deleted(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn redundancy(&self) -> usize {
        REDUNDANCY
    }

    /// Последний выданный transaction_id.
    #[inline]
    pub fn transaction_count(&self) -> u32 {
        self.last_transaction_id
    }

    #[inline]
    pub fn options(&self) -> &Options {
        &self.options
    }

    #[inline]
    pub fn error_stats(&self) -> ErrorStats {
        self.error_stats
    }

    #[inline]
    pub fn sector_count(&self) -> usize {
        self.sectors.len()
    }

    /// Выравнивание записей (кратно 16 и alignment раздела).
    #[inline]
    pub fn entry_alignment(&self) -> usize {
        self.alignment
    }

    pub fn partition(&self) -> &P {
        &self.partition
    }

    pub fn into_partition(self) -> P {
        self.partition
    }

    // ---------- crate helpers ----------

    /// Зафиксировать найденную ошибку: store требует ремонта.
    pub(crate) fn flag_error(&mut self) {
        self.error_detected = true;
        if self.state == StoreState::Ready {
            self.state = StoreState::NeedsMaintenance;
        }
    }

    /// Ремонт завершён: ошибок нет.
    pub(crate) fn clear_error(&mut self) {
        self.error_detected = false;
        if self.state == StoreState::NeedsMaintenance {
            self.state = StoreState::Ready;
        }
    }

    pub(crate) fn check_initialized(&self) -> Result<()> {
        if self.state == StoreState::NotInitialized {
            return Err(Error::precondition("store is not initialized"));
        }
        Ok(())
    }

    /// Проверка конфигурации перед сканом; возвращает выравнивание записей.
    pub(crate) fn validate_geometry(&self) -> Result<usize> {
        if REDUNDANCY == 0 {
            return Err(Error::invalid("redundancy must be at least 1"));
        }
        if self.formats.is_empty() {
            return Err(Error::invalid("at least one entry format is required"));
        }
        let ss = self.partition.sector_size_bytes();
        let count = self.partition.sector_count();
        if count < 2 {
            return Err(Error::invalid(format!(
                "partition needs at least 2 sectors, has {}",
                count
            )));
        }
        if count > MAX_SECTORS {
            return Err(Error::invalid(format!(
                "partition has {} sectors, store is built for at most {}",
                count, MAX_SECTORS
            )));
        }
        if (ss as u64) * (count as u64) > u32::MAX as u64 {
            return Err(Error::invalid("partition larger than 4 GiB address space"));
        }
        let alignment = entry_alignment_for(self.partition.alignment_bytes())?;
        if ss < alignment * 2 || ss % alignment != 0 {
            return Err(Error::invalid(format!(
                "sector size {} is not a multiple of entry alignment {}",
                ss, alignment
            )));
        }
        Ok(alignment)
    }

    #[inline]
    pub(crate) fn sector_end_of(&self, address: Address) -> Address {
        self.sectors.end_address(self.sectors.index_of(address))
    }

    /// Заголовок записи по адресу (без проверки чексуммы).
    pub(crate) fn read_entry(&self, address: Address) -> Result<Entry> {
        Entry::read(&self.partition, address, &self.formats, self.sector_end_of(address))
    }

    /// Заголовок записи по адресу + (опционально) потоковая проверка чексуммы.
    pub(crate) fn load_entry(&mut self, address: Address, verify: bool) -> Result<Entry> {
        let entry = self.read_entry(address)?;
        if verify {
            if let Err(e) = entry.verify_checksum(&self.partition, &mut self.formats[entry.format_index]) {
                metrics::record_checksum_failure();
                return Err(e);
            }
        }
        Ok(entry)
    }

    /// Первая читаемая копия ключа `i`: (entry, номер копии).
    pub(crate) fn first_good_copy(&mut self, i: usize, verify: bool) -> Result<(Entry, usize)> {
        let addresses: Vec<Address> = self.index.get(i).addresses().to_vec();
        let mut last_err = None;
        for (n, addr) in addresses.into_iter().enumerate() {
            match self.load_entry(addr, verify) {
                Ok(e) => return Ok((e, n)),
                Err(e @ Error::Storage(_)) => return Err(e),
                Err(e) => {
                    warn!("entry copy {} at 0x{:x} unreadable: {}", n, addr, e);
                    // битую копию переносит/восстанавливает repair вместе с сектором
                    let s = self.sectors.index_of(addr);
                    self.sectors.get_mut(s).mark_corrupt();
                    self.flag_error();
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::data_loss("key has no stored copies")))
    }

    /// Учесть, что запись по адресу больше не живая (её байты стали reclaimable).
    ///
    /// Если заголовок уже нечитаем, размер неизвестен: сектор помечается битым.
    pub(crate) fn reclaim_entry_at(&mut self, address: Address) -> Result<()> {
        let sector = self.sectors.index_of(address);
        match self.read_entry(address) {
            Ok(e) => {
                self.sectors.get_mut(sector).remove_valid(e.size());
                Ok(())
            }
            Err(e @ Error::Storage(_)) => Err(e),
            Err(e) => {
                warn!(
                    "cannot size stale entry at 0x{:x} ({}), marking sector {} corrupt",
                    address, e, sector
                );
                self.sectors.get_mut(sector).mark_corrupt();
                self.flag_error();
                Ok(())
            }
        }
    }
}
