//! store/stats: сводная статистика хранилища и отчёт (text/JSON).

use serde::Serialize;

use crate::config::Options;
use crate::error::{Error, Result};
use crate::flash::FlashPartition;
use crate::metrics::{self, MetricsSnapshot};

use super::core::KeyValueStore;

/// Классификация байтов раздела.
///
/// writable_bytes не включает один пустой сектор, зарезервированный под GC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    pub in_use_bytes: usize,
    pub reclaimable_bytes: usize,
    pub writable_bytes: usize,
    pub corrupt_sectors_recovered: usize,
    pub missing_redundant_entries_recovered: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SectorStats {
    pub index: usize,
    pub valid_bytes: usize,
    pub writable_bytes: usize,
    pub reclaimable_bytes: usize,
    pub corrupt: bool,
}

#[derive(Debug, Serialize)]
struct StoreReport<'a> {
    sector_size: usize,
    sector_count: usize,
    redundancy: usize,
    entry_alignment: usize,
    keys: usize,
    keys_with_deleted: usize,
    max_keys: usize,
    transaction_count: u32,
    error_detected: bool,
    options: &'a Options,
    storage: StorageStats,
    sectors: Vec<SectorStats>,
    metrics: MetricsSnapshot,
}

impl<P: FlashPartition, const MAX_ENTRIES: usize, const MAX_SECTORS: usize, const REDUNDANCY: usize>
    KeyValueStore<P, MAX_ENTRIES, MAX_SECTORS, REDUNDANCY>
{
    pub fn get_storage_stats(&self) -> StorageStats {
        let ss = self.sectors.sector_size();
        let mut st = StorageStats {
            corrupt_sectors_recovered: self.error_stats.corrupt_sectors_recovered,
            missing_redundant_entries_recovered: self
                .error_stats
                .missing_redundant_entries_recovered,
            ..StorageStats::default()
        };
        for d in self.sectors.iter() {
            st.in_use_bytes += d.valid_bytes();
            st.reclaimable_bytes += d.reclaimable_bytes(ss);
            st.writable_bytes += d.writable_bytes();
        }
        if self.sectors.empty_count() > 0 {
            st.writable_bytes = st.writable_bytes.saturating_sub(ss);
        }
        st
    }

    pub fn sector_stats(&self) -> Vec<SectorStats> {
        let ss = self.sectors.sector_size();
        self.sectors
            .iter()
            .enumerate()
            .map(|(index, d)| SectorStats {
                index,
                valid_bytes: d.valid_bytes(),
                writable_bytes: d.writable_bytes(),
                reclaimable_bytes: d.reclaimable_bytes(ss),
                corrupt: d.is_corrupt(),
            })
            .collect()
    }

    /// Печать сводки по store (JSON: однострочник).
    pub fn print_stats(&self, json: bool) -> Result<()> {
        let report = StoreReport {
            sector_size: self.sectors.sector_size(),
            sector_count: self.sectors.len(),
            redundancy: REDUNDANCY,
            entry_alignment: self.alignment,
            keys: self.size(),
            keys_with_deleted: self.total_entries_with_deleted(),
            max_keys: MAX_ENTRIES,
            transaction_count: self.last_transaction_id,
            error_detected: self.error_detected,
            options: &self.options,
            storage: self.get_storage_stats(),
            sectors: self.sector_stats(),
            metrics: metrics::snapshot(),
        };

        if json {
            let s = serde_json::to_string(&report).map_err(|e| Error::Storage(e.into()))?;
            println!("{}", s);
            return Ok(());
        }

        let st = &report.storage;
        println!("FlashKVS:");
        println!(
            "  geometry        = {} sectors x {} bytes (alignment {})",
            report.sector_count, report.sector_size, report.entry_alignment
        );
        println!("  redundancy      = {}", report.redundancy);
        println!(
            "  keys            = {} ({} incl. deleted, max {})",
            report.keys, report.keys_with_deleted, report.max_keys
        );
        println!("  transactions    = {}", report.transaction_count);
        println!("  error_detected  = {}", report.error_detected);
        println!("  options         = {}", report.options);
        println!("  in_use_bytes    = {}", st.in_use_bytes);
        println!("  reclaimable     = {}", st.reclaimable_bytes);
        println!("  writable_bytes  = {}", st.writable_bytes);
        println!(
            "  recovered       = {} corrupt sectors, {} redundant copies",
            st.corrupt_sectors_recovered, st.missing_redundant_entries_recovered
        );
        println!("  sectors:");
        for s in &report.sectors {
            println!(
                "    #{:<4} valid={:<8} writable={:<8} reclaimable={:<8}{}",
                s.index,
                s.valid_bytes,
                s.writable_bytes,
                s.reclaimable_bytes,
                if s.corrupt { " CORRUPT" } else { "" }
            );
        }
        let m = &report.metrics;
        println!(
            "  metrics: entries_written={} (avg {:.1} B), skipped_identical={}, write_failures={}",
            m.entries_written,
            m.avg_entry_bytes(),
            m.puts_skipped_identical,
            m.write_failures
        );
        println!(
            "           gc_runs={}, relocated={}, erased={}, checksum_failures={}, read_fallbacks={}",
            m.gc_runs, m.gc_entries_relocated, m.sectors_erased, m.checksum_failures, m.read_fallbacks
        );
        Ok(())
    }
}
