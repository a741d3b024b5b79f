//! Lightweight global metrics for the KVS engine.
//!
//! Потокобезопасные атомарные счётчики (процессные, по всем экземплярам store):
//! - запись entries (копии, байты, пропущенные идентичные put)
//! - GC (запуски, перенесённые записи, стёртые сектора)
//! - чексуммы (проваленные проверки при скане/чтении/verify_on_write)
//!
//! Статистика конкретного экземпляра (in_use/reclaimable/...): в store::StorageStats.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

// ----- Writes -----
static ENTRIES_WRITTEN: AtomicU64 = AtomicU64::new(0);
static ENTRY_BYTES_WRITTEN: AtomicU64 = AtomicU64::new(0);
static PUTS_SKIPPED_IDENTICAL: AtomicU64 = AtomicU64::new(0);
static WRITE_FAILURES: AtomicU64 = AtomicU64::new(0);

// ----- GC -----
static GC_RUNS: AtomicU64 = AtomicU64::new(0);
static GC_ENTRIES_RELOCATED: AtomicU64 = AtomicU64::new(0);
static SECTORS_ERASED: AtomicU64 = AtomicU64::new(0);

// ----- Checksums -----
static CHECKSUM_FAILURES: AtomicU64 = AtomicU64::new(0);
static READ_FALLBACKS: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub entries_written: u64,
    pub entry_bytes_written: u64,
    pub puts_skipped_identical: u64,
    pub write_failures: u64,

    pub gc_runs: u64,
    pub gc_entries_relocated: u64,
    pub sectors_erased: u64,

    pub checksum_failures: u64,
    pub read_fallbacks: u64,
}

impl MetricsSnapshot {
    pub fn avg_entry_bytes(&self) -> f64 {
        if self.entries_written == 0 {
            0.0
        } else {
            self.entry_bytes_written as f64 / self.entries_written as f64
        }
    }
}

// ----- Recorders (writes) -----
pub fn record_entry_written(bytes: usize) {
    ENTRIES_WRITTEN.fetch_add(1, Ordering::Relaxed);
    ENTRY_BYTES_WRITTEN.fetch_add(bytes as u64, Ordering::Relaxed);
}

pub fn record_put_skipped_identical() {
    PUTS_SKIPPED_IDENTICAL.fetch_add(1, Ordering::Relaxed);
}

pub fn record_write_failure() {
    WRITE_FAILURES.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (GC) -----
pub fn record_gc_run() {
    GC_RUNS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_gc_relocation() {
    GC_ENTRIES_RELOCATED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_sector_erased() {
    SECTORS_ERASED.fetch_add(1, Ordering::Relaxed);
}

// ----- Recorders (checksums) -----
pub fn record_checksum_failure() {
    CHECKSUM_FAILURES.fetch_add(1, Ordering::Relaxed);
}

pub fn record_read_fallback() {
    READ_FALLBACKS.fetch_add(1, Ordering::Relaxed);
}

pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        entries_written: ENTRIES_WRITTEN.load(Ordering::Relaxed),
        entry_bytes_written: ENTRY_BYTES_WRITTEN.load(Ordering::Relaxed),
        puts_skipped_identical: PUTS_SKIPPED_IDENTICAL.load(Ordering::Relaxed),
        write_failures: WRITE_FAILURES.load(Ordering::Relaxed),
        gc_runs: GC_RUNS.load(Ordering::Relaxed),
        gc_entries_relocated: GC_ENTRIES_RELOCATED.load(Ordering::Relaxed),
        sectors_erased: SECTORS_ERASED.load(Ordering::Relaxed),
        checksum_failures: CHECKSUM_FAILURES.load(Ordering::Relaxed),
        read_fallbacks: READ_FALLBACKS.load(Ordering::Relaxed),
    }
}
