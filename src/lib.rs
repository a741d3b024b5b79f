#![allow(non_snake_case)]

// Базовые модули
pub mod consts;
pub mod error;
pub mod config;
pub mod metrics;

// Внешние коллабораторы: raw flash и чексуммы
pub mod checksum; // src/checksum.rs
pub mod flash;    // src/flash/{mod,memory,file}.rs

// Формат записи и RAM-учёт
pub mod entry;    // src/entry/{mod,header,codec,located}.rs
pub mod sectors;  // src/sectors.rs
pub mod index;    // src/index.rs

// Движок: init/get/put/delete/gc/maintenance
pub mod store;    // src/store/{mod,core,init,kv,gc,stats}.rs

// Удобные реэкспорты
pub use config::{ErrorRecovery, GcOnWrite, Options};
pub use error::{Error, Result};
pub use checksum::{ChecksumAlgorithm, Crc32, Crc32c, XxHash32Checksum};
pub use flash::{FileFlash, FlashPartition, InMemoryFlash};
pub use entry::EntryFormat;
pub use store::{KeyValueStore, SectorStats, StorageStats};
