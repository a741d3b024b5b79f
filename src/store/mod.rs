//! store: KeyValueStore: log-structured KVS поверх block-erase flash.
//!
//! Разделение по подмодулям:
//! - core.rs : структура KeyValueStore, состояние, конструктор, accessors
//! - init.rs : init(): скан всех секторов, восстановление индекса и учёта секторов
//! - kv.rs   : get/get_at/value_size/put/delete/for_each/keys + путь записи копий
//! - gc.rs   : GC сектора, repair, partial/full/heavy maintenance, миграция форматов
//! - stats.rs: StorageStats/SectorStats и текстовый/JSON отчёт

pub mod core;
pub mod gc;
pub mod init;
pub mod kv;
pub mod stats;

pub use self::core::{ErrorStats, KeyValueStore, StoreState};
pub use stats::{SectorStats, StorageStats};
