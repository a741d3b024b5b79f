//! Общие константы on-flash формата записи.
//!
//! Layout заголовка (16 байт, little-endian):
//! [magic u32][checksum u32][alignment_code u8][key_length u8][value_length u16][transaction_id u32]
//! Далее key, value (отсутствует у tombstone) и padding до границы выравнивания.

// -------- Entry header --------
pub const ENTRY_HEADER_SIZE: usize = 16;

pub const OFF_MAGIC: usize = 0;
pub const OFF_CHECKSUM: usize = 4;
pub const OFF_ALIGNMENT: usize = 8;
pub const OFF_KEY_LEN: usize = 9;
pub const OFF_VALUE_LEN: usize = 10;
pub const OFF_TXN_ID: usize = 12;

// value_length == 0xFFFF: tombstone (значения нет)
pub const TOMBSTONE_VALUE_LEN: u16 = 0xFFFF;

pub const MAX_KEY_LENGTH: usize = u8::MAX as usize;
pub const MAX_VALUE_LENGTH: usize = (TOMBSTONE_VALUE_LEN - 1) as usize;

// -------- Alignment --------
// Минимальная гранулярность записи = размер заголовка.
// alignment = (alignment_code + 1) * MIN_ALIGNMENT_BYTES
pub const MIN_ALIGNMENT_BYTES: usize = ENTRY_HEADER_SIZE;
pub const MAX_ALIGNMENT_BYTES: usize = (u8::MAX as usize + 1) * MIN_ALIGNMENT_BYTES;

// -------- Flash --------
pub const ERASED_BYTE: u8 = 0xFF;

// Рабочий буфер для потоковой проверки чексуммы / проверки стёртости
pub const WORKING_BUFFER_SIZE: usize = 64;

// -------- Formats --------
// Магия формата по умолчанию ("FKV1" в LE)
pub const DEFAULT_MAGIC: u32 = 0x3156_4B46;
