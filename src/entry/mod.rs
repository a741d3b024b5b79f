//! entry: on-flash формат одной записи (key/value или tombstone).
//!
//! Layout (LE): [magic u32][checksum u32][alignment_code u8][key_length u8]
//!              [value_length u16][transaction_id u32][key][value][padding]
//!
//! - checksum считается по всей записи (включая padding) с занулённым полем checksum;
//! - value_length == 0xFFFF: tombstone, байтов значения нет;
//! - размер записи округляется вверх до alignment (по умолчанию 16 = размер заголовка);
//! - запись никогда не пересекает границу сектора.
//!
//! Разделение по подмодулям:
//! - header.rs : EntryHeader: чтение/запись по явным смещениям.
//! - codec.rs  : encode_entry / decode_entry над буфером в RAM.
//! - located.rs: Entry: запись, найденная на flash (потоковое чтение/проверка).

pub mod codec;
pub mod header;
pub mod located;

pub use codec::{decode_entry, encode_entry, DecodedEntry};
pub use header::EntryHeader;
pub use located::Entry;

use std::fmt;

use crate::checksum::{digest_to_u32, ChecksumAlgorithm};
use crate::consts::{MAX_ALIGNMENT_BYTES, MIN_ALIGNMENT_BYTES};
use crate::error::{Error, Result};

/// Формат записи: магия + (опциональный) алгоритм чексуммы.
///
/// Store распознаёт на чтении все сконфигурированные форматы, пишет: только первым.
pub struct EntryFormat {
    pub magic: u32,
    checksum: Option<Box<dyn ChecksumAlgorithm>>,
}

impl EntryFormat {
    pub fn new<C: ChecksumAlgorithm + 'static>(magic: u32, checksum: C) -> Self {
        Self {
            magic,
            checksum: Some(Box::new(checksum)),
        }
    }

    /// Формат без чексуммы: поле checksum обязано быть 0.
    pub fn without_checksum(magic: u32) -> Self {
        Self {
            magic,
            checksum: None,
        }
    }

    #[inline]
    pub fn has_checksum(&self) -> bool {
        self.checksum.is_some()
    }

    pub(crate) fn checksum_reset(&mut self) {
        if let Some(c) = self.checksum.as_mut() {
            c.reset();
        }
    }

    pub(crate) fn checksum_update(&mut self, data: &[u8]) {
        if let Some(c) = self.checksum.as_mut() {
            c.update(data);
        }
    }

    /// Итоговое значение для поля checksum (0 без алгоритма).
    pub(crate) fn checksum_finish(&mut self) -> u32 {
        match self.checksum.as_mut() {
            Some(c) => digest_to_u32(c.finish()),
            None => 0,
        }
    }
}

impl fmt::Debug for EntryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryFormat")
            .field("magic", &format_args!("0x{:08x}", self.magic))
            .field("checksum", &self.has_checksum())
            .finish()
    }
}

/// Индекс формата по магии.
#[inline]
pub fn find_format(formats: &[EntryFormat], magic: u32) -> Option<usize> {
    formats.iter().position(|f| f.magic == magic)
}

#[inline]
pub fn align_up(n: usize, alignment: usize) -> usize {
    n.div_ceil(alignment) * alignment
}

/// Код выравнивания для заголовка: alignment = (code + 1) * 16.
pub fn alignment_code(alignment: usize) -> Result<u8> {
    if alignment < MIN_ALIGNMENT_BYTES
        || alignment > MAX_ALIGNMENT_BYTES
        || alignment % MIN_ALIGNMENT_BYTES != 0
    {
        return Err(Error::invalid(format!(
            "entry alignment {} must be a multiple of {} up to {}",
            alignment, MIN_ALIGNMENT_BYTES, MAX_ALIGNMENT_BYTES
        )));
    }
    Ok((alignment / MIN_ALIGNMENT_BYTES - 1) as u8)
}

/// Выравнивание записей для раздела с гранулярностью записи `partition_alignment`.
pub fn entry_alignment_for(partition_alignment: usize) -> Result<usize> {
    let a = align_up(partition_alignment.max(MIN_ALIGNMENT_BYTES), MIN_ALIGNMENT_BYTES);
    if a % partition_alignment.max(1) != 0 {
        return Err(Error::invalid(format!(
            "partition alignment {} is incompatible with {}-byte entry granularity",
            partition_alignment, MIN_ALIGNMENT_BYTES
        )));
    }
    alignment_code(a)?;
    Ok(a)
}
