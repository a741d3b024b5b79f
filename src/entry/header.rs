use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{
    ENTRY_HEADER_SIZE, ERASED_BYTE, MIN_ALIGNMENT_BYTES, OFF_ALIGNMENT, OFF_CHECKSUM,
    OFF_KEY_LEN, OFF_MAGIC, OFF_TXN_ID, OFF_VALUE_LEN, TOMBSTONE_VALUE_LEN,
};
use crate::error::{Error, Result};

use super::align_up;

/// Заголовок записи (16 байт, явные смещения, без опоры на layout структуры).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    pub magic: u32,
    pub checksum: u32,
    pub alignment_code: u8, // alignment = (code + 1) * 16
    pub key_length: u8,
    pub value_length: u16, // 0xFFFF = tombstone
    pub transaction_id: u32,
}

impl EntryHeader {
    /// Прочитать заголовок из буфера (без валидации магии/чексуммы).
    pub fn read(buf: &[u8]) -> Result<Self> {
        if buf.len() < ENTRY_HEADER_SIZE {
            return Err(Error::data_loss("buffer too small for entry header"));
        }
        Ok(Self {
            magic: LittleEndian::read_u32(&buf[OFF_MAGIC..OFF_MAGIC + 4]),
            checksum: LittleEndian::read_u32(&buf[OFF_CHECKSUM..OFF_CHECKSUM + 4]),
            alignment_code: buf[OFF_ALIGNMENT],
            key_length: buf[OFF_KEY_LEN],
            value_length: LittleEndian::read_u16(&buf[OFF_VALUE_LEN..OFF_VALUE_LEN + 2]),
            transaction_id: LittleEndian::read_u32(&buf[OFF_TXN_ID..OFF_TXN_ID + 4]),
        })
    }

    /// Записать заголовок в первые 16 байт буфера.
    pub fn write(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < ENTRY_HEADER_SIZE {
            return Err(Error::invalid("buffer too small for entry header"));
        }
        LittleEndian::write_u32(&mut buf[OFF_MAGIC..OFF_MAGIC + 4], self.magic);
        LittleEndian::write_u32(&mut buf[OFF_CHECKSUM..OFF_CHECKSUM + 4], self.checksum);
        buf[OFF_ALIGNMENT] = self.alignment_code;
        buf[OFF_KEY_LEN] = self.key_length;
        LittleEndian::write_u16(&mut buf[OFF_VALUE_LEN..OFF_VALUE_LEN + 2], self.value_length);
        LittleEndian::write_u32(&mut buf[OFF_TXN_ID..OFF_TXN_ID + 4], self.transaction_id);
        Ok(())
    }

    /// Байты заголовка с занулённым полем checksum (вход для расчёта чексуммы).
    pub fn to_bytes_for_checksum(&self) -> [u8; ENTRY_HEADER_SIZE] {
        let mut b = [0u8; ENTRY_HEADER_SIZE];
        let mut h = *self;
        h.checksum = 0;
        // буфер ровно 16 байт: write не может упасть
        let _ = h.write(&mut b);
        b
    }

    #[inline]
    pub fn deleted(&self) -> bool {
        self.value_length == TOMBSTONE_VALUE_LEN
    }

    /// Длина значения в байтах (0 для tombstone).
    #[inline]
    pub fn value_len(&self) -> usize {
        if self.deleted() {
            0
        } else {
            self.value_length as usize
        }
    }

    #[inline]
    pub fn key_len(&self) -> usize {
        self.key_length as usize
    }

    #[inline]
    pub fn alignment(&self) -> usize {
        (self.alignment_code as usize + 1) * MIN_ALIGNMENT_BYTES
    }

    /// Полезная длина без padding: header + key + value.
    #[inline]
    pub fn content_size(&self) -> usize {
        ENTRY_HEADER_SIZE + self.key_len() + self.value_len()
    }

    /// Полный размер записи на flash (с padding до alignment).
    #[inline]
    pub fn size(&self) -> usize {
        align_up(self.content_size(), self.alignment())
    }

    /// Все 16 байт заголовка стёрты (0xFF): дальше в секторе записей нет.
    #[inline]
    pub fn is_erased(buf: &[u8]) -> bool {
        buf.len() >= ENTRY_HEADER_SIZE
            && buf[..ENTRY_HEADER_SIZE].iter().all(|&b| b == ERASED_BYTE)
    }
}
