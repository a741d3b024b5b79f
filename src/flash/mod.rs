//! flash: raw storage коллаборатор движка (block-erase flash partition).
//!
//! Характеристики flash, на которые опирается движок:
//! - память разбита на сектора фиксированного размера (минимальная единица стирания);
//! - стирание выставляет все байты сектора в 0xFF;
//! - писать можно только в стёртые байты (повторная запись без стирания запрещена);
//! - запись может требовать выравнивания адреса/длины (alignment_bytes).
//!
//! Реализации:
//! - memory.rs: InMemoryFlash: RAM-эмуляция с инъекцией отказов (тесты, бенчи);
//! - file.rs  : FileFlash: образ раздела в файле с эксклюзивной блокировкой (CLI).

pub mod file;
pub mod memory;

pub use file::FileFlash;
pub use memory::InMemoryFlash;

use anyhow::Result;

use crate::consts::{ERASED_BYTE, WORKING_BUFFER_SIZE};

/// Адрес внутри раздела (байтовое смещение от начала).
pub type Address = u32;

/// Интерфейс raw flash раздела.
///
/// Ошибки реализации движок не интерпретирует: они пробрасываются наружу как
/// Error::Storage без изменений.
pub trait FlashPartition {
    /// Размер сектора (единицы стирания) в байтах.
    fn sector_size_bytes(&self) -> usize;

    /// Количество секторов в разделе.
    fn sector_count(&self) -> usize;

    /// Гранулярность записи (адрес и длина записи кратны ей).
    fn alignment_bytes(&self) -> usize {
        1
    }

    /// Прочитать `buf.len()` байт начиная с `address`.
    fn read(&self, address: Address, buf: &mut [u8]) -> Result<()>;

    /// Записать `data` начиная с `address`. Целевые байты должны быть стёрты.
    fn write(&mut self, address: Address, data: &[u8]) -> Result<()>;

    /// Стереть `count` секторов начиная с `sector_index`.
    fn erase(&mut self, sector_index: usize, count: usize) -> Result<()>;

    fn size_bytes(&self) -> usize {
        self.sector_size_bytes() * self.sector_count()
    }

    /// Проверка «регион целиком стёрт» (все байты 0xFF). Читает фиксированным буфером.
    fn is_region_erased(&self, address: Address, len: usize) -> Result<bool> {
        let mut buf = [0u8; WORKING_BUFFER_SIZE];
        let mut off = 0usize;
        while off < len {
            let n = (len - off).min(WORKING_BUFFER_SIZE);
            self.read(address + off as Address, &mut buf[..n])?;
            if buf[..n].iter().any(|&b| b != ERASED_BYTE) {
                return Ok(false);
            }
            off += n;
        }
        Ok(true)
    }
}

impl<T: FlashPartition + ?Sized> FlashPartition for Box<T> {
    fn sector_size_bytes(&self) -> usize {
        (**self).sector_size_bytes()
    }

    fn sector_count(&self) -> usize {
        (**self).sector_count()
    }

    fn alignment_bytes(&self) -> usize {
        (**self).alignment_bytes()
    }

    fn read(&self, address: Address, buf: &mut [u8]) -> Result<()> {
        (**self).read(address, buf)
    }

    fn write(&mut self, address: Address, data: &[u8]) -> Result<()> {
        (**self).write(address, data)
    }

    fn erase(&mut self, sector_index: usize, count: usize) -> Result<()> {
        (**self).erase(sector_index, count)
    }
}
