//! Entry: запись, найденная на flash по адресу.
//!
//! Заголовок держится в RAM; ключ/значение читаются с flash по требованию,
//! чексумма проверяется потоково фиксированным буфером (без аллокации под всю запись).

use crate::consts::{ENTRY_HEADER_SIZE, WORKING_BUFFER_SIZE};
use crate::error::{Error, Result};
use crate::flash::{Address, FlashPartition};

use super::{find_format, EntryFormat, EntryHeader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub address: Address,
    pub header: EntryHeader,
    pub format_index: usize,
}

impl Entry {
    /// Прочитать и структурно проверить заголовок по адресу.
    ///
    /// `sector_end`: граница сектора: запись не может её пересекать.
    /// Ошибки flash пробрасываются как Storage, структурные: DataLoss.
    pub fn read<P: FlashPartition + ?Sized>(
        partition: &P,
        address: Address,
        formats: &[EntryFormat],
        sector_end: Address,
    ) -> Result<Self> {
        let mut hb = [0u8; ENTRY_HEADER_SIZE];
        partition.read(address, &mut hb)?;
        let header = EntryHeader::read(&hb)?;
        let format_index = find_format(formats, header.magic).ok_or_else(|| {
            Error::data_loss(format!(
                "unknown entry magic 0x{:08x} at 0x{:x}",
                header.magic, address
            ))
        })?;
        if header.key_length == 0 {
            return Err(Error::data_loss(format!("zero key length at 0x{:x}", address)));
        }
        let end = address as u64 + header.size() as u64;
        if end > sector_end as u64 {
            return Err(Error::data_loss(format!(
                "entry at 0x{:x} (size {}) crosses sector end 0x{:x}",
                address,
                header.size(),
                sector_end
            )));
        }
        Ok(Self {
            address,
            header,
            format_index,
        })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.header.size()
    }

    #[inline]
    pub fn next_address(&self) -> Address {
        self.address + self.size() as Address
    }

    #[inline]
    pub fn transaction_id(&self) -> u32 {
        self.header.transaction_id
    }

    #[inline]
    pub fn deleted(&self) -> bool {
        self.header.deleted()
    }

    #[inline]
    pub fn key_len(&self) -> usize {
        self.header.key_len()
    }

    #[inline]
    pub fn value_len(&self) -> usize {
        self.header.value_len()
    }

    #[inline]
    fn key_address(&self) -> Address {
        self.address + ENTRY_HEADER_SIZE as Address
    }

    #[inline]
    fn value_address(&self) -> Address {
        self.key_address() + self.key_len() as Address
    }

    pub fn read_key<P: FlashPartition + ?Sized>(&self, partition: &P) -> Result<Vec<u8>> {
        let mut key = vec![0u8; self.key_len()];
        partition.read(self.key_address(), &mut key)?;
        Ok(key)
    }

    /// Прочитать `buf.len()` байт значения начиная с `offset`.
    pub fn read_value<P: FlashPartition + ?Sized>(
        &self,
        partition: &P,
        buf: &mut [u8],
        offset: usize,
    ) -> Result<()> {
        if offset + buf.len() > self.value_len() {
            return Err(Error::invalid(format!(
                "value read {}+{} beyond value length {}",
                offset,
                buf.len(),
                self.value_len()
            )));
        }
        if buf.is_empty() {
            return Ok(());
        }
        partition.read(self.value_address() + offset as Address, buf)?;
        Ok(())
    }

    /// Вся запись как есть (включая padding): для переноса при GC/ремонте.
    pub fn read_raw<P: FlashPartition + ?Sized>(&self, partition: &P) -> Result<Vec<u8>> {
        let mut raw = vec![0u8; self.size()];
        partition.read(self.address, &mut raw)?;
        Ok(raw)
    }

    /// Потоковая проверка чексуммы записи на flash.
    pub fn verify_checksum<P: FlashPartition + ?Sized>(
        &self,
        partition: &P,
        format: &mut EntryFormat,
    ) -> Result<()> {
        format.checksum_reset();
        format.checksum_update(&self.header.to_bytes_for_checksum());

        let mut buf = [0u8; WORKING_BUFFER_SIZE];
        let mut addr = self.key_address();
        let mut left = self.size() - ENTRY_HEADER_SIZE;
        while left > 0 {
            let n = left.min(WORKING_BUFFER_SIZE);
            partition.read(addr, &mut buf[..n])?;
            format.checksum_update(&buf[..n]);
            addr += n as Address;
            left -= n;
        }

        let computed = format.checksum_finish();
        if computed != self.header.checksum {
            return Err(Error::data_loss(format!(
                "checksum mismatch at 0x{:x}: stored 0x{:08x}, computed 0x{:08x}",
                self.address, self.header.checksum, computed
            )));
        }
        Ok(())
    }

    /// Сравнить ключ на flash с `key` (сначала длина, затем байты).
    pub fn key_matches<P: FlashPartition + ?Sized>(&self, partition: &P, key: &[u8]) -> Result<bool> {
        if key.len() != self.key_len() {
            return Ok(false);
        }
        compare_region(partition, self.key_address(), key)
    }

    /// Сравнить значение на flash с `value` без копирования всего значения в RAM.
    pub fn value_matches<P: FlashPartition + ?Sized>(
        &self,
        partition: &P,
        value: &[u8],
    ) -> Result<bool> {
        if self.deleted() || value.len() != self.value_len() {
            return Ok(false);
        }
        compare_region(partition, self.value_address(), value)
    }
}

fn compare_region<P: FlashPartition + ?Sized>(
    partition: &P,
    address: Address,
    expected: &[u8],
) -> Result<bool> {
    let mut buf = [0u8; WORKING_BUFFER_SIZE];
    for (i, chunk) in expected.chunks(WORKING_BUFFER_SIZE).enumerate() {
        let a = address + (i * WORKING_BUFFER_SIZE) as Address;
        partition.read(a, &mut buf[..chunk.len()])?;
        if &buf[..chunk.len()] != chunk {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Crc32c;
    use crate::consts::DEFAULT_MAGIC;
    use crate::entry::encode_entry;
    use crate::flash::InMemoryFlash;

    #[test]
    fn streaming_verify_and_compare() {
        let mut formats = vec![EntryFormat::new(DEFAULT_MAGIC, Crc32c::new())];
        let value = vec![0x5Au8; 200];
        let raw = encode_entry(b"blob", Some(value.as_slice()), 9, &mut formats[0], 16).unwrap();
        let mut flash = InMemoryFlash::new(512, 2);
        flash.write(512, &raw).unwrap();

        let e = Entry::read(&flash, 512, &formats, 1024).unwrap();
        assert_eq!(e.size(), raw.len());
        assert_eq!(e.transaction_id(), 9);
        e.verify_checksum(&flash, &mut formats[0]).unwrap();
        assert!(e.key_matches(&flash, b"blob").unwrap());
        assert!(!e.key_matches(&flash, b"blob2").unwrap());
        assert!(e.value_matches(&flash, &value).unwrap());

        let mut part = [0u8; 10];
        e.read_value(&flash, &mut part, 190).unwrap();
        assert_eq!(part, [0x5A; 10]);

        flash.corrupt_byte(512 + 100);
        assert!(e.verify_checksum(&flash, &mut formats[0]).unwrap_err().is_data_loss());
    }

    #[test]
    fn entry_must_not_cross_sector_end() {
        let mut formats = vec![EntryFormat::new(DEFAULT_MAGIC, Crc32c::new())];
        let raw = encode_entry(b"k", Some(&[1u8; 40][..]), 1, &mut formats[0], 16).unwrap();
        let flash = InMemoryFlash::new(64, 2);
        flash.write_raw(32, &raw[..32]);
        assert!(Entry::read(&flash, 32, &formats, 64).unwrap_err().is_data_loss());
    }
}
