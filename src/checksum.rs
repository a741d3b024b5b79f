//! checksum: подключаемые алгоритмы чексуммы записи + hash ключа для индекса.
//!
//! Движок видит алгоритм только через трейт ChecksumAlgorithm (reset/update/finish)
//! и хранит в заголовке записи младшие 4 байта digest (LE). Реализации:
//! - Crc32c         : CRC32C (Castagnoli), crc32c crate;
//! - Crc32          : CRC32 (IEEE), crc32fast;
//! - XxHash32Checksum: xxHash32(seed), twox-hash.
//!
//! key_hash(): 32-битный xxHash32(seed=0) ключа; в RAM-индексе хранится только он.

use byteorder::{ByteOrder, LittleEndian};
use std::hash::Hasher;

/// Подключаемый алгоритм чексуммы (внешний коллаборатор движка).
pub trait ChecksumAlgorithm {
    /// Сбросить состояние перед новым расчётом.
    fn reset(&mut self);
    /// Добавить очередной фрагмент данных.
    fn update(&mut self, data: &[u8]);
    /// Завершить расчёт и вернуть digest (не короче 1 байта).
    fn finish(&mut self) -> &[u8];
}

/// Значение поля checksum из digest: первые (до 4) байт digest как u32 LE.
#[inline]
pub fn digest_to_u32(digest: &[u8]) -> u32 {
    let mut b = [0u8; 4];
    let n = digest.len().min(4);
    b[..n].copy_from_slice(&digest[..n]);
    LittleEndian::read_u32(&b)
}

// ---------- CRC32C (Castagnoli) ----------

#[derive(Debug, Default, Clone)]
pub struct Crc32c {
    state: u32,
    digest: [u8; 4],
}

impl Crc32c {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChecksumAlgorithm for Crc32c {
    fn reset(&mut self) {
        self.state = 0;
    }

    fn update(&mut self, data: &[u8]) {
        self.state = crc32c::crc32c_append(self.state, data);
    }

    fn finish(&mut self) -> &[u8] {
        LittleEndian::write_u32(&mut self.digest, self.state);
        &self.digest
    }
}

// ---------- CRC32 (IEEE) ----------

#[derive(Debug, Default, Clone)]
pub struct Crc32 {
    hasher: crc32fast::Hasher,
    digest: [u8; 4],
}

impl Crc32 {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChecksumAlgorithm for Crc32 {
    fn reset(&mut self) {
        self.hasher.reset();
    }

    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn finish(&mut self) -> &[u8] {
        let crc = self.hasher.clone().finalize();
        LittleEndian::write_u32(&mut self.digest, crc);
        &self.digest
    }
}

// ---------- xxHash32 ----------

pub struct XxHash32Checksum {
    seed: u32,
    hasher: twox_hash::XxHash32,
    digest: [u8; 4],
}

impl XxHash32Checksum {
    pub fn with_seed(seed: u32) -> Self {
        Self {
            seed,
            hasher: twox_hash::XxHash32::with_seed(seed),
            digest: [0u8; 4],
        }
    }
}

impl Default for XxHash32Checksum {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl ChecksumAlgorithm for XxHash32Checksum {
    fn reset(&mut self) {
        self.hasher = twox_hash::XxHash32::with_seed(self.seed);
    }

    fn update(&mut self, data: &[u8]) {
        self.hasher.write(data);
    }

    fn finish(&mut self) -> &[u8] {
        LittleEndian::write_u32(&mut self.digest, self.hasher.finish() as u32);
        &self.digest
    }
}

// ---------- key hash ----------

/// 32-битный hash ключа для RAM-индекса (xxHash32, seed=0).
#[inline]
pub fn key_hash(key: &[u8]) -> u32 {
    let mut h = twox_hash::XxHash32::with_seed(0);
    h.write(key);
    h.finish() as u32
}
