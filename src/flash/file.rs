//! File-backed flash partition (образ раздела в обычном файле).
//!
//! Используется CLI и хост-тестами: образ можно снять с устройства или прошить обратно.
//! - Геометрия: sector_size задаётся снаружи, sector_count = len(file) / sector_size.
//! - Семантика flash соблюдается: запись только в стёртые (0xFF) байты, erase заполняет 0xFF.
//! - Эксклюзивная блокировка (fs2) на время жизни хэндла: один KeyValueStore на раздел.
//!   Lock is released on Drop.

use anyhow::{anyhow, Context, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::{Address, FlashPartition};
use crate::consts::ERASED_BYTE;

#[derive(Debug)]
pub struct FileFlash {
    file: File,
    path: PathBuf,
    sector_size: usize,
    sector_count: usize,
    alignment: usize,
    sync_writes: bool,
}

impl FileFlash {
    /// Создать новый стёртый образ `sector_count` x `sector_size` (перезаписывает файл).
    pub fn create(path: &Path, sector_size: usize, sector_count: usize) -> Result<Self> {
        if sector_size == 0 || sector_count == 0 {
            return Err(anyhow!("flash geometry must be non-zero"));
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create dir {}", parent.display()))?;
            }
        }
        {
            let mut f = OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(path)
                .with_context(|| format!("create flash image {}", path.display()))?;
            let sector = vec![ERASED_BYTE; sector_size];
            for _ in 0..sector_count {
                f.write_all(&sector)?;
            }
            f.sync_all()?;
        }
        Self::open(path, sector_size)
    }

    /// Открыть существующий образ с эксклюзивной блокировкой.
    pub fn open(path: &Path, sector_size: usize) -> Result<Self> {
        if sector_size == 0 {
            return Err(anyhow!("sector size must be non-zero"));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("open flash image {}", path.display()))?;
        file.try_lock_exclusive()
            .with_context(|| format!("flash image {} is in use (lock_exclusive)", path.display()))?;

        let len = file.metadata()?.len() as usize;
        if len == 0 || len % sector_size != 0 {
            return Err(anyhow!(
                "flash image {} size {} is not a multiple of sector size {}",
                path.display(),
                len,
                sector_size
            ));
        }
        Ok(Self {
            file,
            path: path.to_path_buf(),
            sector_size,
            sector_count: len / sector_size,
            alignment: 1,
            sync_writes: false,
        })
    }

    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment.max(1);
        self
    }

    /// fsync после каждой записи/стирания (медленно, но переживает падение хоста).
    pub fn with_sync_writes(mut self, on: bool) -> Self {
        self.sync_writes = on;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_range(&self, address: Address, len: usize) -> Result<()> {
        let end = address as usize + len;
        if end > self.sector_size * self.sector_count {
            return Err(anyhow!(
                "flash access out of bounds: 0x{:x}+{} in {}",
                address,
                len,
                self.path.display()
            ));
        }
        Ok(())
    }

    fn write_at(&mut self, address: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(address))?;
        self.file.write_all(data)?;
        if self.sync_writes {
            self.file.sync_data()?;
        }
        Ok(())
    }
}

impl Drop for FileFlash {
    fn drop(&mut self) {
        let _ = self.file.flush();
        let _ = self.file.unlock();
    }
}

impl FlashPartition for FileFlash {
    fn sector_size_bytes(&self) -> usize {
        self.sector_size
    }

    fn sector_count(&self) -> usize {
        self.sector_count
    }

    fn alignment_bytes(&self) -> usize {
        self.alignment
    }

    fn read(&self, address: Address, buf: &mut [u8]) -> Result<()> {
        self.check_range(address, buf.len())?;
        // &File реализует Read + Seek: чтение без &mut self.
        let mut f = &self.file;
        f.seek(SeekFrom::Start(address as u64))?;
        f.read_exact(buf)
            .with_context(|| format!("read 0x{:x}+{} from {}", address, buf.len(), self.path.display()))?;
        Ok(())
    }

    fn write(&mut self, address: Address, data: &[u8]) -> Result<()> {
        self.check_range(address, data.len())?;
        if address as usize % self.alignment != 0 || data.len() % self.alignment != 0 {
            return Err(anyhow!(
                "unaligned flash write at 0x{:x} len {} (alignment {})",
                address,
                data.len(),
                self.alignment
            ));
        }
        if !self.is_region_erased(address, data.len())? {
            return Err(anyhow!("write to non-erased flash at 0x{:x}", address));
        }
        self.write_at(address as u64, data)
    }

    fn erase(&mut self, sector_index: usize, count: usize) -> Result<()> {
        if sector_index + count > self.sector_count {
            return Err(anyhow!(
                "erase out of bounds: sectors {}..{} of {}",
                sector_index,
                sector_index + count,
                self.sector_count
            ));
        }
        let blank = vec![ERASED_BYTE; self.sector_size];
        for s in sector_index..sector_index + count {
            self.write_at((s * self.sector_size) as u64, &blank)?;
        }
        Ok(())
    }
}
