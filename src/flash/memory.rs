//! In-memory flash partition for tests and host-side tooling.
//!
//! Эмулирует NOR flash в RAM:
//! - стирание посекторно (0xFF), счётчики стираний на сектор;
//! - запись только в стёртые байты и с учётом alignment (иначе ошибка);
//! - счётчик операций записи (проверка идемпотентности put);
//! - инъекция отказов записи/чтения (после N успешных операций, M раз подряд);
//! - имитация потери питания: следующая запись пишет половину данных и падает;
//! - порча байтов в обход проверок (corrupt_byte / write_raw).
//!
//! Хэндл дешёвый в клонировании: клоны разделяют одно и то же состояние, поэтому тест
//! может отдать одну копию в KeyValueStore и портить/инспектировать flash через другую.

use anyhow::{anyhow, Result};
use std::cell::RefCell;
use std::rc::Rc;

use super::{Address, FlashPartition};
use crate::consts::ERASED_BYTE;

/// Запланированный отказ: пропустить `delay` операций, затем упасть `times` раз.
#[derive(Debug, Clone, Copy, Default)]
struct InjectedFailure {
    delay: usize,
    times: usize,
}

impl InjectedFailure {
    /// true: текущая операция должна завершиться ошибкой.
    fn tick(&mut self) -> bool {
        if self.times == 0 {
            return false;
        }
        if self.delay > 0 {
            self.delay -= 1;
            return false;
        }
        self.times -= 1;
        true
    }
}

#[derive(Debug)]
struct FlashState {
    bytes: Vec<u8>,
    sector_size: usize,
    sector_count: usize,
    alignment: usize,
    write_count: usize,
    erase_counts: Vec<u32>,
    write_failure: InjectedFailure,
    read_failure: InjectedFailure,
    power_loss: bool,
}

#[derive(Debug, Clone)]
pub struct InMemoryFlash {
    state: Rc<RefCell<FlashState>>,
}

impl InMemoryFlash {
    /// Новый стёртый раздел `sector_count` x `sector_size` (alignment = 1).
    pub fn new(sector_size: usize, sector_count: usize) -> Self {
        Self::with_alignment(sector_size, sector_count, 1)
    }

    pub fn with_alignment(sector_size: usize, sector_count: usize, alignment: usize) -> Self {
        let alignment = alignment.max(1);
        Self {
            state: Rc::new(RefCell::new(FlashState {
                bytes: vec![ERASED_BYTE; sector_size * sector_count],
                sector_size,
                sector_count,
                alignment,
                write_count: 0,
                erase_counts: vec![0; sector_count],
                write_failure: InjectedFailure::default(),
                read_failure: InjectedFailure::default(),
                power_loss: false,
            })),
        }
    }

    // ---------- inspection ----------

    /// Копия содержимого [address, address+len).
    pub fn contents(&self, address: Address, len: usize) -> Vec<u8> {
        let st = self.state.borrow();
        let a = address as usize;
        st.bytes[a..a + len].to_vec()
    }

    /// Число успешно начатых операций write() с момента создания.
    pub fn write_count(&self) -> usize {
        self.state.borrow().write_count
    }

    pub fn erase_count(&self, sector_index: usize) -> u32 {
        self.state.borrow().erase_counts[sector_index]
    }

    pub fn total_erase_count(&self) -> u32 {
        self.state.borrow().erase_counts.iter().sum()
    }

    // ---------- fault injection ----------

    /// Пропустить `delay` записей, затем провалить следующие `times`.
    pub fn inject_write_error(&self, delay: usize, times: usize) {
        self.state.borrow_mut().write_failure = InjectedFailure { delay, times };
    }

    /// Пропустить `delay` чтений, затем провалить следующие `times`.
    pub fn inject_read_error(&self, delay: usize, times: usize) {
        self.state.borrow_mut().read_failure = InjectedFailure { delay, times };
    }

    /// Следующая запись запишет только первую половину данных и вернёт ошибку.
    pub fn simulate_power_loss(&self) {
        self.state.borrow_mut().power_loss = true;
    }

    pub fn clear_faults(&self) {
        let mut st = self.state.borrow_mut();
        st.write_failure = InjectedFailure::default();
        st.read_failure = InjectedFailure::default();
        st.power_loss = false;
    }

    /// Инвертировать биты байта по адресу (порча в обход семантики flash).
    pub fn corrupt_byte(&self, address: Address) {
        let mut st = self.state.borrow_mut();
        st.bytes[address as usize] ^= 0xA5;
    }

    /// Записать байты как есть (без проверки стёртости, без счётчиков): подготовка образов.
    pub fn write_raw(&self, address: Address, data: &[u8]) {
        let mut st = self.state.borrow_mut();
        let a = address as usize;
        st.bytes[a..a + data.len()].copy_from_slice(data);
    }
}

fn check_range(st: &FlashState, address: Address, len: usize) -> Result<()> {
    let end = (address as usize)
        .checked_add(len)
        .ok_or_else(|| anyhow!("flash address overflow"))?;
    if end > st.bytes.len() {
        return Err(anyhow!(
            "flash access out of bounds: 0x{:x}+{} > {}",
            address,
            len,
            st.bytes.len()
        ));
    }
    Ok(())
}

impl FlashPartition for InMemoryFlash {
    fn sector_size_bytes(&self) -> usize {
        self.state.borrow().sector_size
    }

    fn sector_count(&self) -> usize {
        self.state.borrow().sector_count
    }

    fn alignment_bytes(&self) -> usize {
        self.state.borrow().alignment
    }

    fn read(&self, address: Address, buf: &mut [u8]) -> Result<()> {
        let mut st = self.state.borrow_mut();
        check_range(&st, address, buf.len())?;
        if st.read_failure.tick() {
            return Err(anyhow!("injected flash read failure at 0x{:x}", address));
        }
        let a = address as usize;
        buf.copy_from_slice(&st.bytes[a..a + buf.len()]);
        Ok(())
    }

    fn write(&mut self, address: Address, data: &[u8]) -> Result<()> {
        let mut st = self.state.borrow_mut();
        check_range(&st, address, data.len())?;
        if address as usize % st.alignment != 0 || data.len() % st.alignment != 0 {
            return Err(anyhow!(
                "unaligned flash write at 0x{:x} len {} (alignment {})",
                address,
                data.len(),
                st.alignment
            ));
        }
        let a = address as usize;
        if st.bytes[a..a + data.len()].iter().any(|&b| b != ERASED_BYTE) {
            return Err(anyhow!("write to non-erased flash at 0x{:x}", address));
        }
        if st.write_failure.tick() {
            return Err(anyhow!("injected flash write failure at 0x{:x}", address));
        }
        st.write_count += 1;

        if st.power_loss {
            st.power_loss = false;
            let half = data.len() / 2;
            st.bytes[a..a + half].copy_from_slice(&data[..half]);
            return Err(anyhow!("power lost during flash write at 0x{:x}", address));
        }

        st.bytes[a..a + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn erase(&mut self, sector_index: usize, count: usize) -> Result<()> {
        let mut st = self.state.borrow_mut();
        if sector_index + count > st.sector_count {
            return Err(anyhow!(
                "erase out of bounds: sectors {}..{} of {}",
                sector_index,
                sector_index + count,
                st.sector_count
            ));
        }
        let ss = st.sector_size;
        for s in sector_index..sector_index + count {
            for b in &mut st.bytes[s * ss..(s + 1) * ss] {
                *b = ERASED_BYTE;
            }
            st.erase_counts[s] += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_requires_erased_bytes() {
        let mut f = InMemoryFlash::new(256, 2);
        f.write(0, b"abcd").unwrap();
        assert!(f.write(0, b"x").is_err());
        f.erase(0, 1).unwrap();
        f.write(0, b"x").unwrap();
        assert_eq!(f.erase_count(0), 1);
        assert_eq!(f.write_count(), 2);
    }

    #[test]
    fn clones_share_state() {
        let mut a = InMemoryFlash::new(128, 1);
        let b = a.clone();
        a.write(16, b"zz").unwrap();
        assert_eq!(b.contents(16, 2), b"zz".to_vec());
    }

    #[test]
    fn injected_write_failure_after_delay() {
        let mut f = InMemoryFlash::new(128, 1);
        f.inject_write_error(1, 1);
        f.write(0, b"a").unwrap();
        assert!(f.write(1, b"b").is_err());
        f.write(2, b"c").unwrap();
    }

    #[test]
    fn power_loss_writes_half() {
        let mut f = InMemoryFlash::new(128, 1);
        f.simulate_power_loss();
        assert!(f.write(0, b"abcd").is_err());
        assert_eq!(f.contents(0, 4), vec![b'a', b'b', 0xFF, 0xFF]);
    }
}
