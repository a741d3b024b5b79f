use anyhow::Result;

use FlashKVS::consts::DEFAULT_MAGIC;
use FlashKVS::entry::{decode_entry, encode_entry};
use FlashKVS::{Crc32c, EntryFormat, ErrorRecovery, InMemoryFlash, KeyValueStore, Options};

const SS: usize = 512;

type Store = KeyValueStore<InMemoryFlash, 16, 4, 1>;

fn primary() -> EntryFormat {
    EntryFormat::new(DEFAULT_MAGIC, Crc32c::new())
}

fn get_vec(store: &mut Store, key: &[u8]) -> FlashKVS::Result<Vec<u8>> {
    let mut v = vec![0u8; 64];
    let n = store.get(key, &mut v)?;
    v.truncate(n);
    Ok(v)
}

/// Раздел с двумя записями в начале сектора 0: key1 -> value1 и k2 -> value2.
fn two_entry_flash() -> Result<InMemoryFlash> {
    let flash = InMemoryFlash::new(SS, 4);
    let mut fmt = primary();
    let e1 = encode_entry(b"key1", Some(b"value1"), 1, &mut fmt, 16)?;
    let e2 = encode_entry(b"k2", Some(b"value2"), 2, &mut fmt, 16)?;
    assert_eq!(e1.len(), 32);
    assert_eq!(e2.len(), 32);
    flash.write_raw(0, &e1);
    flash.write_raw(32, &e2);
    Ok(flash)
}

#[test]
fn layout_is_little_endian_and_padded() -> Result<()> {
    let mut fmt = primary();
    let bytes = encode_entry(b"key1", Some(b"value1"), 0x0102_0304, &mut fmt, 16)?;

    assert_eq!(&bytes[0..4], &DEFAULT_MAGIC.to_le_bytes());
    assert_eq!(bytes[8], 0, "alignment code for 16 bytes");
    assert_eq!(bytes[9], 4, "key length");
    assert_eq!(&bytes[10..12], &6u16.to_le_bytes());
    assert_eq!(&bytes[12..16], &[0x04, 0x03, 0x02, 0x01]);
    assert_eq!(&bytes[16..20], b"key1");
    assert_eq!(&bytes[20..26], b"value1");
    assert!(bytes[26..].iter().all(|&b| b == 0), "padding must be zero");

    let mut formats = vec![primary()];
    let d = decode_entry(&bytes, &mut formats)?;
    assert_eq!(d.key, b"key1");
    assert_eq!(d.value, b"value1");
    assert!(!d.deleted);

    let tomb = encode_entry(b"key1", None, 9, &mut fmt, 16)?;
    assert_eq!(tomb.len(), 32);
    assert_eq!(&tomb[10..12], &[0xFF, 0xFF]);
    assert!(decode_entry(&tomb, &mut formats)?.deleted);
    Ok(())
}

#[test]
fn two_valid_entries_are_indexed() -> Result<()> {
    let flash = two_entry_flash()?;
    let mut store = Store::new(flash.clone(), vec![primary()], Options::default());
    store.init()?;

    assert_eq!(get_vec(&mut store, b"key1")?, b"value1".to_vec());
    assert_eq!(get_vec(&mut store, b"k2")?, b"value2".to_vec());
    assert_eq!(store.transaction_count(), 2);

    let st = store.get_storage_stats();
    assert_eq!(st.in_use_bytes, 64);
    assert_eq!(st.reclaimable_bytes, 0);
    // один пустой сектор зарезервирован под GC
    assert_eq!(st.writable_bytes, SS * 4 - 64 - SS);

    // новая запись дописывается за существующими
    store.put(b"k3", b"value3")?;
    assert_eq!(flash.contents(64, 4), DEFAULT_MAGIC.to_le_bytes().to_vec());
    Ok(())
}

#[test]
fn corrupted_first_entry_is_skipped() -> Result<()> {
    let flash = two_entry_flash()?;
    flash.corrupt_byte(0);

    let opts = Options::default().with_recovery(ErrorRecovery::Manual);
    let mut store = Store::new(flash.clone(), vec![primary()], opts);
    let err = store.init().unwrap_err();
    assert!(err.is_data_loss(), "{}", err);
    assert!(store.initialized());
    assert!(store.error_detected());

    assert!(get_vec(&mut store, b"key1").unwrap_err().is_not_found());
    assert_eq!(get_vec(&mut store, b"k2")?, b"value2".to_vec());

    let st = store.get_storage_stats();
    assert_eq!(st.in_use_bytes, 32);
    assert_eq!(st.reclaimable_bytes, SS - 32);
    assert!(store.sector_stats()[0].corrupt);

    // ремонт: сектор 0 собран, k2 перенесён
    store.full_maintenance()?;
    assert!(!store.error_detected());
    let st = store.get_storage_stats();
    assert_eq!(st.in_use_bytes, 32);
    assert_eq!(st.reclaimable_bytes, 0);
    assert_eq!(st.corrupt_sectors_recovered, 1);
    assert_eq!(get_vec(&mut store, b"k2")?, b"value2".to_vec());
    assert!(flash.erase_count(0) >= 1);
    Ok(())
}

#[test]
fn lazy_recovery_repairs_during_init() -> Result<()> {
    let flash = two_entry_flash()?;
    flash.corrupt_byte(0);

    let mut store = Store::new(flash.clone(), vec![primary()], Options::default());
    // порча всё равно сообщается, даже если ремонт прошёл
    assert!(store.init().unwrap_err().is_data_loss());
    assert!(!store.error_detected());

    let st = store.get_storage_stats();
    assert_eq!(st.corrupt_sectors_recovered, 1);
    assert_eq!(st.reclaimable_bytes, 0);
    assert_eq!(st.in_use_bytes, 32);
    assert_eq!(get_vec(&mut store, b"k2")?, b"value2".to_vec());

    // второй init видит уже чистый раздел
    let mut again = Store::new(flash, vec![primary()], Options::default());
    again.init()?;
    assert_eq!(again.size(), 1);
    Ok(())
}

#[test]
fn format_without_checksum_writes_zero() -> Result<()> {
    let flash = InMemoryFlash::new(SS, 4);
    let mut store = Store::new(
        flash.clone(),
        vec![EntryFormat::without_checksum(DEFAULT_MAGIC)],
        Options::default(),
    );
    store.init()?;
    store.put(b"plain", b"text")?;

    let sector = (0..4)
        .find(|s| flash.contents((s * SS) as u32, 4) == DEFAULT_MAGIC.to_le_bytes().to_vec())
        .expect("entry must be somewhere");
    let base = (sector * SS) as u32;
    assert_eq!(flash.contents(base + 4, 4), vec![0, 0, 0, 0]);
    assert_eq!(get_vec(&mut store, b"plain")?, b"text".to_vec());
    Ok(())
}
