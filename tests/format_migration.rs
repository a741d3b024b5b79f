use anyhow::Result;

use FlashKVS::consts::DEFAULT_MAGIC;
use FlashKVS::entry::encode_entry;
use FlashKVS::{Crc32, Crc32c, EntryFormat, InMemoryFlash, KeyValueStore, Options};

const LEGACY_MAGIC: u32 = 0x3047_454C;
const SS: usize = 512;

type Store = KeyValueStore<InMemoryFlash, 16, 4, 1>;

fn formats() -> Vec<EntryFormat> {
    vec![
        EntryFormat::new(DEFAULT_MAGIC, Crc32c::new()),
        EntryFormat::new(LEGACY_MAGIC, Crc32::new()),
    ]
}

fn get_vec(store: &mut Store, key: &[u8]) -> FlashKVS::Result<Vec<u8>> {
    let mut v = vec![0u8; 32];
    let n = store.get(key, &mut v)?;
    v.truncate(n);
    Ok(v)
}

#[test]
fn legacy_entries_are_readable_and_migrated() -> Result<()> {
    let flash = InMemoryFlash::new(SS, 4);
    let mut legacy = EntryFormat::new(LEGACY_MAGIC, Crc32::new());
    let e1 = encode_entry(b"old", Some(b"legacy"), 1, &mut legacy, 16)?;
    let e2 = encode_entry(b"gone", None, 2, &mut legacy, 16)?;
    flash.write_raw(0, &e1);
    flash.write_raw(32, &e2);

    let mut store = Store::new(flash.clone(), formats(), Options::default());
    store.init()?;
    assert_eq!(get_vec(&mut store, b"old")?, b"legacy".to_vec());
    assert!(get_vec(&mut store, b"gone").unwrap_err().is_not_found());

    // новые записи: только основным форматом
    store.put(b"new", b"fresh")?;
    assert_eq!(flash.contents(64, 4), DEFAULT_MAGIC.to_le_bytes().to_vec());

    store.full_maintenance()?;
    assert_eq!(store.transaction_count(), 5);
    assert_eq!(store.get_storage_stats().reclaimable_bytes, 0);
    assert_eq!(get_vec(&mut store, b"old")?, b"legacy".to_vec());

    // после миграции раздел читается без legacy формата
    drop(store);
    let primary_only = vec![EntryFormat::new(DEFAULT_MAGIC, Crc32c::new())];
    let mut again = Store::new(flash, primary_only, Options::default());
    again.init()?;
    assert_eq!(again.size(), 2);
    assert_eq!(again.total_entries_with_deleted(), 3);
    assert_eq!(get_vec(&mut again, b"old")?, b"legacy".to_vec());
    assert_eq!(get_vec(&mut again, b"new")?, b"fresh".to_vec());
    Ok(())
}

#[test]
fn unknown_magic_is_not_accepted() -> Result<()> {
    let flash = InMemoryFlash::new(SS, 4);
    let mut legacy = EntryFormat::new(LEGACY_MAGIC, Crc32::new());
    let e1 = encode_entry(b"old", Some(b"legacy"), 1, &mut legacy, 16)?;
    flash.write_raw(0, &e1);

    let primary_only = vec![EntryFormat::new(DEFAULT_MAGIC, Crc32c::new())];
    let mut store = Store::new(flash, primary_only, Options::default());
    assert!(store.init().unwrap_err().is_data_loss());
    assert!(get_vec(&mut store, b"old").unwrap_err().is_not_found());
    assert_eq!(store.get_storage_stats().corrupt_sectors_recovered, 1);
    Ok(())
}
