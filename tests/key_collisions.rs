use anyhow::Result;
use std::collections::HashMap;

use FlashKVS::checksum::key_hash;
use FlashKVS::consts::DEFAULT_MAGIC;
use FlashKVS::entry::encode_entry;
use FlashKVS::{Crc32c, EntryFormat, Error, ErrorRecovery, InMemoryFlash, KeyValueStore, Options};

type Store = KeyValueStore<InMemoryFlash, 16, 4, 1>;

fn new_store(flash: &InMemoryFlash, opts: Options) -> Store {
    KeyValueStore::new(
        flash.clone(),
        vec![EntryFormat::new(DEFAULT_MAGIC, Crc32c::new())],
        opts,
    )
}

/// Два разных ключа с одинаковым 32-битным hash (перебор, парадокс дней рождения).
fn colliding_keys() -> (Vec<u8>, Vec<u8>) {
    let mut seen: HashMap<u32, Vec<u8>> = HashMap::new();
    for n in 0u64.. {
        let key = format!("c{:x}", n).into_bytes();
        if let Some(prev) = seen.insert(key_hash(&key), key.clone()) {
            return (prev, key);
        }
    }
    unreachable!()
}

#[test]
fn colliding_key_is_rejected() -> Result<()> {
    let (k1, k2) = colliding_keys();
    assert_ne!(k1, k2);
    assert_eq!(key_hash(&k1), key_hash(&k2));

    let flash = InMemoryFlash::new(512, 4);
    let mut store = new_store(&flash, Options::default());
    store.init()?;
    store.put(&k1, b"first")?;

    assert!(matches!(store.put(&k2, b"second"), Err(Error::AlreadyExists)));
    let mut buf = [0u8; 16];
    assert!(store.get(&k2, &mut buf).unwrap_err().is_not_found());
    assert!(store.delete(&k2).unwrap_err().is_not_found());

    let n = store.get(&k1, &mut buf)?;
    assert_eq!(&buf[..n], b"first");
    assert_eq!(store.size(), 1);
    Ok(())
}

#[test]
fn collision_found_by_scan_is_data_loss() -> Result<()> {
    let (k1, k2) = colliding_keys();
    let flash = InMemoryFlash::new(512, 4);
    let mut fmt = EntryFormat::new(DEFAULT_MAGIC, Crc32c::new());
    let e1 = encode_entry(&k1, Some(b"one"), 1, &mut fmt, 16)?;
    let e2 = encode_entry(&k2, Some(b"two"), 2, &mut fmt, 16)?;
    flash.write_raw(0, &e1);
    flash.write_raw(e1.len() as u32, &e2);

    let mut store = new_store(&flash, Options::default().with_recovery(ErrorRecovery::Manual));
    let err = store.init().unwrap_err();
    assert!(err.is_data_loss(), "{}", err);
    assert_eq!(store.size(), 1);

    let mut buf = [0u8; 16];
    let n = store.get(&k1, &mut buf)?;
    assert_eq!(&buf[..n], b"one");
    assert!(store.get(&k2, &mut buf).unwrap_err().is_not_found());
    Ok(())
}
