use anyhow::Result;

use FlashKVS::consts::DEFAULT_MAGIC;
use FlashKVS::{Crc32c, EntryFormat, Error, InMemoryFlash, KeyValueStore, Options};

type Store = KeyValueStore<InMemoryFlash, 64, 8, 1>;

fn new_store(flash: &InMemoryFlash) -> Store {
    let formats = vec![EntryFormat::new(DEFAULT_MAGIC, Crc32c::new())];
    KeyValueStore::new(flash.clone(), formats, Options::default())
}

fn get_vec(store: &mut Store, key: &[u8]) -> FlashKVS::Result<Vec<u8>> {
    let n = store.value_size(key)?;
    let mut v = vec![0u8; n];
    let got = store.get(key, &mut v)?;
    v.truncate(got);
    Ok(v)
}

#[test]
fn smoke_init_put_get_delete_reopen() -> Result<()> {
    let flash = InMemoryFlash::new(512, 4);

    // 1) пустой раздел
    let mut store = new_store(&flash);
    store.init()?;
    assert!(store.initialized());
    assert!(store.empty());
    assert_eq!(store.max_size(), 64);
    assert_eq!(store.entry_alignment(), 16);

    // 2) put/get
    store.put(b"alpha", b"1")?;
    store.put(b"beta", b"second value")?;
    assert_eq!(get_vec(&mut store, b"alpha")?, b"1".to_vec());
    assert_eq!(get_vec(&mut store, b"beta")?, b"second value".to_vec());
    assert_eq!(store.size(), 2);

    // 3) overwrite
    store.put(b"alpha", b"updated")?;
    assert_eq!(get_vec(&mut store, b"alpha")?, b"updated".to_vec());
    assert_eq!(store.transaction_count(), 3);

    // 4) delete: tombstone остаётся в индексе
    store.delete(b"alpha")?;
    assert!(get_vec(&mut store, b"alpha").unwrap_err().is_not_found());
    assert!(store.delete(b"alpha").unwrap_err().is_not_found());
    assert!(store.delete(b"never").unwrap_err().is_not_found());
    assert_eq!(store.size(), 1);
    assert_eq!(store.total_entries_with_deleted(), 2);

    let keys = store.keys()?;
    assert_eq!(keys, vec![b"beta".to_vec()]);

    // 5) новый экземпляр поверх того же flash видит то же состояние
    drop(store);
    let mut reopened = new_store(&flash);
    reopened.init()?;
    assert!(!reopened.error_detected());
    assert_eq!(reopened.size(), 1);
    assert_eq!(reopened.total_entries_with_deleted(), 2);
    assert_eq!(reopened.transaction_count(), 4);
    assert!(get_vec(&mut reopened, b"alpha").unwrap_err().is_not_found());
    assert_eq!(get_vec(&mut reopened, b"beta")?, b"second value".to_vec());

    // 6) удалённый ключ можно записать снова
    reopened.put(b"alpha", b"again")?;
    assert_eq!(get_vec(&mut reopened, b"alpha")?, b"again".to_vec());
    assert_eq!(reopened.transaction_count(), 5);
    Ok(())
}

#[test]
fn operations_require_init() -> Result<()> {
    let flash = InMemoryFlash::new(512, 4);
    let mut store = new_store(&flash);
    assert!(!store.initialized());

    let mut buf = [0u8; 8];
    assert!(matches!(store.get(b"k", &mut buf), Err(Error::FailedPrecondition(_))));
    assert!(matches!(store.put(b"k", b"v"), Err(Error::FailedPrecondition(_))));
    assert!(matches!(store.delete(b"k"), Err(Error::FailedPrecondition(_))));
    assert!(matches!(store.full_maintenance(), Err(Error::FailedPrecondition(_))));
    assert_eq!(flash.write_count(), 0);
    Ok(())
}

#[test]
fn argument_validation() -> Result<()> {
    let flash = InMemoryFlash::new(512, 4);
    let mut store = new_store(&flash);
    store.init()?;

    assert!(matches!(store.put(b"", b"v"), Err(Error::InvalidArgument(_))));
    let long_key = vec![b'k'; 256];
    assert!(matches!(store.put(&long_key, b"v"), Err(Error::InvalidArgument(_))));
    // 255 байт ключа: предел, запись помещается в сектор
    let max_key = vec![b'k'; 255];
    store.put(&max_key, b"v")?;

    let too_big = vec![0u8; 512];
    assert!(matches!(store.put(b"big", &too_big), Err(Error::InvalidArgument(_))));
    // 16 + 3 + 493 = 512: ровно один сектор
    let fits = vec![7u8; 493];
    store.put(b"big", &fits)?;
    assert_eq!(get_vec(&mut store, b"big")?, fits);

    store.put(b"empty", b"")?;
    assert_eq!(store.value_size(b"empty")?, 0);
    assert_eq!(get_vec(&mut store, b"empty")?, Vec::<u8>::new());
    Ok(())
}

#[test]
fn partial_reads_and_small_buffers() -> Result<()> {
    let flash = InMemoryFlash::new(512, 4);
    let mut store = new_store(&flash);
    store.init()?;
    store.put(b"greeting", b"hello world")?;

    let mut small = [0u8; 4];
    let err = store.get(b"greeting", &mut small).unwrap_err();
    assert!(err.is_resource_exhausted(), "{}", err);
    assert_eq!(small, [0u8; 4], "buffer must stay untouched");

    let mut buf = [0u8; 16];
    let n = store.get_at(b"greeting", &mut buf, 6)?;
    assert_eq!(&buf[..n], b"world");

    assert_eq!(store.get_at(b"greeting", &mut buf, 11)?, 0);
    assert!(matches!(
        store.get_at(b"greeting", &mut buf, 12),
        Err(Error::InvalidArgument(_))
    ));

    let mut visited = Vec::new();
    store.for_each(|k, v| visited.push((k.to_vec(), v.to_vec())))?;
    assert_eq!(visited, vec![(b"greeting".to_vec(), b"hello world".to_vec())]);
    Ok(())
}
