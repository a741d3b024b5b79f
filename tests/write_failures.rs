use anyhow::Result;

use FlashKVS::consts::DEFAULT_MAGIC;
use FlashKVS::{Crc32c, EntryFormat, Error, ErrorRecovery, InMemoryFlash, KeyValueStore, Options};

type Store = KeyValueStore<InMemoryFlash, 16, 4, 1>;

fn new_store(flash: &InMemoryFlash, opts: Options) -> Store {
    KeyValueStore::new(
        flash.clone(),
        vec![EntryFormat::new(DEFAULT_MAGIC, Crc32c::new())],
        opts,
    )
}

fn get_vec(store: &mut Store, key: &[u8]) -> FlashKVS::Result<Vec<u8>> {
    let mut v = vec![0u8; 32];
    let n = store.get(key, &mut v)?;
    v.truncate(n);
    Ok(v)
}

#[test]
fn identical_put_does_not_touch_flash() -> Result<()> {
    let flash = InMemoryFlash::new(512, 4);
    let mut store = new_store(&flash, Options::default());
    store.init()?;

    store.put(b"k", b"same")?;
    let writes = flash.write_count();
    let txn = store.transaction_count();

    store.put(b"k", b"same")?;
    assert_eq!(flash.write_count(), writes);
    assert_eq!(store.transaction_count(), txn);

    store.put(b"k", b"different")?;
    assert_eq!(flash.write_count(), writes + 1);
    assert_eq!(store.transaction_count(), txn + 1);

    // после delete то же значение снова пишется
    store.delete(b"k")?;
    store.put(b"k", b"different")?;
    assert_eq!(flash.write_count(), writes + 3);
    Ok(())
}

#[test]
fn failed_write_keeps_previous_value() -> Result<()> {
    let flash = InMemoryFlash::new(512, 4);
    let mut store = new_store(&flash, Options::default());
    store.init()?;
    store.put(b"k", b"v1")?;

    flash.inject_write_error(0, 1);
    let err = store.put(b"k", b"v2").unwrap_err();
    assert!(matches!(err, Error::Storage(_)), "{}", err);
    assert!(store.error_detected());
    assert_eq!(get_vec(&mut store, b"k")?, b"v1".to_vec());

    // следующая запись проходит (lazy ремонт перед записью)
    store.put(b"k", b"v3")?;
    assert!(!store.error_detected());
    assert_eq!(get_vec(&mut store, b"k")?, b"v3".to_vec());

    // стёртая дыра посреди сектора видна при следующем init как порча
    drop(store);
    let mut again = new_store(&flash, Options::default());
    assert!(again.init().unwrap_err().is_data_loss());
    assert_eq!(get_vec(&mut again, b"k")?, b"v3".to_vec());
    assert_eq!(again.get_storage_stats().corrupt_sectors_recovered, 1);
    Ok(())
}

#[test]
fn power_loss_mid_write() -> Result<()> {
    let flash = InMemoryFlash::new(512, 4);
    let mut store = new_store(&flash, Options::default().with_recovery(ErrorRecovery::Manual));
    store.init()?;
    store.put(b"k", b"v1")?;

    flash.simulate_power_loss();
    assert!(store.put(b"k", b"v2").is_err());
    assert_eq!(get_vec(&mut store, b"k")?, b"v1".to_vec());

    // «перезагрузка»: полузаписанная версия отбрасывается
    drop(store);
    let mut rebooted = new_store(&flash, Options::default().with_recovery(ErrorRecovery::Manual));
    let err = rebooted.init().unwrap_err();
    assert!(err.is_data_loss(), "{}", err);
    assert_eq!(get_vec(&mut rebooted, b"k")?, b"v1".to_vec());

    rebooted.full_maintenance()?;
    assert!(!rebooted.error_detected());
    rebooted.put(b"k", b"v4")?;
    assert_eq!(get_vec(&mut rebooted, b"k")?, b"v4".to_vec());
    Ok(())
}

#[test]
fn read_errors_are_propagated() -> Result<()> {
    let flash = InMemoryFlash::new(512, 4);
    let mut store = new_store(&flash, Options::default());
    store.init()?;
    store.put(b"k", b"v1")?;

    flash.inject_read_error(0, 1);
    let err = get_vec(&mut store, b"k").unwrap_err();
    assert!(matches!(err, Error::Storage(_)), "{}", err);
    assert_eq!(get_vec(&mut store, b"k")?, b"v1".to_vec());

    flash.inject_read_error(0, 1);
    let mut again = new_store(&flash, Options::default());
    assert!(matches!(again.init(), Err(Error::Storage(_))));
    assert!(!again.initialized());
    Ok(())
}
