use anyhow::Result;
use oorandom::Rand64;
use std::collections::HashMap;

use FlashKVS::consts::DEFAULT_MAGIC;
use FlashKVS::{Crc32c, EntryFormat, GcOnWrite, InMemoryFlash, KeyValueStore, Options};

type Store = KeyValueStore<InMemoryFlash, 64, 8, 1>;

fn new_store(flash: &InMemoryFlash, opts: Options) -> Store {
    KeyValueStore::new(
        flash.clone(),
        vec![EntryFormat::new(DEFAULT_MAGIC, Crc32c::new())],
        opts,
    )
}

fn check_model(store: &mut Store, model: &HashMap<Vec<u8>, Option<Vec<u8>>>) -> Result<()> {
    let mut buf = vec![0u8; 128];
    for (k, v) in model {
        match (v, store.get(k, &mut buf)) {
            (Some(want), Ok(n)) => assert_eq!(&buf[..n], want.as_slice(), "key {:?}", k),
            (None, Err(e)) => assert!(e.is_not_found(), "key {:?}: {}", k, e),
            (want, got) => panic!("key {:?}: model {:?}, store {:?}", k, want, got),
        }
    }
    let live = model.values().filter(|v| v.is_some()).count();
    assert_eq!(store.size(), live);
    Ok(())
}

#[test]
fn stress_churn_put_delete_gc() -> Result<()> {
    let flash = InMemoryFlash::new(1024, 8);
    let opts = Options::default().with_gc_on_write(GcOnWrite::AsNeeded);
    let mut store = new_store(&flash, opts);
    store.init()?;

    // Модель «истинного» состояния
    let mut model: HashMap<Vec<u8>, Option<Vec<u8>>> = HashMap::new();

    // Детерминированный генератор
    let mut rng = Rand64::new(0xA1B2_C3D4_E5F6_7788);

    let total_keys = 40u64;
    let ops = 3_000usize;

    for step in 0..ops {
        let k = format!("key-{:02}", rng.rand_range(0..total_keys)).into_bytes();
        if rng.rand_range(0..100) < 70 {
            let len = rng.rand_range(0..61) as usize;
            let byte = rng.rand_range(0..256) as u8;
            let v = vec![byte; len];
            store.put(&k, &v)?;
            model.insert(k, Some(v));
        } else {
            let live = matches!(model.get(&k), Some(Some(_)));
            match store.delete(&k) {
                Ok(()) => {
                    assert!(live, "deleted a key the model does not have");
                    model.insert(k, None);
                }
                Err(e) => assert!(e.is_not_found() && !live, "step {}: {}", step, e),
            }
        }

        if step % 500 == 499 {
            check_model(&mut store, &model)?;
        }
    }
    check_model(&mut store, &model)?;
    assert!(flash.total_erase_count() > 0);
    assert!(!store.error_detected());

    // «перезагрузка»: индекс восстанавливается сканом
    drop(store);
    let mut reopened = new_store(&flash, opts);
    reopened.init()?;
    check_model(&mut reopened, &model)?;

    reopened.heavy_maintenance()?;
    assert_eq!(reopened.get_storage_stats().reclaimable_bytes, 0);
    assert_eq!(reopened.total_entries_with_deleted(), reopened.size());
    check_model(&mut reopened, &model)?;
    Ok(())
}
