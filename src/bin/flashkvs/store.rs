use anyhow::{Context, Result};
use log::warn;

use FlashKVS::checksum::Crc32c;
use FlashKVS::consts::DEFAULT_MAGIC;
use FlashKVS::{EntryFormat, FileFlash, KeyValueStore, Options};

use super::cli::ImageArgs;

/// Ёмкости индекса/таблицы секторов для образов, с которыми работает CLI.
pub const MAX_ENTRIES: usize = 1024;
pub const MAX_SECTORS: usize = 256;

pub type Store<const R: usize> = KeyValueStore<FileFlash, MAX_ENTRIES, MAX_SECTORS, R>;

/// Вызвать generic-команду с REDUNDANCY, выбранным в рантайме.
macro_rules! by_redundancy {
    ($r:expr, $m:ident :: $f:ident ( $($arg:expr),* )) => {
        match $r {
            1 => $m::$f::<1>($($arg),*),
            2 => $m::$f::<2>($($arg),*),
            3 => $m::$f::<3>($($arg),*),
            other => Err(anyhow::anyhow!("unsupported redundancy {} (expected 1..=3)", other)),
        }
    };
}
pub(crate) use by_redundancy;

/// Открыть образ (эксклюзивно) и выполнить init store.
///
/// DataLoss из init не фатален: store пригоден к работе, печатаем предупреждение.
pub fn open_store<const R: usize>(image: &ImageArgs) -> Result<Store<R>> {
    let flash = FileFlash::open(&image.path, image.sector_size)?;
    let formats = vec![EntryFormat::new(DEFAULT_MAGIC, Crc32c::new())];
    let mut store = Store::<R>::new(flash, formats, Options::from_env());
    match store.init() {
        Ok(()) => {}
        Err(e) if e.is_data_loss() && store.initialized() => {
            warn!("{}: {}", image.path.display(), e);
        }
        Err(e) => {
            return Err(e).with_context(|| format!("init store on {}", image.path.display()));
        }
    }
    Ok(store)
}
