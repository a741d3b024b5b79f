use anyhow::{anyhow, Result};

use FlashKVS::FileFlash;

use super::cli::ImageArgs;
use super::store::open_store;

pub fn exec<const R: usize>(image: &ImageArgs, sectors: usize, force: bool) -> Result<()> {
    if image.path.exists() && !force {
        let store = open_store::<R>(image)?;
        println!(
            "Partition image already exists at {} ({} sectors x {} B, {} keys); use --force to recreate",
            image.path.display(),
            store.sector_count(),
            image.sector_size,
            store.size()
        );
        return Ok(());
    }
    if sectors < 2 {
        return Err(anyhow!("at least 2 sectors are required, got {}", sectors));
    }

    // создаём стёртый образ, затем проверяем геометрию init'ом
    drop(FileFlash::create(&image.path, image.sector_size, sectors)?);
    let store = open_store::<R>(image)?;
    println!(
        "Initialized partition image at {} ({} sectors x {} B, redundancy {})",
        image.path.display(),
        store.sector_count(),
        image.sector_size,
        store.redundancy()
    );
    Ok(())
}
