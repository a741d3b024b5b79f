use anyhow::{Context, Result};

use super::cli::ImageArgs;
use super::store::open_store;

/// CLI: обслуживание раздела.
///
/// Примеры:
///   flashkvs maint --path ./flash.img
///   flashkvs maint --path ./flash.img --heavy
///   flashkvs maint --path ./flash.img --partial
pub fn exec<const R: usize>(image: &ImageArgs, heavy: bool, partial: bool) -> Result<()> {
    let mut store = open_store::<R>(image)?;
    let before = store.get_storage_stats();

    let kind = if partial {
        store.partial_maintenance().context("partial maintenance")?;
        "partial"
    } else if heavy {
        store.heavy_maintenance().context("heavy maintenance")?;
        "heavy"
    } else {
        store.full_maintenance().context("full maintenance")?;
        "full"
    };

    let after = store.get_storage_stats();
    println!("Maintenance ({}):", kind);
    println!(
        "  reclaimable_bytes      = {} -> {}",
        before.reclaimable_bytes, after.reclaimable_bytes
    );
    println!(
        "  writable_bytes         = {} -> {}",
        before.writable_bytes, after.writable_bytes
    );
    println!("  in_use_bytes           = {}", after.in_use_bytes);
    println!("  keys (incl. deleted)   = {}", store.total_entries_with_deleted());
    println!("  corrupt_sectors_fixed  = {}", after.corrupt_sectors_recovered);
    println!(
        "  copies_restored        = {}",
        after.missing_redundant_entries_recovered
    );
    Ok(())
}
