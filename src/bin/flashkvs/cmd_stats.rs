use anyhow::Result;

use super::cli::ImageArgs;
use super::store::open_store;

pub fn exec<const R: usize>(image: &ImageArgs, json: bool) -> Result<()> {
    let store = open_store::<R>(image)?;
    store.print_stats(json)?;
    Ok(())
}
