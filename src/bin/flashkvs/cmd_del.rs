use anyhow::Result;

use FlashKVS::Error;

use super::cli::ImageArgs;
use super::store::open_store;

pub fn exec<const R: usize>(image: &ImageArgs, key: &str) -> Result<()> {
    let mut store = open_store::<R>(image)?;
    match store.delete(key.as_bytes()) {
        Ok(()) => println!("DELETED '{}'", key),
        Err(Error::NotFound) => println!("NOT FOUND '{}' (nothing to delete)", key),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
