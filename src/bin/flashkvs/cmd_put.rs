use anyhow::{anyhow, Context, Result};
use std::path::Path;

use super::cli::ImageArgs;
use super::store::open_store;
use super::util::{decode_value_arg, read_all};

pub fn exec<const R: usize>(
    image: &ImageArgs,
    key: &str,
    value: Option<&str>,
    value_file: Option<&Path>,
) -> Result<()> {
    let val_bytes = match (value, value_file) {
        (_, Some(p)) => read_all(p)?,
        (Some(s), None) => decode_value_arg(s)?,
        (None, None) => return Err(anyhow!("either --value or --value-file must be provided")),
    };

    let mut store = open_store::<R>(image)?;
    store
        .put(key.as_bytes(), &val_bytes)
        .with_context(|| format!("put '{}'", key))?;
    println!(
        "OK put: key='{}' ({} B), value={} B, transaction {}",
        key,
        key.len(),
        val_bytes.len(),
        store.transaction_count()
    );
    Ok(())
}
