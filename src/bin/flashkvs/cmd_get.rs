use anyhow::Result;
use std::path::Path;

use FlashKVS::Error;

use super::cli::ImageArgs;
use super::store::open_store;
use super::util::{display_text, to_hex, write_all};

pub fn exec<const R: usize>(image: &ImageArgs, key: &str, out: Option<&Path>) -> Result<()> {
    let mut store = open_store::<R>(image)?;
    let size = match store.value_size(key.as_bytes()) {
        Ok(n) => n,
        Err(Error::NotFound) => {
            println!("NOT FOUND '{}'", key);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let mut v = vec![0u8; size];
    let n = store.get(key.as_bytes(), &mut v)?;
    v.truncate(n);

    match out {
        Some(out_path) => {
            write_all(out_path, &v)?;
            println!(
                "FOUND '{}': {} B -> wrote to {}",
                key,
                v.len(),
                out_path.display()
            );
        }
        None => {
            println!("FOUND '{}': {} B", key, v.len());
            println!("text: {}", display_text(&v));
            println!("hex:  {}", to_hex(&v[..v.len().min(64)]));
        }
    }
    Ok(())
}
