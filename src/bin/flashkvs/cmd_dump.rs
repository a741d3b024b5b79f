use anyhow::Result;
use serde_json::json;

use super::cli::ImageArgs;
use super::store::open_store;
use super::util::{display_text, to_hex};

pub fn exec<const R: usize>(image: &ImageArgs, json: bool) -> Result<()> {
    let mut store = open_store::<R>(image)?;

    let mut acc: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    store.for_each(|k, v| acc.push((k.to_vec(), v.to_vec())))?;
    acc.sort();

    if json {
        let items: Vec<_> = acc
            .iter()
            .map(|(k, v)| {
                json!({
                    "key": display_text(k),
                    "key_hex": to_hex(k),
                    "value_hex": to_hex(v),
                    "value_len": v.len(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string(&items)?);
        return Ok(());
    }

    for (k, v) in &acc {
        println!(
            "key='{}' ({} B) -> value '{}' ({} B)",
            display_text(k),
            k.len(),
            display_text(v),
            v.len()
        );
    }
    println!("{} keys", acc.len());
    Ok(())
}
