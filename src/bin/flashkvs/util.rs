use anyhow::{anyhow, Context, Result};
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::Path;

/// Значение из аргумента: "-" (stdin), "@file", "hex:..", иначе литерал UTF-8.
pub fn decode_value_arg(arg: &str) -> Result<Vec<u8>> {
    if arg == "-" {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf)?;
        return Ok(buf);
    }
    if let Some(p) = arg.strip_prefix('@') {
        return read_all(Path::new(p));
    }
    if let Some(hx) = arg.strip_prefix("hex:") {
        return decode_hex(hx);
    }
    Ok(arg.as_bytes().to_vec())
}

pub fn decode_hex(s: &str) -> Result<Vec<u8>> {
    let s = s.trim();
    if s.len() % 2 != 0 {
        return Err(anyhow!("hex string must have even length"));
    }
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len() / 2);
    for (i, pair) in bytes.chunks(2).enumerate() {
        let h = (pair[0] as char)
            .to_digit(16)
            .ok_or_else(|| anyhow!("invalid hex at pos {}", i * 2))?;
        let l = (pair[1] as char)
            .to_digit(16)
            .ok_or_else(|| anyhow!("invalid hex at pos {}", i * 2 + 1))?;
        out.push(((h << 4) | l) as u8);
    }
    Ok(out)
}

pub fn display_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => format!("(binary {} B)", bytes.len()),
    }
}

pub fn to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

pub fn read_all(p: &Path) -> Result<Vec<u8>> {
    let mut f = OpenOptions::new()
        .read(true)
        .open(p)
        .with_context(|| format!("open {}", p.display()))?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    Ok(buf)
}

pub fn write_all(p: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = p.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut f = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(p)
        .with_context(|| format!("create {}", p.display()))?;
    f.write_all(data)?;
    f.sync_all()?;
    Ok(())
}
