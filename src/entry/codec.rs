//! encode/decode записи в буфере RAM.

use crate::consts::{
    ENTRY_HEADER_SIZE, MAX_KEY_LENGTH, MAX_VALUE_LENGTH, TOMBSTONE_VALUE_LEN,
};
use crate::error::{Error, Result};

use super::{align_up, alignment_code, find_format, EntryFormat, EntryHeader};

/// Результат decode_entry: поля ссылаются на исходный буфер.
#[derive(Debug, Clone, Copy)]
pub struct DecodedEntry<'a> {
    pub header: EntryHeader,
    pub format_index: usize,
    pub key: &'a [u8],
    pub value: &'a [u8],
    pub deleted: bool,
}

impl DecodedEntry<'_> {
    #[inline]
    pub fn size(&self) -> usize {
        self.header.size()
    }
}

/// Проверить размеры ключа/значения до кодирования.
pub fn validate_key_value(key: &[u8], value: Option<&[u8]>) -> Result<()> {
    if key.is_empty() {
        return Err(Error::invalid("key must not be empty"));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(Error::invalid(format!(
            "key length {} exceeds {}",
            key.len(),
            MAX_KEY_LENGTH
        )));
    }
    if let Some(v) = value {
        if v.len() > MAX_VALUE_LENGTH {
            return Err(Error::invalid(format!(
                "value length {} exceeds {}",
                v.len(),
                MAX_VALUE_LENGTH
            )));
        }
    }
    Ok(())
}

/// Размер записи на flash для ключа/значения при данном выравнивании.
#[inline]
pub fn encoded_size(key_len: usize, value_len: usize, alignment: usize) -> usize {
    align_up(ENTRY_HEADER_SIZE + key_len + value_len, alignment)
}

/// Закодировать запись (value = None: tombstone).
///
/// Padding заполняется нулями; checksum покрывает всю выровненную запись.
pub fn encode_entry(
    key: &[u8],
    value: Option<&[u8]>,
    transaction_id: u32,
    format: &mut EntryFormat,
    alignment: usize,
) -> Result<Vec<u8>> {
    validate_key_value(key, value)?;
    let code = alignment_code(alignment)?;

    let value_bytes = value.unwrap_or(&[]);
    let value_length = match value {
        Some(v) => v.len() as u16,
        None => TOMBSTONE_VALUE_LEN,
    };
    let size = encoded_size(key.len(), value_bytes.len(), alignment);

    let mut header = EntryHeader {
        magic: format.magic,
        checksum: 0,
        alignment_code: code,
        key_length: key.len() as u8,
        value_length,
        transaction_id,
    };

    let mut buf = vec![0u8; size];
    header.write(&mut buf)?;
    let k_off = ENTRY_HEADER_SIZE;
    buf[k_off..k_off + key.len()].copy_from_slice(key);
    let v_off = k_off + key.len();
    buf[v_off..v_off + value_bytes.len()].copy_from_slice(value_bytes);

    format.checksum_reset();
    format.checksum_update(&buf);
    header.checksum = format.checksum_finish();
    header.write(&mut buf)?;
    Ok(buf)
}

/// Декодировать и проверить запись из буфера.
///
/// DataLoss: неизвестная магия, пустой ключ, выход за буфер, несовпадение чексуммы.
pub fn decode_entry<'a>(bytes: &'a [u8], formats: &mut [EntryFormat]) -> Result<DecodedEntry<'a>> {
    let header = EntryHeader::read(bytes)?;
    let format_index = find_format(formats, header.magic)
        .ok_or_else(|| Error::data_loss(format!("unknown entry magic 0x{:08x}", header.magic)))?;
    if header.key_length == 0 {
        return Err(Error::data_loss("entry has zero key length"));
    }
    let size = header.size();
    if size > bytes.len() {
        return Err(Error::data_loss(format!(
            "entry size {} overruns buffer of {} bytes",
            size,
            bytes.len()
        )));
    }

    let format = &mut formats[format_index];
    format.checksum_reset();
    format.checksum_update(&header.to_bytes_for_checksum());
    format.checksum_update(&bytes[ENTRY_HEADER_SIZE..size]);
    let expected = format.checksum_finish();
    if expected != header.checksum {
        return Err(Error::data_loss(format!(
            "entry checksum mismatch: stored 0x{:08x}, computed 0x{:08x}",
            header.checksum, expected
        )));
    }

    let k_off = ENTRY_HEADER_SIZE;
    let v_off = k_off + header.key_len();
    Ok(DecodedEntry {
        header,
        format_index,
        key: &bytes[k_off..v_off],
        value: &bytes[v_off..v_off + header.value_len()],
        deleted: header.deleted(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Crc32c;
    use crate::consts::DEFAULT_MAGIC;

    fn formats() -> Vec<EntryFormat> {
        vec![EntryFormat::new(DEFAULT_MAGIC, Crc32c::new())]
    }

    #[test]
    fn small_entry_fits_32_bytes() {
        let mut f = formats();
        let buf = encode_entry(b"key1", Some(b"value1"), 1, &mut f[0], 16).unwrap();
        assert_eq!(buf.len(), 32);
        assert_eq!(&buf[16..20], b"key1");
        assert_eq!(&buf[20..26], b"value1");
        assert!(buf[26..].iter().all(|&b| b == 0));

        let d = decode_entry(&buf, &mut f).unwrap();
        assert_eq!(d.key, b"key1");
        assert_eq!(d.value, b"value1");
        assert_eq!(d.header.transaction_id, 1);
        assert!(!d.deleted);
    }

    #[test]
    fn tombstone_has_no_value_bytes() {
        let mut f = formats();
        let buf = encode_entry(b"gone", None, 7, &mut f[0], 16).unwrap();
        assert_eq!(buf.len(), 32);
        let d = decode_entry(&buf, &mut f).unwrap();
        assert!(d.deleted);
        assert!(d.value.is_empty());
        assert_eq!(d.header.value_length, TOMBSTONE_VALUE_LEN);
    }

    #[test]
    fn larger_alignment_pads_entry() {
        let mut f = formats();
        let buf = encode_entry(b"k", Some(b"v"), 1, &mut f[0], 64).unwrap();
        assert_eq!(buf.len(), 64);
        assert_eq!(decode_entry(&buf, &mut f).unwrap().header.alignment(), 64);
    }

    #[test]
    fn checksum_covers_padding() {
        let mut f = formats();
        let mut buf = encode_entry(b"key1", Some(b"value1"), 1, &mut f[0], 16).unwrap();
        buf[31] = 1;
        assert!(decode_entry(&buf, &mut f).unwrap_err().is_data_loss());
    }

    #[test]
    fn unknown_magic_is_data_loss() {
        let mut f = formats();
        let buf = encode_entry(b"key1", Some(b"v"), 1, &mut f[0], 16).unwrap();
        let mut other = vec![EntryFormat::new(0x1234_5678, Crc32c::new())];
        assert!(decode_entry(&buf, &mut other).unwrap_err().is_data_loss());
    }

    #[test]
    fn format_without_checksum_stores_zero() {
        let mut f = vec![EntryFormat::without_checksum(0xC0FF_EE00)];
        let buf = encode_entry(b"a", Some(b"b"), 3, &mut f[0], 16).unwrap();
        assert_eq!(EntryHeader::read(&buf).unwrap().checksum, 0);
        decode_entry(&buf, &mut f).unwrap();
    }

    #[test]
    fn rejects_bad_lengths() {
        let mut f = formats();
        assert!(matches!(
            encode_entry(b"", Some(b"v"), 1, &mut f[0], 16),
            Err(Error::InvalidArgument(_))
        ));
        let long_key = vec![b'k'; 256];
        assert!(matches!(
            encode_entry(&long_key, Some(b"v"), 1, &mut f[0], 16),
            Err(Error::InvalidArgument(_))
        ));
        let long_value = vec![0u8; 0xFFFF];
        assert!(matches!(
            encode_entry(b"k", Some(long_value.as_slice()), 1, &mut f[0], 16),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn truncated_buffer_is_data_loss() {
        let mut f = formats();
        let buf = encode_entry(b"key1", Some(b"value1"), 1, &mut f[0], 16).unwrap();
        assert!(decode_entry(&buf[..24], &mut f).unwrap_err().is_data_loss());
    }
}
