//! WAL PUT record framing, shared by the log, delta files and replication.
//!
//! Record layout: `op(1) | type(1) | key_len(8 LE) | key | value_len(8 LE)
//! | value`.

use crate::errors::{FkvError, Result};

pub const OP_PUT: u8 = 1;

/// Fixed part of a record before the variable key/value bytes
pub const RECORD_HEADER_LEN: usize = 1 + 1 + 8 + 8;

/// Borrowed view of one decoded record
#[derive(Clone, Copy, Debug)]
pub struct RecordView<'a> {
    pub entry_type: u8,
    pub key: &'a [u8],
    pub value: &'a [u8],
}

/// Append one PUT record to `out`.
pub fn encode_put(out: &mut Vec<u8>, entry_type: u8, key: &[u8], value: &[u8]) {
    out.push(OP_PUT);
    out.push(entry_type);
    out.extend_from_slice(&(key.len() as u64).to_le_bytes());
    out.extend_from_slice(key);
    out.extend_from_slice(&(value.len() as u64).to_le_bytes());
    out.extend_from_slice(value);
}

/// Encoded size of one PUT record.
pub fn encoded_len(key: &[u8], value: &[u8]) -> usize {
    RECORD_HEADER_LEN + key.len() + value.len()
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

/// Decode every record in `buf`, invoking `apply` per record, and return
/// the record count.
///
/// With `strict` set, a partial trailing record is an error; otherwise
/// decoding stops there (a crash mid-append leaves exactly such a tail in
/// the WAL, and that put was never acknowledged).
pub fn decode_records(
    buf: &[u8],
    strict: bool,
    mut apply: impl FnMut(RecordView<'_>) -> Result<()>,
) -> Result<usize> {
    let mut offset = 0usize;
    let mut count = 0usize;
    while offset < buf.len() {
        if buf.len() - offset < RECORD_HEADER_LEN {
            if strict {
                return Err(FkvError::CorruptRecord(format!(
                    "truncated header at offset {offset}"
                )));
            }
            break;
        }
        let op = buf[offset];
        if op != OP_PUT {
            return Err(FkvError::CorruptRecord(format!(
                "unknown opcode {op} at offset {offset}"
            )));
        }
        let entry_type = buf[offset + 1];
        let key_len = read_u64(buf, offset + 2) as usize;
        let after_key = offset + 2 + 8;
        if key_len > buf.len().saturating_sub(after_key + 8) {
            if strict {
                return Err(FkvError::CorruptRecord(format!(
                    "key length {key_len} overruns buffer at offset {offset}"
                )));
            }
            break;
        }
        let key = &buf[after_key..after_key + key_len];
        let value_len = read_u64(buf, after_key + key_len) as usize;
        let after_value_len = after_key + key_len + 8;
        if value_len > buf.len() - after_value_len {
            if strict {
                return Err(FkvError::CorruptRecord(format!(
                    "value length {value_len} overruns buffer at offset {offset}"
                )));
            }
            break;
        }
        let value = &buf[after_value_len..after_value_len + value_len];
        apply(RecordView {
            entry_type,
            key,
            value,
        })?;
        offset = after_value_len + value_len;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut buf = Vec::new();
        encode_put(&mut buf, 0, &[1, 2, 3], &[4, 5]);
        encode_put(&mut buf, 1, &[9], &[9, 8, 7]);
        assert_eq!(buf.len(), encoded_len(&[1, 2, 3], &[4, 5]) + encoded_len(&[9], &[9, 8, 7]));

        let mut seen = Vec::new();
        let count = decode_records(&buf, true, |record| {
            seen.push((record.entry_type, record.key.to_vec(), record.value.to_vec()));
            Ok(())
        })
        .unwrap();
        assert_eq!(count, 2);
        assert_eq!(seen[0], (0, vec![1, 2, 3], vec![4, 5]));
        assert_eq!(seen[1], (1, vec![9], vec![9, 8, 7]));
    }

    #[test]
    fn test_strict_rejects_partial_tail() {
        let mut buf = Vec::new();
        encode_put(&mut buf, 0, &[1], &[2]);
        let full = buf.len();
        encode_put(&mut buf, 0, &[3], &[4]);
        buf.truncate(full + 5);

        assert!(decode_records(&buf, true, |_| Ok(())).is_err());
        // Lenient mode stops at the partial record
        let count = decode_records(&buf, false, |_| Ok(())).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_unknown_opcode_is_always_an_error() {
        let buf = vec![7u8; RECORD_HEADER_LEN];
        assert!(decode_records(&buf, false, |_| Ok(())).is_err());
    }
}
