//! Replication deltas.
//!
//! Two forms: swarm `FKV_DELTA` frames (compressed WAL records with a
//! CRC-16, shipped between nodes) and in-process sequence deltas
//! (everything written after a given put sequence).

use crate::errors::{FkvError, Result};
use crate::record;
use crate::trie::{Entry, EntryType, Fkv};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use kolibri_core::digits::DELTA_PREFIX_DIGITS;
use kolibri_core::hash::crc16;
use kolibri_core::DeltaPrefix;
use kolibri_swarm::codec::{FkvDeltaPayload, Frame};
use std::io::{Read, Write};

/// The wire prefix field spends two digits on the length, leaving ten for
/// the prefix itself.
pub const MAX_PREFIX_DIGITS: usize = DELTA_PREFIX_DIGITS - 2;

const MAX_WIRE_ENTRY_COUNT: usize = 999;
const MAX_WIRE_COMPRESSED_SIZE: usize = 999_999;

/// Encode a raw-digit prefix into the 12-digit wire field:
/// `len(2) | digits | zero padding`.
pub fn encode_prefix(prefix: &[u8]) -> Result<DeltaPrefix> {
    if prefix.len() > MAX_PREFIX_DIGITS {
        return Err(FkvError::PrefixTooLong {
            max: MAX_PREFIX_DIGITS,
        });
    }
    let mut ascii = [b'0'; DELTA_PREFIX_DIGITS];
    ascii[0] = b'0' + (prefix.len() / 10) as u8;
    ascii[1] = b'0' + (prefix.len() % 10) as u8;
    for (i, &digit) in prefix.iter().enumerate() {
        if digit > 9 {
            return Err(FkvError::InvalidKeyDigit {
                byte: digit,
                offset: i,
            });
        }
        ascii[2 + i] = b'0' + digit;
    }
    DeltaPrefix::from_ascii(&ascii).map_err(|_| FkvError::PrefixTooLong {
        max: MAX_PREFIX_DIGITS,
    })
}

/// Decode the 12-digit wire field back into raw prefix digits.
pub fn decode_prefix(prefix: &DeltaPrefix) -> Result<Vec<u8>> {
    let ascii = prefix.as_bytes();
    let len = ((ascii[0] - b'0') * 10 + (ascii[1] - b'0')) as usize;
    if len > MAX_PREFIX_DIGITS {
        return Err(FkvError::PrefixTooLong {
            max: MAX_PREFIX_DIGITS,
        });
    }
    Ok(ascii[2..2 + len].iter().map(|&b| b - b'0').collect())
}

/// Build a `FKV_DELTA` frame covering every entry under `prefix`.
pub fn build_delta(fkv: &Fkv, prefix: &[u8]) -> Result<Frame> {
    let encoded_prefix = encode_prefix(prefix)?;
    let entries = fkv.get_prefix(prefix, 0)?;
    if entries.len() > MAX_WIRE_ENTRY_COUNT {
        return Err(FkvError::DeltaTooLarge(format!(
            "{} entries exceed the 3-digit count field",
            entries.len()
        )));
    }

    let mut raw = Vec::with_capacity(
        entries
            .iter()
            .map(|e| record::encoded_len(&e.key, &e.value))
            .sum(),
    );
    for entry in &entries {
        record::encode_put(&mut raw, entry.entry_type.as_u8(), &entry.key, &entry.value);
    }
    if raw.len() > u32::MAX as usize {
        return Err(FkvError::DeltaTooLarge("raw payload exceeds 32 bits".into()));
    }
    let checksum = crc16(&raw);

    if raw.is_empty() {
        return Ok(Frame::FkvDelta(FkvDeltaPayload {
            prefix: encoded_prefix,
            entry_count: 0,
            compressed_size: 0,
            checksum,
            raw_size: 0,
            data: Vec::new(),
        }));
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(&raw)?;
    let compressed = encoder.finish()?;
    if compressed.len() > MAX_WIRE_COMPRESSED_SIZE {
        return Err(FkvError::DeltaTooLarge(format!(
            "{} compressed bytes exceed the 6-digit size field",
            compressed.len()
        )));
    }

    Ok(Frame::FkvDelta(FkvDeltaPayload {
        prefix: encoded_prefix,
        entry_count: entries.len() as u16,
        compressed_size: compressed.len() as u32,
        checksum,
        raw_size: raw.len() as u32,
        data: compressed,
    }))
}

/// Verify and apply a `FKV_DELTA` payload. Nothing is written unless the
/// whole batch decodes and validates.
pub fn apply_delta(fkv: &Fkv, payload: &FkvDeltaPayload) -> Result<()> {
    if payload.compressed_size as usize != payload.data.len() {
        return Err(FkvError::SizeMismatch {
            expected: payload.compressed_size as u64,
            actual: payload.data.len() as u64,
        });
    }
    if payload.raw_size == 0 {
        return Ok(());
    }

    let mut raw = Vec::with_capacity(payload.raw_size as usize);
    ZlibDecoder::new(payload.data.as_slice()).read_to_end(&mut raw)?;
    if raw.len() as u64 != u64::from(payload.raw_size) {
        return Err(FkvError::SizeMismatch {
            expected: u64::from(payload.raw_size),
            actual: raw.len() as u64,
        });
    }
    let actual = crc16(&raw);
    if actual != payload.checksum {
        return Err(FkvError::ChecksumMismatch {
            expected: u32::from(payload.checksum),
            actual: u32::from(actual),
        });
    }

    // Decode and validate the whole batch before touching the store
    let mut batch: Vec<(u8, Vec<u8>, Vec<u8>)> = Vec::new();
    let decoded = record::decode_records(&raw, true, |record| {
        EntryType::from_u8(record.entry_type).ok_or_else(|| {
            FkvError::CorruptRecord(format!("unknown entry type {}", record.entry_type))
        })?;
        batch.push((record.entry_type, record.key.to_vec(), record.value.to_vec()));
        Ok(())
    })?;
    if decoded != usize::from(payload.entry_count) {
        return Err(FkvError::RecordCountMismatch {
            expected: u64::from(payload.entry_count),
            actual: decoded as u64,
        });
    }

    for (entry_type, key, value) in batch {
        let entry_type = EntryType::from_u8(entry_type).ok_or_else(|| {
            FkvError::CorruptRecord(format!("unknown entry type {entry_type}"))
        })?;
        fkv.put(&key, &value, entry_type)?;
    }
    Ok(())
}

/// One entry in a sequence delta
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeltaEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub entry_type: EntryType,
    pub priority: u64,
    pub sequence: u64,
}

/// Entries written after a given put sequence, with integrity metadata
#[derive(Clone, Debug, Default)]
pub struct Delta {
    pub entries: Vec<DeltaEntry>,
    pub min_sequence: u64,
    pub max_sequence: u64,
    pub total_bytes: u64,
    pub checksum: u16,
}

impl Delta {
    /// CRC-16 over the concatenated WAL-record encoding of the entries.
    pub fn compute_checksum(&self) -> u16 {
        let mut raw = Vec::new();
        for entry in &self.entries {
            record::encode_put(&mut raw, entry.entry_type.as_u8(), &entry.key, &entry.value);
        }
        crc16(&raw)
    }
}

impl Fkv {
    /// Collect every entry written after `since_sequence`.
    pub fn export_delta(&self, since_sequence: u64) -> Result<Delta> {
        let entries: Vec<Entry> = self.get_prefix(&[], 0)?;
        let mut delta = Delta::default();
        for entry in entries {
            if entry.sequence <= since_sequence {
                continue;
            }
            delta.total_bytes += record::encoded_len(&entry.key, &entry.value) as u64;
            if delta.entries.is_empty() || entry.sequence < delta.min_sequence {
                delta.min_sequence = entry.sequence;
            }
            delta.max_sequence = delta.max_sequence.max(entry.sequence);
            delta.entries.push(DeltaEntry {
                key: entry.key,
                value: entry.value,
                entry_type: entry.entry_type,
                priority: entry.priority,
                sequence: entry.sequence,
            });
        }
        delta.entries.sort_by_key(|e| e.sequence);
        delta.checksum = delta.compute_checksum();
        Ok(delta)
    }

    /// Apply a sequence delta after verifying its checksum.
    pub fn apply_sequence_delta(&self, delta: &Delta) -> Result<()> {
        let actual = delta.compute_checksum();
        if actual != delta.checksum {
            return Err(FkvError::ChecksumMismatch {
                expected: u32::from(delta.checksum),
                actual: u32::from(actual),
            });
        }
        for entry in &delta.entries {
            self.put_scored(&entry.key, &entry.value, entry.entry_type, entry.priority)?;
        }
        Ok(())
    }
}
