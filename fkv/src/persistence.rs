//! Durable log-then-apply with delta checkpoints.
//!
//! On disk: a WAL (`FKWL` header + PUT records), numbered delta files
//! `delta_<12 digits>.fkz` (`FKVD` header + zlib payload of WAL records)
//! and an optional gzip base snapshot `base.fkz`. Startup replays base,
//! then deltas in numeric order, then the WAL; a checkpoint promotes the
//! WAL payload into the next delta file and truncates the WAL back to its
//! header.

use crate::errors::{FkvError, Result};
use crate::record::{self, RecordView};
use flate2::read::GzDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const WAL_MAGIC: u32 = 0x464B_574C; // "FKWL"
const WAL_VERSION: u32 = 1;
const WAL_HEADER_LEN: u64 = 4 + 4;

const DELTA_MAGIC: u32 = 0x464B_5644; // "FKVD"
const DELTA_VERSION: u16 = 1;

const BASE_SNAPSHOT_NAME: &str = "base.fkz";
const DELTA_PREFIX: &str = "delta_";
const DELTA_SUFFIX: &str = ".fkz";
const DELTA_INDEX_DIGITS: usize = 12;

/// Where and how often to persist
#[derive(Clone, Debug)]
pub struct PersistenceConfig {
    pub wal_path: PathBuf,
    pub snapshot_dir: PathBuf,
    /// WAL records per automatic checkpoint; 0 disables auto-checkpointing
    pub snapshot_interval: usize,
}

impl PersistenceConfig {
    pub fn new(wal_path: impl Into<PathBuf>, snapshot_dir: impl Into<PathBuf>) -> Self {
        PersistenceConfig {
            wal_path: wal_path.into(),
            snapshot_dir: snapshot_dir.into(),
            snapshot_interval: 64,
        }
    }

    pub fn with_interval(mut self, snapshot_interval: usize) -> Self {
        self.snapshot_interval = snapshot_interval;
        self
    }
}

pub(crate) struct Persistence {
    config: PersistenceConfig,
    base_snapshot_path: PathBuf,
    wal: File,
    ops_since_checkpoint: usize,
    next_delta_seq: u64,
}

impl Persistence {
    /// Open the on-disk state and replay it through `apply`.
    pub(crate) fn start(
        config: PersistenceConfig,
        mut apply: impl FnMut(RecordView<'_>) -> Result<()>,
    ) -> Result<Self> {
        if let Some(parent) = config.wal_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::create_dir_all(&config.snapshot_dir)?;

        let base_snapshot_path = config.snapshot_dir.join(BASE_SNAPSHOT_NAME);
        let delta_files = collect_delta_files(&config.snapshot_dir)?;
        let next_delta_seq = delta_files.last().map(|(index, _)| index + 1).unwrap_or(0);

        let wal = open_wal(&config.wal_path)?;

        let mut persistence = Persistence {
            config,
            base_snapshot_path,
            wal,
            ops_since_checkpoint: 0,
            next_delta_seq,
        };

        replay_base_snapshot(&persistence.base_snapshot_path, &mut apply)?;
        for (_, path) in &delta_files {
            apply_delta_file(path, &mut apply)?;
        }
        let payload = persistence.read_wal_payload()?;
        let replayed = record::decode_records(&payload, false, &mut apply)?;
        persistence.ops_since_checkpoint = replayed;
        if replayed > 0 {
            debug!(records = replayed, "replayed WAL records");
        }
        persistence.wal.seek(SeekFrom::End(0))?;
        Ok(persistence)
    }

    pub(crate) fn wal_path(&self) -> &Path {
        &self.config.wal_path
    }

    pub(crate) fn base_snapshot_path(&self) -> &Path {
        &self.base_snapshot_path
    }

    /// Append one PUT record and flush it. Runs a checkpoint when the
    /// interval is reached.
    pub(crate) fn record_put(&mut self, entry_type: u8, key: &[u8], value: &[u8]) -> Result<()> {
        let mut buf = Vec::with_capacity(record::encoded_len(key, value));
        record::encode_put(&mut buf, entry_type, key, value);
        self.wal.seek(SeekFrom::End(0))?;
        self.wal.write_all(&buf)?;
        self.wal.flush()?;
        self.ops_since_checkpoint += 1;
        if self.config.snapshot_interval > 0
            && self.ops_since_checkpoint >= self.config.snapshot_interval
        {
            return self.force_checkpoint();
        }
        Ok(())
    }

    /// Promote the WAL payload into the next delta file and reset the WAL.
    pub(crate) fn force_checkpoint(&mut self) -> Result<()> {
        let payload = self.read_wal_payload()?;
        if payload.is_empty() {
            self.ops_since_checkpoint = 0;
            return Ok(());
        }
        let record_count = record::decode_records(&payload, true, |_| Ok(()))?;
        if record_count == 0 {
            self.ops_since_checkpoint = 0;
            return Ok(());
        }

        let crc = crc32fast::hash(&payload);
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(&payload)?;
        let compressed = encoder.finish()?;

        let delta_path = self.config.snapshot_dir.join(format!(
            "{DELTA_PREFIX}{:0width$}{DELTA_SUFFIX}",
            self.next_delta_seq,
            width = DELTA_INDEX_DIGITS
        ));
        if let Err(error) = write_delta_file(&delta_path, &payload, record_count, crc, &compressed)
        {
            // Leave no partial delta behind; the WAL still holds the data
            warn!(path = %delta_path.display(), %error, "checkpoint failed, removing partial delta");
            let _ = std::fs::remove_file(&delta_path);
            return Err(error);
        }
        self.next_delta_seq += 1;

        self.reset_wal()?;
        self.ops_since_checkpoint = 0;
        debug!(path = %delta_path.display(), records = record_count, "checkpoint complete");
        Ok(())
    }

    fn read_wal_payload(&mut self) -> Result<Vec<u8>> {
        self.wal.flush()?;
        self.wal.seek(SeekFrom::Start(0))?;
        read_wal_header(&mut self.wal)?;
        let mut payload = Vec::new();
        self.wal.read_to_end(&mut payload)?;
        Ok(payload)
    }

    fn reset_wal(&mut self) -> Result<()> {
        self.wal.set_len(WAL_HEADER_LEN)?;
        self.wal.seek(SeekFrom::End(0))?;
        self.wal.sync_all()?;
        Ok(())
    }
}

fn open_wal(path: &Path) -> Result<File> {
    let mut wal = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    let len = wal.metadata()?.len();
    if len < WAL_HEADER_LEN {
        wal.set_len(0)?;
        wal.seek(SeekFrom::Start(0))?;
        wal.write_all(&WAL_MAGIC.to_le_bytes())?;
        wal.write_all(&WAL_VERSION.to_le_bytes())?;
        wal.flush()?;
    } else {
        wal.seek(SeekFrom::Start(0))?;
        read_wal_header(&mut wal)?;
    }
    Ok(wal)
}

fn read_wal_header(wal: &mut File) -> Result<()> {
    let mut magic = [0u8; 4];
    let mut version = [0u8; 4];
    wal.read_exact(&mut magic)?;
    wal.read_exact(&mut version)?;
    if u32::from_le_bytes(magic) != WAL_MAGIC {
        return Err(FkvError::CorruptRecord("bad WAL magic".into()));
    }
    if u32::from_le_bytes(version) != WAL_VERSION {
        return Err(FkvError::CorruptRecord(format!(
            "unsupported WAL version {}",
            u32::from_le_bytes(version)
        )));
    }
    Ok(())
}

fn collect_delta_files(snapshot_dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut files = Vec::new();
    let entries = match std::fs::read_dir(snapshot_dir) {
        Ok(entries) => entries,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(error) => return Err(error.into()),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(middle) = name
            .strip_prefix(DELTA_PREFIX)
            .and_then(|rest| rest.strip_suffix(DELTA_SUFFIX))
        else {
            continue;
        };
        let Ok(index) = middle.parse::<u64>() else {
            continue;
        };
        files.push((index, entry.path()));
    }
    files.sort();
    Ok(files)
}

fn write_delta_file(
    path: &Path,
    payload: &[u8],
    record_count: usize,
    crc: u32,
    compressed: &[u8],
) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(&DELTA_MAGIC.to_le_bytes())?;
    file.write_all(&DELTA_VERSION.to_le_bytes())?;
    file.write_all(&(payload.len() as u64).to_le_bytes())?;
    file.write_all(&(record_count as u64).to_le_bytes())?;
    file.write_all(&crc.to_le_bytes())?;
    file.write_all(&(compressed.len() as u64).to_le_bytes())?;
    file.write_all(compressed)?;
    file.sync_all()?;
    Ok(())
}

fn apply_delta_file(
    path: &Path,
    apply: &mut impl FnMut(RecordView<'_>) -> Result<()>,
) -> Result<()> {
    let corrupt = |detail: String| FkvError::CorruptDelta {
        path: path.to_path_buf(),
        detail,
    };

    let mut file = File::open(path)?;
    let mut header = [0u8; 4 + 2 + 8 + 8 + 4 + 8];
    file.read_exact(&mut header)
        .map_err(|e| corrupt(format!("short header: {e}")))?;

    let magic = u32::from_le_bytes(header[0..4].try_into().unwrap_or_default());
    let version = u16::from_le_bytes(header[4..6].try_into().unwrap_or_default());
    let raw_size = u64::from_le_bytes(header[6..14].try_into().unwrap_or_default());
    let record_count = u64::from_le_bytes(header[14..22].try_into().unwrap_or_default());
    let crc_expected = u32::from_le_bytes(header[22..26].try_into().unwrap_or_default());
    let compressed_size = u64::from_le_bytes(header[26..34].try_into().unwrap_or_default());

    if magic != DELTA_MAGIC {
        return Err(corrupt("bad magic".into()));
    }
    if version != DELTA_VERSION {
        return Err(corrupt(format!("unsupported version {version}")));
    }

    let mut compressed = vec![0u8; compressed_size as usize];
    file.read_exact(&mut compressed)
        .map_err(|e| corrupt(format!("short payload: {e}")))?;

    let mut raw = Vec::with_capacity(raw_size as usize);
    flate2::read::ZlibDecoder::new(compressed.as_slice())
        .read_to_end(&mut raw)
        .map_err(|e| corrupt(format!("inflate failed: {e}")))?;
    if raw.len() as u64 != raw_size {
        return Err(FkvError::SizeMismatch {
            expected: raw_size,
            actual: raw.len() as u64,
        });
    }
    let crc_actual = crc32fast::hash(&raw);
    if crc_actual != crc_expected {
        return Err(FkvError::ChecksumMismatch {
            expected: crc_expected,
            actual: crc_actual,
        });
    }
    let applied = record::decode_records(&raw, true, apply)?;
    if applied as u64 != record_count {
        return Err(FkvError::RecordCountMismatch {
            expected: record_count,
            actual: applied as u64,
        });
    }
    Ok(())
}

fn replay_base_snapshot(
    path: &Path,
    apply: &mut impl FnMut(RecordView<'_>) -> Result<()>,
) -> Result<()> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(error) => return Err(error.into()),
    };
    let mut decoder = GzDecoder::new(file);
    let mut count_bytes = [0u8; 8];
    decoder
        .read_exact(&mut count_bytes)
        .map_err(|e| FkvError::CorruptSnapshot(format!("short entry count: {e}")))?;
    let count = u64::from_le_bytes(count_bytes);
    for _ in 0..count {
        let mut len_bytes = [0u8; 8];
        decoder.read_exact(&mut len_bytes)?;
        let key_len = u64::from_le_bytes(len_bytes) as usize;
        let mut key = vec![0u8; key_len];
        decoder.read_exact(&mut key)?;
        decoder.read_exact(&mut len_bytes)?;
        let value_len = u64::from_le_bytes(len_bytes) as usize;
        let mut value = vec![0u8; value_len];
        decoder.read_exact(&mut value)?;
        let mut type_byte = [0u8; 1];
        decoder.read_exact(&mut type_byte)?;
        apply(RecordView {
            entry_type: type_byte[0],
            key: &key,
            value: &value,
        })?;
    }
    Ok(())
}
