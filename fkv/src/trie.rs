//! The decimal-prefix trie store.
//!
//! Keys are sequences of raw digits (`0..=9`); each trie node has up to
//! ten children and optionally one entry, stored on the node whose path
//! spells the key. One store-wide mutex serialises every operation, and
//! WAL appends happen under that lock so log-then-apply ordering needs no
//! extra machinery.

use crate::errors::{FkvError, Result};
use crate::persistence::{Persistence, PersistenceConfig};
use crate::record::RecordView;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Default `get_prefix` result cap handed to callers (`fkv.top_k`)
pub const DEFAULT_TOP_K: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryType {
    Value = 0,
    Program = 1,
}

impl EntryType {
    pub fn from_u8(value: u8) -> Option<EntryType> {
        match value {
            0 => Some(EntryType::Value),
            1 => Some(EntryType::Program),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// An owned entry returned by `get_prefix`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub entry_type: EntryType,
    pub priority: u64,
    pub sequence: u64,
}

struct NodeEntry {
    key: Vec<u8>,
    value: Vec<u8>,
    entry_type: EntryType,
    priority: u64,
    sequence: u64,
}

struct Node {
    children: [Option<Box<Node>>; 10],
    entry: Option<NodeEntry>,
}

impl Node {
    fn new() -> Self {
        Node {
            children: std::array::from_fn(|_| None),
            entry: None,
        }
    }

    fn collect(&self, out: &mut Vec<Entry>, limit: usize) {
        if out.len() >= limit {
            return;
        }
        if let Some(entry) = &self.entry {
            out.push(Entry {
                key: entry.key.clone(),
                value: entry.value.clone(),
                entry_type: entry.entry_type,
                priority: entry.priority,
                sequence: entry.sequence,
            });
        }
        for child in self.children.iter().flatten() {
            if out.len() >= limit {
                return;
            }
            child.collect(out, limit);
        }
    }
}

pub(crate) struct FkvState {
    root: Node,
    sequence: u64,
    top_k: usize,
    pub(crate) persistence: Option<Persistence>,
}

fn validate_key(key: &[u8]) -> Result<()> {
    if let Some(offset) = key.iter().position(|&b| b > 9) {
        return Err(FkvError::InvalidKeyDigit {
            byte: key[offset],
            offset,
        });
    }
    Ok(())
}

fn insert(root: &mut Node, sequence: &mut u64, record: RecordView<'_>, priority: u64) -> Result<()> {
    let entry_type = EntryType::from_u8(record.entry_type).ok_or_else(|| {
        FkvError::CorruptRecord(format!("unknown entry type {}", record.entry_type))
    })?;
    let mut node = &mut *root;
    for &digit in record.key {
        node = node.children[digit as usize]
            .get_or_insert_with(|| Box::new(Node::new()))
            .as_mut();
    }
    *sequence += 1;
    node.entry = Some(NodeEntry {
        key: record.key.to_vec(),
        value: record.value.to_vec(),
        entry_type,
        priority,
        sequence: *sequence,
    });
    Ok(())
}

/// The decimal trie key-value store.
pub struct Fkv {
    state: Mutex<FkvState>,
}

impl Fkv {
    /// An in-memory store without persistence.
    pub fn new() -> Self {
        Fkv {
            state: Mutex::new(FkvState {
                root: Node::new(),
                sequence: 0,
                top_k: DEFAULT_TOP_K,
                persistence: None,
            }),
        }
    }

    /// Open a persistent store, replaying base snapshot, delta files and
    /// WAL in that order. Replayed puts are not re-logged.
    pub fn open(config: PersistenceConfig) -> Result<Self> {
        let mut root = Node::new();
        let mut sequence = 0u64;
        let persistence = Persistence::start(config, |record| {
            validate_key(record.key)?;
            insert(&mut root, &mut sequence, record, 0)
        })?;
        Ok(Fkv {
            state: Mutex::new(FkvState {
                root,
                sequence,
                top_k: DEFAULT_TOP_K,
                persistence: Some(persistence),
            }),
        })
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, FkvState>> {
        self.state.lock().map_err(|_| FkvError::Poisoned)
    }

    pub fn put(&self, key: &[u8], value: &[u8], entry_type: EntryType) -> Result<()> {
        self.put_scored(key, value, entry_type, 0)
    }

    /// `put` with a priority, consumed by ranking layers above the store.
    pub fn put_scored(
        &self,
        key: &[u8],
        value: &[u8],
        entry_type: EntryType,
        priority: u64,
    ) -> Result<()> {
        if key.is_empty() || value.is_empty() {
            return Err(FkvError::EmptyKeyOrValue);
        }
        validate_key(key)?;
        let mut state = self.lock()?;
        // Log before touching the trie; a failed append aborts the put
        if let Some(persistence) = state.persistence.as_mut() {
            persistence.record_put(entry_type.as_u8(), key, value)?;
        }
        let FkvState {
            root, sequence, ..
        } = &mut *state;
        insert(
            root,
            sequence,
            RecordView {
                entry_type: entry_type.as_u8(),
                key,
                value,
            },
            priority,
        )
    }

    /// Apply a put without WAL logging (replay and delta-application path).
    pub(crate) fn put_unlogged(
        &self,
        key: &[u8],
        value: &[u8],
        entry_type: EntryType,
        priority: u64,
    ) -> Result<()> {
        if key.is_empty() || value.is_empty() {
            return Err(FkvError::EmptyKeyOrValue);
        }
        validate_key(key)?;
        let mut state = self.lock()?;
        let FkvState {
            root, sequence, ..
        } = &mut *state;
        insert(
            root,
            sequence,
            RecordView {
                entry_type: entry_type.as_u8(),
                key,
                value,
            },
            priority,
        )
    }

    /// Collect up to `k` entries under `prefix` in depth-first child order
    /// (the prefix node's own entry first). `k == 0` returns everything.
    pub fn get_prefix(&self, prefix: &[u8], k: usize) -> Result<Vec<Entry>> {
        validate_key(prefix)?;
        let state = self.lock()?;
        let mut node = &state.root;
        for &digit in prefix {
            match node.children[digit as usize].as_deref() {
                Some(child) => node = child,
                None => return Ok(Vec::new()),
            }
        }
        let limit = if k == 0 { usize::MAX } else { k };
        let mut out = Vec::new();
        node.collect(&mut out, limit);
        Ok(out)
    }

    /// Sequence number of the most recent put (0 for an empty store).
    pub fn current_sequence(&self) -> u64 {
        self.lock().map(|s| s.sequence).unwrap_or(0)
    }

    /// Default query cap (`fkv.top_k`).
    pub fn top_k(&self) -> usize {
        self.lock().map(|s| s.top_k).unwrap_or(DEFAULT_TOP_K)
    }

    pub fn set_top_k(&self, top_k: usize) {
        if let Ok(mut state) = self.lock() {
            state.top_k = top_k.max(1);
        }
    }

    /// Promote the current WAL content into a delta file now.
    pub fn force_checkpoint(&self) -> Result<()> {
        let mut state = self.lock()?;
        match state.persistence.as_mut() {
            Some(persistence) => persistence.force_checkpoint(),
            None => Ok(()),
        }
    }

    pub fn wal_path(&self) -> Option<PathBuf> {
        self.lock()
            .ok()?
            .persistence
            .as_ref()
            .map(|p| p.wal_path().to_path_buf())
    }

    pub fn base_snapshot_path(&self) -> Option<PathBuf> {
        self.lock()
            .ok()?
            .persistence
            .as_ref()
            .map(|p| p.base_snapshot_path().to_path_buf())
    }

    /// Write a gzip full dump of all live entries.
    pub fn save(&self, path: &Path) -> Result<()> {
        let entries = self.get_prefix(&[], 0)?;
        let file = std::fs::File::create(path)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(&(entries.len() as u64).to_le_bytes())?;
        for entry in &entries {
            encoder.write_all(&(entry.key.len() as u64).to_le_bytes())?;
            encoder.write_all(&entry.key)?;
            encoder.write_all(&(entry.value.len() as u64).to_le_bytes())?;
            encoder.write_all(&entry.value)?;
            encoder.write_all(&[entry.entry_type.as_u8()])?;
        }
        encoder.finish()?;
        Ok(())
    }

    /// Write the full dump to the configured base snapshot location.
    /// Replay stays correct because puts replace: base, deltas and WAL can
    /// overlap.
    pub fn save_base_snapshot(&self) -> Result<()> {
        match self.base_snapshot_path() {
            Some(path) => self.save(&path),
            None => Ok(()),
        }
    }

    /// Load a gzip full dump, adding its entries to the store. Loaded puts
    /// are not WAL-logged.
    pub fn load(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::open(path)?;
        let mut decoder = GzDecoder::new(file);
        let mut count_bytes = [0u8; 8];
        decoder.read_exact(&mut count_bytes)?;
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
            let entry_type = EntryType::from_u8(type_byte[0]).ok_or_else(|| {
                FkvError::CorruptSnapshot(format!("unknown entry type {}", type_byte[0]))
            })?;
            self.put_unlogged(&key, &value, entry_type, 0)?;
        }
        Ok(())
    }
}

impl Default for Fkv {
    fn default() -> Self {
        Self::new()
    }
}
