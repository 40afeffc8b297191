//! Durable store for not-yet-acknowledged messages.
//!
//! Implements:
//! - The gateway contract the queue calls into (load / save / remove)
//! - An in-memory store for tests and stations without flash
//! - A JSON-lines write-ahead log per queue kind with compaction
//!
//! Durability is best-effort: the queue logs gateway errors and keeps
//! delivering from memory.

use crate::types::QueueKind;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised by a persistence backend
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// A queued call as it is written to durable storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedMessage {
    pub identity: String,
    pub action: String,
    pub payload: Value,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Identity of the call whose reply fills in `transactionId`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub awaits: Option<String>,
}

/// Contract between the queue and its durable store
pub trait PersistenceGateway: Send + Sync {
    /// Messages previously saved to `queue` and not yet removed, oldest first
    fn load(&self, queue: QueueKind) -> Result<Vec<PersistedMessage>, PersistenceError>;

    fn save(&self, message: &PersistedMessage, queue: QueueKind) -> Result<(), PersistenceError>;

    fn remove(&self, identity: &str, queue: QueueKind) -> Result<(), PersistenceError>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    partitions: Mutex<HashMap<QueueKind, Vec<PersistedMessage>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live messages in `queue`
    pub fn len(&self, queue: QueueKind) -> usize {
        self.partitions.lock().get(&queue).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.lock().values().all(Vec::is_empty)
    }

    pub fn contains(&self, identity: &str, queue: QueueKind) -> bool {
        self.partitions
            .lock()
            .get(&queue)
            .map_or(false, |msgs| msgs.iter().any(|m| m.identity == identity))
    }
}

impl PersistenceGateway for MemoryStore {
    fn load(&self, queue: QueueKind) -> Result<Vec<PersistedMessage>, PersistenceError> {
        Ok(self.partitions.lock().get(&queue).cloned().unwrap_or_default())
    }

    fn save(&self, message: &PersistedMessage, queue: QueueKind) -> Result<(), PersistenceError> {
        let mut partitions = self.partitions.lock();
        upsert(partitions.entry(queue).or_default(), message.clone());
        Ok(())
    }

    fn remove(&self, identity: &str, queue: QueueKind) -> Result<(), PersistenceError> {
        if let Some(msgs) = self.partitions.lock().get_mut(&queue) {
            msgs.retain(|m| m.identity != identity);
        }
        Ok(())
    }
}

/// Replace a record in place, keeping its original position, or append it
fn upsert(msgs: &mut Vec<PersistedMessage>, message: PersistedMessage) {
    match msgs.iter_mut().find(|m| m.identity == message.identity) {
        Some(existing) => *existing = message,
        None => msgs.push(message),
    }
}

/// File store configuration
#[derive(Debug, Clone)]
pub struct FileStoreConfig {
    /// Base directory for the log files
    pub dir: PathBuf,
    /// Flush to disk after every record
    pub fsync_on_write: bool,
    /// Removed records tolerated in a log before it is rewritten
    pub compact_threshold: usize,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./evq-data"),
            fsync_on_write: true,
            compact_threshold: 256,
        }
    }
}

impl FileStoreConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    pub fn with_fsync(mut self, fsync_on_write: bool) -> Self {
        self.fsync_on_write = fsync_on_write;
        self
    }

    pub fn with_compact_threshold(mut self, threshold: usize) -> Self {
        self.compact_threshold = threshold;
        self
    }
}

/// One line of a queue log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum WalRecord {
    #[serde(rename = "SAVE")]
    Save(PersistedMessage),

    #[serde(rename = "REMOVE")]
    Remove { identity: String },
}

#[derive(Default)]
struct FileStoreState {
    writers: HashMap<QueueKind, BufWriter<File>>,
    removed_since_compact: HashMap<QueueKind, usize>,
}

/// Write-ahead log store, one file per queue kind
pub struct FileStore {
    config: FileStoreConfig,
    state: Mutex<FileStoreState>,
}

impl FileStore {
    /// Create the store directory if needed
    pub fn new(config: FileStoreConfig) -> io::Result<Self> {
        fs::create_dir_all(&config.dir)?;
        Ok(Self {
            config,
            state: Mutex::new(FileStoreState::default()),
        })
    }

    fn wal_path(&self, queue: QueueKind) -> PathBuf {
        self.config.dir.join(format!("{}.wal", queue))
    }

    fn open_wal(path: &Path) -> io::Result<BufWriter<File>> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(BufWriter::new(file))
    }

    fn write_record(
        &self,
        state: &mut FileStoreState,
        queue: QueueKind,
        record: &WalRecord,
    ) -> Result<(), PersistenceError> {
        let wal = match state.writers.entry(queue) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(Self::open_wal(&self.wal_path(queue))?)
            }
        };

        let data = serde_json::to_string(record)?;
        writeln!(wal, "{}", data)?;
        if self.config.fsync_on_write {
            wal.flush()?;
            wal.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Replay a log into the live message list
    fn replay(&self, queue: QueueKind) -> io::Result<Vec<PersistedMessage>> {
        let path = self.wal_path(queue);
        let mut live: Vec<PersistedMessage> = Vec::new();
        if !path.exists() {
            return Ok(live);
        }

        let reader = BufReader::new(File::open(&path)?);
        for (line_num, line) in reader.lines().enumerate() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    warn!("FileStore: {} read error at line {}: {}", queue, line_num + 1, e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<WalRecord>(&line) {
                Ok(WalRecord::Save(msg)) => upsert(&mut live, msg),
                Ok(WalRecord::Remove { identity }) => {
                    live.retain(|m| m.identity != identity);
                }
                Err(e) => {
                    // A torn tail write after a crash lands here
                    warn!("FileStore: {} parse error at line {}: {}", queue, line_num + 1, e);
                }
            }
        }
        Ok(live)
    }

    /// Rewrite a log so it only holds live records
    fn compact(&self, state: &mut FileStoreState, queue: QueueKind) -> Result<(), PersistenceError> {
        if let Some(mut wal) = state.writers.remove(&queue) {
            wal.flush()?;
        }

        let live = self.replay(queue)?;
        let path = self.wal_path(queue);
        let temp_path = self.config.dir.join(format!("{}.wal.tmp", queue));
        {
            let mut temp = BufWriter::new(File::create(&temp_path)?);
            for msg in &live {
                writeln!(temp, "{}", serde_json::to_string(&WalRecord::Save(msg.clone()))?)?;
            }
            temp.flush()?;
            temp.get_ref().sync_all()?;
        }
        fs::rename(&temp_path, &path)?;

        state.removed_since_compact.insert(queue, 0);
        info!("FileStore: Compacted {} log to {} live messages", queue, live.len());
        Ok(())
    }
}

impl PersistenceGateway for FileStore {
    fn load(&self, queue: QueueKind) -> Result<Vec<PersistedMessage>, PersistenceError> {
        let mut state = self.state.lock();
        if let Some(wal) = state.writers.get_mut(&queue) {
            wal.flush()?;
        }
        let live = self.replay(queue)?;
        info!("FileStore: Recovered {} {} messages", live.len(), queue);
        Ok(live)
    }

    fn save(&self, message: &PersistedMessage, queue: QueueKind) -> Result<(), PersistenceError> {
        let mut state = self.state.lock();
        self.write_record(&mut state, queue, &WalRecord::Save(message.clone()))?;
        debug!("FileStore: Saved {} to {} log", message.identity, queue);
        Ok(())
    }

    fn remove(&self, identity: &str, queue: QueueKind) -> Result<(), PersistenceError> {
        let mut state = self.state.lock();
        self.write_record(
            &mut state,
            queue,
            &WalRecord::Remove {
                identity: identity.to_string(),
            },
        )?;
        debug!("FileStore: Removed {} from {} log", identity, queue);

        let removed = state.removed_since_compact.entry(queue).or_insert(0);
        *removed += 1;
        if *removed >= self.config.compact_threshold {
            // the REMOVE record is durable, a failed rewrite is retried on the next removal
            if let Err(e) = self.compact(&mut state, queue) {
                warn!("FileStore: Failed to compact {} log: {}", queue, e);
            }
        }
        Ok(())
    }
}
