//! File-backed metadata store: write-ahead log plus periodic snapshot.

use super::KvStore;
use crate::core::{MetaError, Result};
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

const WAL_FILE: &str = "meta.wal";
const SNAPSHOT_FILE: &str = "meta.snapshot";
const DEFAULT_CHECKPOINT_THRESHOLD: usize = 1000;

// ============================================================================
// WAL Entry Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalEntry {
    Set { key: String, value: Vec<u8> },
    Delete { key: String },
}

impl WalEntry {
    fn apply(self, entries: &mut BTreeMap<String, Vec<u8>>) {
        match self {
            WalEntry::Set { key, value } => {
                entries.insert(key, value);
            }
            WalEntry::Delete { key } => {
                entries.remove(&key);
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct KvSnapshot {
    version: u32,
    created_at: i64,
    entries: BTreeMap<String, Vec<u8>>,
}

// ============================================================================
// WAL Manager
// ============================================================================

struct WalManager {
    wal_path: PathBuf,
    wal_file: BufWriter<File>,
    /// byte length of the synced, replayable prefix
    committed_len: u64,
    /// set when a failed append could not be cut back off the file
    poisoned: Option<String>,
    entries_since_checkpoint: usize,
}

impl WalManager {
    fn open(wal_path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&wal_path)
            .map_err(|e| MetaError::Unavailable(format!("failed to open WAL file: {}", e)))?;
        Ok(Self {
            wal_path,
            wal_file: BufWriter::new(file),
            committed_len: 0,
            poisoned: None,
            entries_since_checkpoint: 0,
        })
    }

    /// Append and sync one entry. On failure nothing of the entry survives,
    /// neither in the write buffer nor on disk, so a reopen never replays a
    /// write the caller saw fail.
    fn append(&mut self, entry: &WalEntry) -> Result<()> {
        if let Some(reason) = &self.poisoned {
            return Err(MetaError::Unavailable(format!("WAL is unusable: {}", reason)));
        }
        let serialized = rmp_serde::to_vec(entry)?;
        match self.write_frame(&serialized) {
            Ok(()) => {
                self.committed_len += 4 + serialized.len() as u64;
                self.entries_since_checkpoint += 1;
                Ok(())
            }
            Err(err) => {
                self.discard_uncommitted();
                Err(err)
            }
        }
    }

    fn write_frame(&mut self, serialized: &[u8]) -> Result<()> {
        let len = serialized.len() as u32;
        self.wal_file.write_all(&len.to_le_bytes())?;
        self.wal_file.write_all(serialized)?;
        self.wal_file.flush()?;
        self.wal_file.get_mut().sync_data()?;
        Ok(())
    }

    /// Drop buffered bytes and cut the file back to the committed length.
    fn discard_uncommitted(&mut self) {
        if let Err(err) = self.reset_writer() {
            warn!(
                "cannot roll back failed append in {}: {}",
                self.wal_path.display(),
                err
            );
            self.poisoned = Some(err.to_string());
        }
    }

    fn reset_writer(&mut self) -> Result<()> {
        let file = OpenOptions::new().append(true).open(&self.wal_path)?;
        let stale = std::mem::replace(&mut self.wal_file, BufWriter::new(file));
        // into_parts hands back the file without flushing the buffered bytes
        drop(stale.into_parts());
        let file = self.wal_file.get_ref();
        file.set_len(self.committed_len)?;
        file.sync_all()?;
        Ok(())
    }

    /// Decoded entries plus the byte length of the intact prefix.
    fn read_all(&self) -> Result<(Vec<WalEntry>, u64)> {
        if !self.wal_path.exists() {
            return Ok((Vec::new(), 0));
        }
        let mut reader = BufReader::new(File::open(&self.wal_path)?);
        let mut entries = Vec::new();
        let mut valid_len = 0u64;
        loop {
            let mut len_bytes = [0u8; 4];
            match reader.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let len = u32::from_le_bytes(len_bytes) as usize;
            let mut data = vec![0u8; len];
            if let Err(e) = reader.read_exact(&mut data) {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    // torn tail from a crash mid-append
                    warn!("ignoring truncated WAL entry at end of {}", self.wal_path.display());
                    break;
                }
                return Err(e.into());
            }
            entries.push(rmp_serde::from_slice(&data)?);
            valid_len += 4 + len as u64;
        }
        Ok((entries, valid_len))
    }

    fn trim_to(&mut self, valid_len: u64) -> Result<()> {
        let file = OpenOptions::new().write(true).open(&self.wal_path)?;
        if file.metadata()?.len() > valid_len {
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        self.committed_len = valid_len;
        Ok(())
    }

    fn truncate(&mut self) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.wal_path)?;
        file.sync_all()?;
        let file = OpenOptions::new().append(true).open(&self.wal_path)?;
        self.wal_file = BufWriter::new(file);
        self.committed_len = 0;
        self.entries_since_checkpoint = 0;
        Ok(())
    }
}

// ============================================================================
// File KV
// ============================================================================

struct FileKvInner {
    entries: BTreeMap<String, Vec<u8>>,
    wal: WalManager,
    checkpoint_threshold: usize,
}

/// Metadata store persisted under a data directory.
///
/// Every mutation is appended to the WAL and synced before it becomes
/// visible. Once `checkpoint_threshold` entries accumulate the whole map is
/// written to a snapshot (temp file + atomic rename) and the WAL is cleared.
pub struct FileKv {
    dir: PathBuf,
    inner: Mutex<FileKvInner>,
}

impl FileKv {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::open_with_threshold(dir, DEFAULT_CHECKPOINT_THRESHOLD)
    }

    pub fn open_with_threshold<P: AsRef<Path>>(dir: P, checkpoint_threshold: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .map_err(|e| MetaError::Unavailable(format!("failed to create data directory: {}", e)))?;

        let mut entries = match load_snapshot(&dir.join(SNAPSHOT_FILE))? {
            Some(snapshot) => snapshot.entries,
            None => BTreeMap::new(),
        };

        let mut wal = WalManager::open(dir.join(WAL_FILE))?;
        let (replayed, valid_len) = wal.read_all()?;
        wal.trim_to(valid_len)?;
        debug!(
            "recovered {} keys from snapshot, replaying {} WAL entries",
            entries.len(),
            replayed.len()
        );
        for entry in replayed {
            entry.apply(&mut entries);
        }

        Ok(Self {
            dir,
            inner: Mutex::new(FileKvInner {
                entries,
                wal,
                checkpoint_threshold: checkpoint_threshold.max(1),
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Force a snapshot and clear the WAL.
    pub async fn checkpoint(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.checkpoint_locked(&mut inner)
    }

    fn checkpoint_locked(&self, inner: &mut FileKvInner) -> Result<()> {
        let snapshot = KvSnapshot {
            version: 1,
            created_at: chrono::Utc::now().timestamp_millis(),
            entries: inner.entries.clone(),
        };
        let serialized = rmp_serde::to_vec(&snapshot)?;

        let mut temp = NamedTempFile::new_in(&self.dir)?;
        temp.write_all(&serialized)?;
        temp.as_file().sync_all()?;
        temp.persist(self.dir.join(SNAPSHOT_FILE))
            .map_err(|e| MetaError::Unavailable(format!("failed to persist snapshot: {}", e)))?;

        inner.wal.truncate()
    }

    async fn mutate(&self, entry: WalEntry) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.wal.append(&entry)?;
        entry.apply(&mut inner.entries);

        if inner.wal.entries_since_checkpoint >= inner.checkpoint_threshold {
            if let Err(err) = self.checkpoint_locked(&mut inner) {
                // the WAL still holds everything; retried on the next mutation
                warn!("metadata checkpoint failed: {}", err);
            }
        }
        Ok(())
    }
}

fn load_snapshot(path: &Path) -> Result<Option<KvSnapshot>> {
    if !path.exists() {
        return Ok(None);
    }
    let mut data = Vec::new();
    File::open(path)?.read_to_end(&mut data)?;
    Ok(Some(rmp_serde::from_slice(&data)?))
}

#[async_trait]
impl KvStore for FileKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.lock().await.entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.mutate(WalEntry::Set {
            key: key.to_string(),
            value,
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.mutate(WalEntry::Delete {
            key: key.to_string(),
        })
        .await
    }

    async fn load_with_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}
