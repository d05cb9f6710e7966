use std::fs::{self, File};
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

/// Whether a recorded mutation survives a process restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    Durable,
    Ephemeral,
}

/// What a ledger does when a durable backend write fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistFailurePolicy {
    /// Undo the in-memory mutation and surface the storage error.
    #[default]
    Reject,
    /// Keep the mutation in memory only and report it as ephemeral.
    DegradeToEphemeral,
}

/// Per-key record persistence used by the ledgers.
///
/// `write` is always called while the caller holds the exclusion for `key`,
/// so implementations only need to make a single write atomic.
pub trait RecordBackend<R>: Send + Sync {
    fn durability(&self) -> Durability;
    fn load_all(&self) -> LedgerResult<Vec<R>>;
    fn write(&self, key: &str, record: &R) -> LedgerResult<()>;
}

/// Process-lifetime storage. Writes succeed and are never read back.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryBackend;

impl<R> RecordBackend<R> for MemoryBackend {
    fn durability(&self) -> Durability {
        Durability::Ephemeral
    }

    fn load_all(&self) -> LedgerResult<Vec<R>> {
        Ok(Vec::new())
    }

    fn write(&self, _key: &str, _record: &R) -> LedgerResult<()> {
        Ok(())
    }
}

/// One pretty-printed JSON file per key under a directory.
#[derive(Debug)]
pub struct JsonDirBackend<R> {
    dir: PathBuf,
    _record: PhantomData<fn() -> R>,
}

impl<R> JsonDirBackend<R> {
    pub fn open(dir: impl AsRef<Path>) -> LedgerResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .map_err(|e| LedgerError::Storage(format!("create {}: {e}", dir.display())))?;
        Ok(Self {
            dir,
            _record: PhantomData,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &str) -> LedgerResult<PathBuf> {
        if key.is_empty() || !key.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(LedgerError::InvalidArgument(
                "record key must be ascii alphanumeric".to_string(),
            ));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl<R> RecordBackend<R> for JsonDirBackend<R>
where
    R: Serialize + DeserializeOwned,
{
    fn durability(&self) -> Durability {
        Durability::Durable
    }

    fn load_all(&self) -> LedgerResult<Vec<R>> {
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| LedgerError::Storage(format!("read {}: {e}", self.dir.display())))?;
        let mut records = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| LedgerError::Storage(format!("read dir entry: {e}")))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path)
                .map_err(|e| LedgerError::Storage(format!("read {}: {e}", path.display())))?;
            let record = serde_json::from_slice(&bytes)
                .map_err(|e| LedgerError::Storage(format!("decode {}: {e}", path.display())))?;
            records.push(record);
        }
        Ok(records)
    }

    fn write(&self, key: &str, record: &R) -> LedgerResult<()> {
        let path = self.record_path(key)?;
        let payload = serde_json::to_vec_pretty(record)
            .map_err(|e| LedgerError::Storage(format!("encode record: {e}")))?;
        write_file_atomic_durable(&path, &payload)
    }
}

#[cfg(unix)]
fn sync_directory(path: &Path) -> LedgerResult<()> {
    let dir = File::open(path).map_err(|e| LedgerError::Storage(format!("open dir: {e}")))?;
    dir.sync_all()
        .map_err(|e| LedgerError::Storage(format!("sync dir: {e}")))
}

#[cfg(not(unix))]
fn sync_directory(_path: &Path) -> LedgerResult<()> {
    Ok(())
}

fn write_file_atomic_durable(path: &Path, bytes: &[u8]) -> LedgerResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| LedgerError::Storage("path parent missing".to_string()))?;
    let tmp = path.with_extension("json.tmp");
    let write_err = |e: std::io::Error| LedgerError::Storage(format!("write {}: {e}", path.display()));
    let mut f = File::create(&tmp).map_err(write_err)?;
    f.write_all(bytes).map_err(write_err)?;
    f.sync_all().map_err(write_err)?;
    fs::rename(&tmp, path).map_err(write_err)?;
    sync_directory(parent)
}
