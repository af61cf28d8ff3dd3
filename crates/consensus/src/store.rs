//! The recovery log: round snapshots that survive restarts.
//!
//! Every state-advancing transition that must not be lost to a crash writes
//! the context snapshot here before the corresponding message leaves the
//! node. On startup the snapshot for the current height, when present, puts
//! the node back exactly where it stopped.

use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Stable storage for the in-flight round snapshot, keyed by height.
/// Snapshots for past heights are obsolete and may be dropped at will.
pub trait RecoveryStore: Send {
    /// Atomically replaces the snapshot for `height`.
    fn save(&mut self, height: u32, blob: &[u8]) -> Result<()>;

    /// Loads the snapshot for `height`, if one was saved.
    fn load(&mut self, height: u32) -> Result<Option<Vec<u8>>>;
}

/// Volatile store. Shares its map across clones, so a restarted service
/// handed a clone sees what its predecessor saved, which is also exactly
/// what crash-recovery tests need.
#[derive(Debug, Default, Clone)]
pub struct MemoryRecoveryStore {
    blobs: Arc<Mutex<HashMap<u32, Vec<u8>>>>,
}

impl MemoryRecoveryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecoveryStore for MemoryRecoveryStore {
    fn save(&mut self, height: u32, blob: &[u8]) -> Result<()> {
        let mut blobs = self.blobs.lock();
        blobs.retain(|&h, _| h >= height);
        blobs.insert(height, blob.to_vec());
        Ok(())
    }

    fn load(&mut self, height: u32) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().get(&height).cloned())
    }
}

/// File-backed store: one `consensus-<height>` file in the given directory,
/// replaced through a temp-file rename so a crash mid-write can never leave
/// a torn snapshot.
#[derive(Debug)]
pub struct FileRecoveryStore {
    dir: PathBuf,
}

impl FileRecoveryStore {
    /// Opens (and creates, if needed) the store directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| Error::Store(e.to_string()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, height: u32) -> PathBuf {
        self.dir.join(format!("consensus-{height}"))
    }

    fn prune_below(&self, height: u32) {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(old) = name
                .to_str()
                .and_then(|n| n.strip_prefix("consensus-"))
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            if old < height {
                let _ = fs::remove_file(entry.path());
            }
        }
    }
}

impl RecoveryStore for FileRecoveryStore {
    fn save(&mut self, height: u32, blob: &[u8]) -> Result<()> {
        let tmp = self.dir.join(format!("consensus-{height}.tmp"));
        fs::write(&tmp, blob).map_err(|e| Error::Store(e.to_string()))?;
        fs::rename(&tmp, self.path_for(height)).map_err(|e| Error::Store(e.to_string()))?;
        self.prune_below(height);
        Ok(())
    }

    fn load(&mut self, height: u32) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(height)) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Store(e.to_string())),
        }
    }
}
