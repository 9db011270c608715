//! Filesystem-backed checkpoint storage.
//!
//! Each checkpoint is one directory under the store root, named by its id. The controller creates
//! entries; only the detailed job that consumed a checkpoint removes it. The store keeps an
//! explicit count of checkpoints that exist and have not yet been acknowledged as consumed, which
//! is what the dispatcher uses for admission control.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use pfsa_engine::EngineError;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Result, SamplerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointState {
    Created,
    Waiting,
    Dispatched,
    Completed,
}

/// A checkpoint that has been fully written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub id: u64,
    pub path: PathBuf,
    pub tick: u64,
    pub committed_insts: u64,
}

#[derive(Debug)]
pub struct CheckpointStore {
    root: PathBuf,
    outstanding: AtomicUsize,
}

impl CheckpointStore {
    /// Opens `root` as a fresh store, creating it if needed. Existing entries are rejected: they
    /// would occupy capacity nobody accounts for.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(SamplerError::fs(&root))?;
        let store = Self {
            root,
            outstanding: AtomicUsize::new(0),
        };
        let existing = store.disk_occupancy()?;
        if existing != 0 {
            return Err(SamplerError::Fs {
                path: store.root.clone(),
                source: io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("checkpoint directory already holds {existing} entries"),
                ),
            });
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, id: u64) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Creates checkpoint `id` by letting `write` fill a new, empty directory.
    ///
    /// A failed write removes the partial directory and leaves the outstanding count untouched.
    pub fn create(
        &self,
        id: u64,
        tick: u64,
        committed_insts: u64,
        write: impl FnOnce(&Path) -> std::result::Result<(), EngineError>,
    ) -> Result<Checkpoint> {
        let path = self.path_for(id);
        fs::create_dir(&path).map_err(SamplerError::fs(&path))?;
        if let Err(source) = write(&path) {
            if let Err(err) = fs::remove_dir_all(&path) {
                warn!(path = %path.display(), %err, "failed to remove partial checkpoint");
            }
            return Err(SamplerError::Checkpoint { id, source });
        }
        let outstanding = self.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(id, tick, committed_insts, outstanding, "checkpoint created");
        Ok(Checkpoint {
            id,
            path,
            tick,
            committed_insts,
        })
    }

    /// Checkpoints created and not yet acknowledged as consumed.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Releases the capacity held by `checkpoint` if its directory is gone.
    ///
    /// Returns `false` (and keeps the capacity) when the directory still exists.
    pub fn acknowledge(&self, checkpoint: &Checkpoint) -> bool {
        if checkpoint.path.exists() {
            return false;
        }
        let prev = self.outstanding.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "acknowledged more checkpoints than were created");
        true
    }

    /// Entries physically present in the store directory.
    pub fn disk_occupancy(&self) -> Result<usize> {
        let entries = fs::read_dir(&self.root).map_err(SamplerError::fs(&self.root))?;
        let mut count = 0;
        for entry in entries {
            entry.map_err(SamplerError::fs(&self.root))?;
            count += 1;
        }
        Ok(count)
    }
}

/// Deletes a consumed checkpoint directory.
pub fn discard(path: &Path) -> Result<()> {
    fs::remove_dir_all(path).map_err(SamplerError::fs(path))
}
