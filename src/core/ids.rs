//! Job ID allocation with an optional durable counter.
//!
//! The allocator hands out strictly increasing IDs starting at 1. When backed
//! by a [`CounterStore`] the last issued value is written after every
//! allocation, so a restarted scheduler resumes where the previous one left
//! off and never reuses an ID (output files are named after it).

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{error, info, warn};

use super::job::JobId;
use super::SchedulerError;

/// Persistence for the last issued job ID.
pub trait CounterStore: Send + Sync {
    /// Read the last persisted value, `None` if nothing was stored yet.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Persistence`] if the store exists but cannot be read.
    fn load(&self) -> Result<Option<u64>, SchedulerError>;

    /// Overwrite the persisted value.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Persistence`] if the value cannot be written.
    fn store(&self, value: u64) -> Result<(), SchedulerError>;
}

/// Counter persisted as a single decimal integer in a file.
#[derive(Debug, Clone)]
pub struct FileCounterStore {
    path: PathBuf,
}

impl FileCounterStore {
    /// Store backed by `path`; the file is created on first write.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Location of the counter file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FileCounterStore {
    /// Sibling file written first and then renamed over the counter.
    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("counter"));
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn persistence_error(path: &Path, e: impl std::fmt::Display) -> SchedulerError {
    SchedulerError::Persistence(format!("{}: {e}", path.display()))
}

impl CounterStore for FileCounterStore {
    fn load(&self) -> Result<Option<u64>, SchedulerError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path).map_err(|e| persistence_error(&self.path, e))?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            // Writes are rename-based, so an empty file was damaged outside the scheduler.
            return Err(persistence_error(&self.path, "counter file is empty"));
        }
        trimmed
            .parse()
            .map(Some)
            .map_err(|e| persistence_error(&self.path, format!("bad counter {trimmed:?}: {e}")))
    }

    /// Write the value to a staging file, sync it, then rename it over the
    /// counter so a crash leaves either the old or the new value on disk.
    fn store(&self, value: u64) -> Result<(), SchedulerError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| persistence_error(parent, e))?;
        }
        let staging = self.staging_path();
        let mut file = File::create(&staging).map_err(|e| persistence_error(&staging, e))?;
        file.write_all(value.to_string().as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| persistence_error(&staging, e))?;
        drop(file);
        fs::rename(&staging, &self.path).map_err(|e| persistence_error(&self.path, e))
    }
}

/// Process-local counter store, handy for tests and simulated restarts.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    value: Mutex<Option<u64>>,
}

impl InMemoryCounterStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last stored value.
    #[must_use]
    pub fn get(&self) -> Option<u64> {
        *self.value.lock()
    }
}

impl CounterStore for InMemoryCounterStore {
    fn load(&self) -> Result<Option<u64>, SchedulerError> {
        Ok(*self.value.lock())
    }

    fn store(&self, value: u64) -> Result<(), SchedulerError> {
        *self.value.lock() = Some(value);
        Ok(())
    }
}

/// Thread-safe, strictly increasing job ID source.
pub struct IdAllocator {
    last: Mutex<u64>,
    store: Option<Box<dyn CounterStore>>,
}

impl IdAllocator {
    /// Volatile allocator counting from zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last: Mutex::new(0),
            store: None,
        }
    }

    /// Allocator resuming from `store`.
    ///
    /// An unreadable store is logged and treated as empty; it is not an error.
    #[must_use]
    pub fn with_store(store: Box<dyn CounterStore>) -> Self {
        let last = match store.load() {
            Ok(Some(value)) => {
                info!(last_id = value, "resuming job ids from persisted counter");
                value
            }
            Ok(None) => 0,
            Err(e) => {
                warn!(error = %e, "could not read persisted job counter, starting from zero");
                0
            }
        };
        Self {
            last: Mutex::new(last),
            store: Some(store),
        }
    }

    /// Issue the next ID.
    ///
    /// The lock is held across the write so persisted values never go
    /// backwards under concurrent allocation.
    pub fn next(&self) -> JobId {
        let mut last = self.last.lock();
        *last += 1;
        let id = *last;
        if let Some(store) = &self.store {
            if let Err(e) = store.store(id) {
                error!(job_id = id, error = %e, "failed to persist job counter");
            }
        }
        JobId(id)
    }

    /// Most recently issued value, zero if none yet.
    #[must_use]
    pub fn last_issued(&self) -> u64 {
        *self.last.lock()
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IdAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdAllocator")
            .field("last", &*self.last.lock())
            .field("durable", &self.store.is_some())
            .finish()
    }
}
