//! Persistence adapters for controller state.
//!
//! The persisted surface is a single JSON document: the Q-table as an object
//! of objects, epsilon, the buffered transition, the trend memory and a few
//! counters. [`FileStore`] writes it atomically and falls back to an
//! in-memory copy when the disk misbehaves, so a failing write never loses
//! the table.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::{CoreError, Result};
use crate::rl::action_space::ActionKey;
use crate::rl::control_loop::TransitionRecord;
use crate::rl::qtable::QTable;

/// Everything that survives a restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub qtable: QTable,

    pub epsilon: f64,

    #[serde(default)]
    pub transition: Option<TransitionRecord>,

    #[serde(default)]
    pub trend_memory: i8,

    #[serde(default)]
    pub last_applied: Option<ActionKey>,

    #[serde(default)]
    pub total_updates: u64,
}

/// Load/save port for [`PersistedState`].
pub trait StateStore {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&mut self) -> Result<Option<PersistedState>>;

    fn save(&mut self, state: &PersistedState) -> Result<()>;
}

impl<T: StateStore + ?Sized> StateStore for Box<T> {
    fn load(&mut self) -> Result<Option<PersistedState>> {
        (**self).load()
    }

    fn save(&mut self, state: &PersistedState) -> Result<()> {
        (**self).save(state)
    }
}

/// Always-available attribute store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Option<PersistedState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<&PersistedState> {
        self.state.as_ref()
    }
}

impl StateStore for MemoryStore {
    fn load(&mut self) -> Result<Option<PersistedState>> {
        Ok(self.state.clone())
    }

    fn save(&mut self, state: &PersistedState) -> Result<()> {
        self.state = Some(state.clone());
        Ok(())
    }
}

/// JSON file store with atomic replace and in-memory fallback.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    fallback: MemoryStore,
    /// Memory copy is newer than the file
    fallback_active: bool,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fallback: MemoryStore::new(),
            fallback_active: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True while the last save could only reach the memory fallback.
    pub fn fallback_active(&self) -> bool {
        self.fallback_active
    }

    fn read_file(&self) -> Result<Option<PersistedState>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&data)?))
    }
}

impl StateStore for FileStore {
    fn load(&mut self) -> Result<Option<PersistedState>> {
        if self.fallback_active {
            return self.fallback.load();
        }
        match self.read_file() {
            Ok(state) => Ok(state),
            Err(e) => {
                log::error!(
                    "failed to load controller state from {}: {}, starting empty",
                    self.path.display(),
                    e
                );
                self.fallback.load()
            }
        }
    }

    fn save(&mut self, state: &PersistedState) -> Result<()> {
        // memory copy first so a failed write below never drops the table
        self.fallback.save(state)?;

        let data = serde_json::to_vec_pretty(state)?;
        match atomic_write(&self.path, &data) {
            Ok(()) => {
                if self.fallback_active {
                    log::info!("state file {} writable again", self.path.display());
                }
                self.fallback_active = false;
            }
            Err(e) => {
                log::error!(
                    "atomic write to {} failed: {}, state kept in memory",
                    self.path.display(),
                    e
                );
                self.fallback_active = true;
            }
        }
        Ok(())
    }
}

/// Write `data` to a temp file beside `path`, sync, then rename over `path`.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        Some(_) => Path::new("."),
        None => {
            return Err(CoreError::PersistenceError(format!(
                "path has no parent: {}",
                path.display()
            )))
        }
    };

    let temp_name = format!(
        ".tmp_{}_{}",
        std::process::id(),
        path.file_name()
            .map(|s| s.to_string_lossy())
            .unwrap_or_default()
    );
    let temp_path = parent.join(temp_name);

    let result = (|| -> Result<()> {
        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}
