//! Registry snapshot persistence
//!
//! The registry writes its complete state after every structural mutation.
//! Stores must replace the snapshot atomically so a crash leaves either the
//! old or the new state on disk, never a mix.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MurmurError, Result};

/// Liveness record of one registered server
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub rank: u64,
    /// Epoch seconds of the last registration or heartbeat
    pub last_heartbeat: f64,
}

fn first_rank() -> u64 {
    1
}

/// Everything the registry persists: records and rank counter together
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegistryState {
    #[serde(default)]
    pub servers: BTreeMap<String, ServerRecord>,
    #[serde(default = "first_rank")]
    pub next_rank: u64,
}

impl Default for RegistryState {
    fn default() -> Self {
        Self {
            servers: BTreeMap::new(),
            next_rank: first_rank(),
        }
    }
}

impl RegistryState {
    /// Raise `next_rank` past every recorded rank so a damaged counter can
    /// never hand out a rank that is already taken
    pub fn repair_next_rank(&mut self) -> bool {
        let floor = self
            .servers
            .values()
            .map(|record| record.rank + 1)
            .max()
            .unwrap_or(1)
            .max(1);
        if self.next_rank < floor {
            self.next_rank = floor;
            true
        } else {
            false
        }
    }
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Read the last saved state; `None` when nothing was ever saved
    async fn load(&self) -> Result<Option<RegistryState>>;

    /// Replace the saved state
    async fn save(&self, state: &RegistryState) -> Result<()>;
}

/// JSON file on local disk, replaced via write-to-temp then rename
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn load(&self) -> Result<Option<RegistryState>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(MurmurError::Persistence(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        let state = serde_json::from_slice(&raw)?;
        Ok(Some(state))
    }

    async fn save(&self, state: &RegistryState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    MurmurError::Persistence(format!(
                        "Failed to create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let body = serde_json::to_vec_pretty(state)?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, &body).await.map_err(|e| {
            MurmurError::Persistence(format!("Failed to write {}: {}", temp.display(), e))
        })?;
        tokio::fs::rename(&temp, &self.path).await.map_err(|e| {
            MurmurError::Persistence(format!(
                "Failed to replace {}: {}",
                self.path.display(),
                e
            ))
        })?;
        debug!(
            "Saved registry snapshot ({} servers) to {}",
            state.servers.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// In-process store for tests and embedding; can be told to fail saves
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<Option<RegistryState>>,
    fail_saves: std::sync::atomic::AtomicBool,
    saves: std::sync::atomic::AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: RegistryState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            ..Self::default()
        }
    }

    /// Make every following `save` fail (or succeed again)
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Number of successful saves so far
    pub fn save_count(&self) -> u64 {
        self.saves.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Last successfully saved state
    pub fn snapshot(&self) -> Option<RegistryState> {
        self.state.lock().ok().and_then(|state| state.clone())
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn load(&self) -> Result<Option<RegistryState>> {
        self.state
            .lock()
            .map(|state| state.clone())
            .map_err(|e| MurmurError::Concurrency(format!("Mutex lock fail {}", e)))
    }

    async fn save(&self, state: &RegistryState) -> Result<()> {
        if self.fail_saves.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(MurmurError::Persistence("store is unwritable".to_string()));
        }
        let mut saved = self
            .state
            .lock()
            .map_err(|e| MurmurError::Concurrency(format!("Mutex lock fail {}", e)))?;
        *saved = Some(state.clone());
        self.saves.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}
