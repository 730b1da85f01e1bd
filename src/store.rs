//! Persistence for backend configurations.
//!
//! The manager only talks to the [`ConfigStore`] trait. Two implementations:
//! - [`FileConfigStore`]: one TOML table per backend under `[backends.<name>]`
//! - [`MemoryConfigStore`]: process-local map, used by tests and ephemeral runs

use crate::error::StoreError;
use crate::types::BackendConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Key-value store of backend configurations.
pub trait ConfigStore: Send + Sync {
    fn load(&self, name: &str) -> Result<Option<BackendConfig>, StoreError>;

    fn save(&self, name: &str, config: &BackendConfig) -> Result<(), StoreError>;

    /// Returns whether an entry existed.
    fn remove(&self, name: &str) -> Result<bool, StoreError>;

    /// Enabled entries in name order.
    fn entries(&self) -> Result<Vec<(String, BackendConfig)>, StoreError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct StoredBackend {
    #[serde(default = "default_true")]
    enabled: bool,
    updated_at: DateTime<Utc>,
    config: BackendConfig,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    backends: BTreeMap<String, StoredBackend>,
}

// ============================================================================
// File store
// ============================================================================

/// TOML-backed store. Every operation re-reads the file so external edits are picked up.
pub struct FileConfigStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path, lock: Mutex::new(()) }
    }

    /// `~/.config/modelmesh/backends.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("modelmesh")
            .join("backends.toml")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flip the `enabled` flag of an existing entry. Returns whether it existed.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = self.read_file()?;
        let Some(entry) = file.backends.get_mut(name) else {
            return Ok(false);
        };
        entry.enabled = enabled;
        entry.updated_at = Utc::now();
        self.write_file(&file)?;
        Ok(true)
    }

    fn read_file(&self) -> Result<StoreFile, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreFile::default()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn write_file(&self, file: &StoreFile) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(file)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self, name: &str) -> Result<Option<BackendConfig>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read_file()?.backends.remove(name).map(|entry| entry.config))
    }

    fn save(&self, name: &str, config: &BackendConfig) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = self.read_file()?;
        let enabled = file.backends.get(name).map_or(true, |entry| entry.enabled);
        file.backends.insert(
            name.to_string(),
            StoredBackend { enabled, updated_at: Utc::now(), config: config.clone() },
        );
        self.write_file(&file)?;
        debug!(backend = %name, path = %self.path.display(), "Saved backend config");
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = self.read_file()?;
        if file.backends.remove(name).is_none() {
            return Ok(false);
        }
        self.write_file(&file)?;
        Ok(true)
    }

    fn entries(&self) -> Result<Vec<(String, BackendConfig)>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self
            .read_file()?
            .backends
            .into_iter()
            .filter(|(_, entry)| entry.enabled)
            .map(|(name, entry)| (name, entry.config))
            .collect())
    }
}

// ============================================================================
// Memory store
// ============================================================================

#[derive(Default)]
pub struct MemoryConfigStore {
    entries: Mutex<BTreeMap<String, BackendConfig>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(self, name: &str, config: BackendConfig) -> Self {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), config);
        self
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self, name: &str) -> Result<Option<BackendConfig>, StoreError> {
        Ok(self.entries.lock().unwrap_or_else(PoisonError::into_inner).get(name).cloned())
    }

    fn save(&self, name: &str, config: &BackendConfig) -> Result<(), StoreError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), config.clone());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.entries.lock().unwrap_or_else(PoisonError::into_inner).remove(name).is_some())
    }

    fn entries(&self) -> Result<Vec<(String, BackendConfig)>, StoreError> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, config)| (name.clone(), config.clone()))
            .collect())
    }
}
