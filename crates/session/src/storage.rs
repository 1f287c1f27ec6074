//! Persistent key-value storage for session state.
//!
//! [`Storage`] has `localStorage` semantics: synchronous, string values,
//! fixed key names. The token store never has to await. Two backends:
//! - [`MemoryStorage`]: tests and ephemeral sessions
//! - [`FileStorage`]: a JSON object on disk that survives restarts

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::RwLock,
};

use {anyhow::Result, tracing::debug};

/// Fixed key names for persisted session state.
pub mod keys {
    pub const ACCESS_TOKEN: &str = "accessToken";
    pub const REFRESH_TOKEN: &str = "refreshToken";
    pub const SELECTED_ACCOUNT: &str = "selectedAccountId";
}

/// A synchronous string key-value store.
pub trait Storage: Send + Sync {
    /// Get a value by key.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a value by key.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Set several values in one write.
    fn set_many(&self, entries: &[(&str, &str)]) -> Result<()> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }

    /// Delete a value by key. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// Delete several keys in one write.
    fn delete_many(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.delete(key)?;
        }
        Ok(())
    }
}

/// In-memory storage for testing and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStorage {
    data: RwLock<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let data = self
            .data
            .read()
            .map_err(|e| anyhow::anyhow!("lock error: {e}"))?;
        Ok(data.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut data = self
            .data
            .write()
            .map_err(|e| anyhow::anyhow!("lock error: {e}"))?;
        data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut data = self
            .data
            .write()
            .map_err(|e| anyhow::anyhow!("lock error: {e}"))?;
        data.remove(key);
        Ok(())
    }
}

/// JSON-file backed storage.
///
/// The whole map is kept in memory and rewritten on every change via a
/// temporary file and a rename, so a crash never leaves a half-written file.
pub struct FileStorage {
    path: PathBuf,
    data: RwLock<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Open (or lazily create) the storage file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)
                    .map_err(|e| anyhow::anyhow!("corrupt storage file {}: {e}", path.display()))?
            }
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), entries = data.len(), "opened session storage");
        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, data: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(data)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update(&self, apply: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<()> {
        let mut data = self
            .data
            .write()
            .map_err(|e| anyhow::anyhow!("lock error: {e}"))?;
        apply(&mut data);
        self.persist(&data)
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let data = self
            .data
            .read()
            .map_err(|e| anyhow::anyhow!("lock error: {e}"))?;
        Ok(data.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(|data| {
            data.insert(key.to_string(), value.to_string());
        })
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> Result<()> {
        self.update(|data| {
            for (key, value) in entries {
                data.insert(key.to_string(), value.to_string());
            }
        })
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.update(|data| {
            data.remove(key);
        })
    }

    fn delete_many(&self, keys: &[&str]) -> Result<()> {
        self.update(|data| {
            for key in keys {
                data.remove(*key);
            }
        })
    }
}
