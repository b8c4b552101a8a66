//! Discovered Limit Stores
//!
//! Persistence seam for limits learned from provider error responses.

use crate::capability::DiscoveredLimits;
use crate::error::{DispatchError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Key-value store of discovered limits, keyed by lowercase model name
pub trait DiscoveryStore: Send + Sync {
    fn get(&self, model: &str) -> Option<DiscoveredLimits>;

    fn set(&self, model: &str, limits: DiscoveredLimits) -> Result<()>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryDiscoveryStore {
    entries: RwLock<HashMap<String, DiscoveredLimits>>,
}

impl MemoryDiscoveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl DiscoveryStore for MemoryDiscoveryStore {
    fn get(&self, model: &str) -> Option<DiscoveredLimits> {
        self.entries.read().get(model).cloned()
    }

    fn set(&self, model: &str, limits: DiscoveredLimits) -> Result<()> {
        self.entries.write().insert(model.to_string(), limits);
        Ok(())
    }
}

/// Store backed by a JSON object on disk, rewritten on every update
#[derive(Debug)]
pub struct JsonFileDiscoveryStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, DiscoveredLimits>>,
}

impl JsonFileDiscoveryStore {
    /// Open a store file; a missing file starts empty
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&content).map_err(|e| {
                    DispatchError::Config(format!(
                        "Failed to parse discovery cache {}: {}",
                        path.display(),
                        e
                    ))
                })?
            }
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Open the store at its default location in the user cache directory
    pub fn open_default() -> Result<Self> {
        Self::open(Self::default_path())
    }

    pub fn default_path() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("llm-dispatch")
            .join("discovered_limits.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &HashMap<String, DiscoveredLimits>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| DispatchError::Internal(format!("Failed to encode cache: {}", e)))?;

        // Atomic replace
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl DiscoveryStore for JsonFileDiscoveryStore {
    fn get(&self, model: &str) -> Option<DiscoveredLimits> {
        self.entries.read().get(model).cloned()
    }

    fn set(&self, model: &str, limits: DiscoveredLimits) -> Result<()> {
        let mut entries = self.entries.write();
        entries.insert(model.to_string(), limits);
        self.persist(&entries)
    }
}
