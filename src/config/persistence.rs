//! Persistence configuration.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use crate::persistence::{self, FjallStorage, MemoryStorage, RetainedStorage};

/// Backend type for persistence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// In-process storage; lives as long as the process
    #[default]
    Memory,
    /// Fjall (local LSM-tree storage)
    Fjall,
}

/// Persistence configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Enable retained message persistence
    pub enabled: bool,

    /// Backend type
    pub backend: BackendType,

    /// Data directory path (for fjall)
    pub path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: BackendType::Memory,
            path: PathBuf::from("./data"),
        }
    }
}

impl PersistenceConfig {
    /// Open the configured storage, or `None` when persistence is disabled
    pub fn open_storage(&self) -> persistence::Result<Option<Arc<dyn RetainedStorage>>> {
        if !self.enabled {
            return Ok(None);
        }

        let storage: Arc<dyn RetainedStorage> = match self.backend {
            BackendType::Memory => Arc::new(MemoryStorage::new()),
            BackendType::Fjall => {
                std::fs::create_dir_all(&self.path)?;
                Arc::new(FjallStorage::open(&self.path)?)
            }
        };
        Ok(Some(storage))
    }
}
