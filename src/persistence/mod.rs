//! Persistence for retained messages.
//!
//! The retained store hands its full current set to a [`RetainedStorage`]
//! after every mutation and seeds itself from it once at startup. Backends:
//! - [`MemoryStorage`] - in-process, shareable across broker restarts
//! - [`FjallStorage`] - local LSM-tree storage

mod error;
mod fjall;
mod models;

pub use error::{PersistenceError, Result};
pub use fjall::FjallStorage;
pub use models::StoredRetainedMessage;

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::protocol::ApplicationMessage;

/// Storage capability for the retained message set
#[async_trait]
pub trait RetainedStorage: Send + Sync {
    /// Persist the complete current retained set, replacing what was stored
    async fn save(&self, messages: &[ApplicationMessage]) -> Result<()>;

    /// Load the retained set; called once at broker startup
    async fn load(&self) -> Result<Vec<ApplicationMessage>>;
}

#[async_trait]
impl<T: RetainedStorage + ?Sized> RetainedStorage for Arc<T> {
    async fn save(&self, messages: &[ApplicationMessage]) -> Result<()> {
        (**self).save(messages).await
    }

    async fn load(&self) -> Result<Vec<ApplicationMessage>> {
        (**self).load().await
    }
}

/// In-memory storage.
///
/// Clones share the same underlying set, so a clone handed to a new broker
/// instance sees what the previous instance saved.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    messages: Arc<Mutex<Vec<ApplicationMessage>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the last saved set
    pub fn saved(&self) -> Vec<ApplicationMessage> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl RetainedStorage for MemoryStorage {
    async fn save(&self, messages: &[ApplicationMessage]) -> Result<()> {
        *self.messages.lock() = messages.to_vec();
        Ok(())
    }

    async fn load(&self) -> Result<Vec<ApplicationMessage>> {
        Ok(self.messages.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::QoS;
    use pretty_assertions::assert_eq;

    fn retained(topic: &str, payload: &'static [u8]) -> ApplicationMessage {
        ApplicationMessage::new(topic, payload, QoS::AtLeastOnce, true)
    }

    #[tokio::test]
    async fn test_memory_storage_is_shared_between_clones() {
        let storage = MemoryStorage::new();
        let other = storage.clone();

        storage.save(&[retained("a", b"1")]).await.unwrap();
        assert_eq!(other.load().await.unwrap(), vec![retained("a", b"1")]);
    }

    #[tokio::test]
    async fn test_fjall_storage_replaces_set() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = FjallStorage::open(temp_dir.path()).unwrap();

        storage
            .save(&[retained("a", b"1"), retained("b", b"2")])
            .await
            .unwrap();
        assert_eq!(storage.load().await.unwrap().len(), 2);

        // "a" dropped from the set must disappear from disk
        storage.save(&[retained("b", b"3")]).await.unwrap();
        assert_eq!(storage.load().await.unwrap(), vec![retained("b", b"3")]);
    }

    #[tokio::test]
    async fn test_fjall_storage_survives_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        {
            let storage = FjallStorage::open(temp_dir.path()).unwrap();
            storage.save(&[retained("x/y", b"hello")]).await.unwrap();
        }

        let storage = FjallStorage::open(temp_dir.path()).unwrap();
        assert_eq!(storage.load().await.unwrap(), vec![retained("x/y", b"hello")]);
    }
}
