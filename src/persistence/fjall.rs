//! Fjall-based retained message storage.
//!
//! Uses fjall (an LSM-tree based embedded database) for local persistence.
//! Retained messages live in their own partition keyed by topic name.

use std::path::Path;

use ahash::AHashSet;
use async_trait::async_trait;
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};

use super::error::{PersistenceError, Result};
use super::models::StoredRetainedMessage;
use super::RetainedStorage;
use crate::protocol::ApplicationMessage;

/// Fjall-based storage backend
pub struct FjallStorage {
    keyspace: Keyspace,
    retained: PartitionHandle,
}

impl FjallStorage {
    /// Open a fjall keyspace at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let keyspace = Config::new(path).open()?;
        let retained = keyspace.open_partition("retained", PartitionCreateOptions::default())?;

        Ok(Self { keyspace, retained })
    }

    /// Serialize a value using bincode
    fn serialize<T: bincode::Encode>(value: &T) -> Result<Vec<u8>> {
        bincode::encode_to_vec(value, bincode::config::standard()).map_err(PersistenceError::from)
    }

    /// Deserialize a value using bincode
    fn deserialize<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T> {
        bincode::decode_from_slice(bytes, bincode::config::standard())
            .map(|(value, _)| value)
            .map_err(PersistenceError::from)
    }
}

#[async_trait]
impl RetainedStorage for FjallStorage {
    /// Replace the stored set with `messages` in one atomic batch, then sync
    async fn save(&self, messages: &[ApplicationMessage]) -> Result<()> {
        let current: AHashSet<&[u8]> = messages.iter().map(|m| m.topic.as_bytes()).collect();

        let mut stale = Vec::new();
        for item in self.retained.keys() {
            let key = item?;
            if !current.contains(&*key) {
                stale.push(key);
            }
        }

        let mut batch = self.keyspace.batch();
        for key in stale {
            batch.remove(&self.retained, key);
        }
        for message in messages {
            let bytes = Self::serialize(&StoredRetainedMessage::from(message))?;
            batch.insert(&self.retained, message.topic.as_bytes(), bytes);
        }
        batch.commit()?;

        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }

    async fn load(&self) -> Result<Vec<ApplicationMessage>> {
        let mut result = Vec::new();
        for item in self.retained.iter() {
            let (_, value) = item?;
            let stored: StoredRetainedMessage = Self::deserialize(&value)?;
            result.push(ApplicationMessage::try_from(stored)?);
        }
        Ok(result)
    }
}
