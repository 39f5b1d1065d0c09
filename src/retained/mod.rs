//! Retained Message Store
//!
//! Maps topic names to the last retained message published to them. Every
//! mutation hands the full retained set to the configured storage; a failed
//! save is logged and retried on the next mutation (or on [`RetainedStore::flush`]).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::persistence::{self, RetainedStorage};
use crate::protocol::ApplicationMessage;
use crate::topic::topic_matches_filter;

pub struct RetainedStore {
    messages: RwLock<AHashMap<Arc<str>, ApplicationMessage>>,
    storage: Option<Arc<dyn RetainedStorage>>,
    /// Serializes saves so a slower save never overwrites a newer snapshot
    save_lock: tokio::sync::Mutex<()>,
    /// Set when the last save failed
    dirty: AtomicBool,
}

impl RetainedStore {
    pub fn new(storage: Option<Arc<dyn RetainedStorage>>) -> Self {
        Self {
            messages: RwLock::new(AHashMap::new()),
            storage,
            save_lock: tokio::sync::Mutex::new(()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Seed the store from storage, replacing the in-memory set.
    /// Returns the number of messages loaded.
    pub async fn load(&self) -> persistence::Result<usize> {
        let Some(storage) = &self.storage else {
            return Ok(0);
        };

        let loaded = storage.load().await?;
        let mut messages = self.messages.write();
        messages.clear();
        for message in loaded {
            if message.payload.is_empty() {
                continue;
            }
            messages.insert(message.topic.clone(), message);
        }
        Ok(messages.len())
    }

    /// Apply a retained publish: an empty payload deletes the topic's
    /// entry, anything else replaces it. Messages without the retain flag
    /// are ignored. Returns whether the store changed.
    pub async fn on_publish(&self, message: &ApplicationMessage) -> bool {
        if !message.retain {
            return false;
        }

        let changed = {
            let mut messages = self.messages.write();
            if message.clears_retained() {
                messages.remove(&message.topic).is_some()
            } else {
                let mut stored = message.clone();
                stored.retain = true;
                messages.insert(message.topic.clone(), stored);
                true
            }
        };

        if changed || self.dirty.load(Ordering::Acquire) {
            self.save().await;
        }
        changed
    }

    /// All retained messages whose topic matches `filter`
    pub fn snapshot_matching(&self, filter: &str) -> Vec<ApplicationMessage> {
        self.messages
            .read()
            .values()
            .filter(|message| topic_matches_filter(&message.topic, filter))
            .cloned()
            .collect()
    }

    pub fn get(&self, topic: &str) -> Option<ApplicationMessage> {
        self.messages.read().get(topic).cloned()
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }

    /// Save again if the last save failed
    pub async fn flush(&self) {
        if self.dirty.load(Ordering::Acquire) {
            self.save().await;
        }
    }

    async fn save(&self) {
        let Some(storage) = &self.storage else {
            return;
        };

        let _guard = self.save_lock.lock().await;
        let snapshot: Vec<ApplicationMessage> = self.messages.read().values().cloned().collect();

        match storage.save(&snapshot).await {
            Ok(()) => {
                self.dirty.store(false, Ordering::Release);
                debug!(count = snapshot.len(), "saved retained messages");
            }
            Err(e) => {
                self.dirty.store(true, Ordering::Release);
                warn!("Failed to save retained messages: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{MemoryStorage, PersistenceError};
    use crate::protocol::QoS;
    use async_trait::async_trait;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    fn retained(topic: &str, payload: &'static [u8]) -> ApplicationMessage {
        ApplicationMessage::new(topic, Bytes::from_static(payload), QoS::AtLeastOnce, true)
    }

    /// Storage whose saves fail until `healthy` is set
    #[derive(Default)]
    struct FlakyStorage {
        healthy: AtomicBool,
        inner: MemoryStorage,
    }

    #[async_trait]
    impl RetainedStorage for FlakyStorage {
        async fn save(&self, messages: &[ApplicationMessage]) -> persistence::Result<()> {
            if !self.healthy.load(Ordering::SeqCst) {
                return Err(PersistenceError::Io(std::io::Error::other("disk full")));
            }
            self.inner.save(messages).await
        }

        async fn load(&self) -> persistence::Result<Vec<ApplicationMessage>> {
            self.inner.load().await
        }
    }

    #[tokio::test]
    async fn test_upsert_and_clear() {
        let store = RetainedStore::new(None);
        assert!(store.on_publish(&retained("a/b", b"1")).await);
        assert!(store.on_publish(&retained("a/b", b"2")).await);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a/b").unwrap().payload, Bytes::from_static(b"2"));

        assert!(store.on_publish(&retained("a/b", b"")).await);
        assert!(store.is_empty());
        // Clearing an absent topic changes nothing
        assert!(!store.on_publish(&retained("a/b", b"")).await);
    }

    #[tokio::test]
    async fn test_non_retained_publish_is_ignored() {
        let store = RetainedStore::new(None);
        let message = ApplicationMessage::new("t", &b"x"[..], QoS::AtMostOnce, false);
        assert!(!store.on_publish(&message).await);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_matching() {
        let store = RetainedStore::new(None);
        store.on_publish(&retained("sport/tennis", b"1")).await;
        store.on_publish(&retained("sport/golf", b"2")).await;
        store.on_publish(&retained("news", b"3")).await;
        store.on_publish(&retained("$SYS/uptime", b"4")).await;

        let mut topics: Vec<_> = store
            .snapshot_matching("sport/+")
            .into_iter()
            .map(|m| m.topic.to_string())
            .collect();
        topics.sort();
        assert_eq!(topics, vec!["sport/golf", "sport/tennis"]);

        // # never replays $-topics
        assert_eq!(store.snapshot_matching("#").len(), 3);
        assert!(store.snapshot_matching("weather").is_empty());
    }

    #[tokio::test]
    async fn test_every_mutation_saves_full_set() {
        let storage = MemoryStorage::new();
        let store = RetainedStore::new(Some(Arc::new(storage.clone())));

        store.on_publish(&retained("a", b"1")).await;
        store.on_publish(&retained("b", b"2")).await;
        assert_eq!(storage.saved().len(), 2);

        store.on_publish(&retained("a", b"")).await;
        assert_eq!(storage.saved(), vec![retained("b", b"2")]);
    }

    #[tokio::test]
    async fn test_load_seeds_store() {
        let storage = MemoryStorage::new();
        storage.save(&[retained("x", b"1")]).await.unwrap();

        let store = RetainedStore::new(Some(Arc::new(storage)));
        assert_eq!(store.load().await.unwrap(), 1);
        assert_eq!(store.snapshot_matching("x").len(), 1);
    }

    #[tokio::test]
    async fn test_failed_save_is_retried_on_next_mutation() {
        let storage = Arc::new(FlakyStorage::default());
        let store = RetainedStore::new(Some(storage.clone()));

        store.on_publish(&retained("a", b"1")).await;
        assert!(storage.inner.saved().is_empty());
        // In-memory state is unaffected by the failure
        assert_eq!(store.len(), 1);

        storage.healthy.store(true, Ordering::SeqCst);
        store.on_publish(&retained("b", b"2")).await;
        assert_eq!(storage.inner.saved().len(), 2);
    }

    #[tokio::test]
    async fn test_flush_retries_failed_save() {
        let storage = Arc::new(FlakyStorage::default());
        let store = RetainedStore::new(Some(storage.clone()));

        store.on_publish(&retained("a", b"1")).await;
        storage.healthy.store(true, Ordering::SeqCst);
        store.flush().await;
        assert_eq!(storage.inner.saved(), vec![retained("a", b"1")]);
    }
}
