//! Topic matching and subscription management
//!
//! Implements topic name/filter validation and the subscription registry.
//!
//! The registry is keyed by client identifier and sharded through a
//! `DashMap`, so subscribe/unsubscribe calls from different sessions and
//! concurrent fan-out queries never contend on a single global lock.

pub mod validation;

pub use validation::{
    topic_matches_filter, validate_topic_filter, validate_topic_filter_with_max_levels,
    validate_topic_name, validate_topic_name_with_max_levels,
};

use ahash::AHashMap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use smallvec::SmallVec;
use std::sync::Arc;

use crate::protocol::QoS;

/// A matching subscriber: the client and the highest QoS granted to it
/// among all of its filters that match the topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    pub client_id: Arc<str>,
    /// Incarnation of the session that subscribed
    pub session_id: u64,
    pub qos: QoS,
}

/// The filter set of one session
#[derive(Debug)]
struct SessionSubscriptions {
    /// Incarnation of the session owning these filters
    session_id: u64,
    filters: AHashMap<String, QoS>,
}

/// Thread-safe subscription registry
pub struct SubscriptionStore {
    sessions: DashMap<Arc<str>, SessionSubscriptions>,
}

impl SubscriptionStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Add or replace a subscription.
    ///
    /// Subscribing to a filter the session already holds replaces the
    /// granted QoS. Filters left behind by an older incarnation of the same
    /// client identifier are discarded first; a registration from an older
    /// incarnation than the current owner is ignored. Returns the previously
    /// granted QoS, if any.
    pub fn subscribe(
        &self,
        client_id: &Arc<str>,
        session_id: u64,
        filter: &str,
        qos: QoS,
    ) -> Option<QoS> {
        match self.sessions.entry(client_id.clone()) {
            Entry::Occupied(mut entry) => {
                let subs = entry.get_mut();
                if session_id < subs.session_id {
                    return None;
                }
                if subs.session_id != session_id {
                    subs.session_id = session_id;
                    subs.filters.clear();
                }
                subs.filters.insert(filter.to_string(), qos)
            }
            Entry::Vacant(entry) => {
                let mut filters = AHashMap::with_capacity(4);
                filters.insert(filter.to_string(), qos);
                entry.insert(SessionSubscriptions {
                    session_id,
                    filters,
                });
                None
            }
        }
    }

    /// Remove a subscription held by the given session incarnation.
    /// Idempotent; returns whether the filter existed.
    pub fn unsubscribe(&self, client_id: &str, session_id: u64, filter: &str) -> bool {
        let removed = match self.sessions.get_mut(client_id) {
            Some(mut subs) if subs.session_id == session_id => {
                subs.filters.remove(filter).is_some()
            }
            _ => return false,
        };

        if removed {
            self.sessions
                .remove_if(client_id, |_, subs| subs.filters.is_empty());
        }
        removed
    }

    /// Remove all subscriptions for a client, but only when they belong to
    /// the given session incarnation. Returns the number of filters removed.
    pub fn unsubscribe_all(&self, client_id: &str, session_id: u64) -> usize {
        self.sessions
            .remove_if(client_id, |_, subs| subs.session_id == session_id)
            .map(|(_, subs)| subs.filters.len())
            .unwrap_or(0)
    }

    /// Find all sessions with at least one filter matching `topic`.
    ///
    /// Each session appears once, with the highest QoS among its matching
    /// filters. Most topics have few subscribers, so the result stays inline.
    pub fn matches(&self, topic: &str) -> SmallVec<[Subscriber; 16]> {
        let mut result: SmallVec<[Subscriber; 16]> = SmallVec::new();

        for entry in self.sessions.iter() {
            let best = entry
                .filters
                .iter()
                .filter(|(filter, _)| topic_matches_filter(topic, filter))
                .map(|(_, qos)| *qos)
                .max();

            if let Some(qos) = best {
                result.push(Subscriber {
                    client_id: entry.key().clone(),
                    session_id: entry.session_id,
                    qos,
                });
            }
        }

        result
    }

    /// Filters currently held by a client, with their granted QoS
    pub fn filters(&self, client_id: &str) -> Vec<(String, QoS)> {
        self.sessions
            .get(client_id)
            .map(|subs| {
                subs.filters
                    .iter()
                    .map(|(filter, qos)| (filter.clone(), *qos))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Total number of subscriptions across all sessions
    pub fn subscription_count(&self) -> usize {
        self.sessions.iter().map(|subs| subs.filters.len()).sum()
    }

    /// Number of sessions holding at least one subscription
    pub fn subscriber_count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for SubscriptionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn id(s: &str) -> Arc<str> {
        Arc::from(s)
    }

    fn sorted(mut subs: SmallVec<[Subscriber; 16]>) -> Vec<(String, QoS)> {
        subs.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        subs.into_iter()
            .map(|s| (s.client_id.to_string(), s.qos))
            .collect()
    }

    #[test]
    fn test_subscribe_and_match() {
        let store = SubscriptionStore::new();
        store.subscribe(&id("c1"), 1, "sport/+/player1", QoS::AtLeastOnce);
        store.subscribe(&id("c2"), 2, "sport/#", QoS::AtMostOnce);
        store.subscribe(&id("c3"), 3, "news/#", QoS::ExactlyOnce);

        assert_eq!(
            sorted(store.matches("sport/tennis/player1")),
            vec![
                ("c1".to_string(), QoS::AtLeastOnce),
                ("c2".to_string(), QoS::AtMostOnce),
            ]
        );
        assert!(store.matches("weather").is_empty());
    }

    #[test]
    fn test_overlapping_filters_yield_highest_qos_once() {
        let store = SubscriptionStore::new();
        let c1 = id("c1");
        store.subscribe(&c1, 1, "a/#", QoS::AtMostOnce);
        store.subscribe(&c1, 1, "a/+", QoS::ExactlyOnce);
        store.subscribe(&c1, 1, "a/b", QoS::AtLeastOnce);

        assert_eq!(
            sorted(store.matches("a/b")),
            vec![("c1".to_string(), QoS::ExactlyOnce)]
        );
    }

    #[test]
    fn test_resubscribe_replaces_qos() {
        let store = SubscriptionStore::new();
        let c1 = id("c1");
        assert_eq!(store.subscribe(&c1, 1, "t", QoS::ExactlyOnce), None);
        assert_eq!(
            store.subscribe(&c1, 1, "t", QoS::AtMostOnce),
            Some(QoS::ExactlyOnce)
        );
        assert_eq!(store.subscription_count(), 1);
        assert_eq!(
            sorted(store.matches("t")),
            vec![("c1".to_string(), QoS::AtMostOnce)]
        );
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let store = SubscriptionStore::new();
        let c1 = id("c1");
        store.subscribe(&c1, 1, "a", QoS::AtMostOnce);
        store.subscribe(&c1, 1, "b", QoS::AtMostOnce);

        assert!(store.unsubscribe("c1", 1, "a"));
        assert!(!store.unsubscribe("c1", 1, "a"));
        assert!(!store.unsubscribe("nobody", 1, "a"));
        assert!(store.matches("a").is_empty());
        assert_eq!(store.matches("b").len(), 1);

        assert!(store.unsubscribe("c1", 1, "b"));
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn test_stale_incarnation_cannot_unsubscribe() {
        let store = SubscriptionStore::new();
        let c1 = id("c1");
        store.subscribe(&c1, 1, "a", QoS::AtMostOnce);
        store.subscribe(&c1, 2, "a", QoS::AtLeastOnce);

        assert!(!store.unsubscribe("c1", 1, "a"));
        let matched = store.matches("a");
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].session_id, 2);

        assert!(store.unsubscribe("c1", 2, "a"));
        assert!(store.matches("a").is_empty());
    }

    #[test]
    fn test_unsubscribe_all_respects_session_incarnation() {
        let store = SubscriptionStore::new();
        let c1 = id("c1");
        store.subscribe(&c1, 1, "a", QoS::AtMostOnce);

        // A newer incarnation takes over the client id
        store.subscribe(&c1, 2, "b", QoS::AtLeastOnce);
        assert_eq!(store.filters("c1"), vec![("b".to_string(), QoS::AtLeastOnce)]);

        // The old incarnation's teardown must not remove the new filters
        assert_eq!(store.unsubscribe_all("c1", 1), 0);
        assert_eq!(store.matches("b").len(), 1);

        assert_eq!(store.unsubscribe_all("c1", 2), 1);
        assert!(store.matches("b").is_empty());
    }

    #[test]
    fn test_stale_incarnation_cannot_subscribe() {
        let store = SubscriptionStore::new();
        let c1 = id("c1");
        store.subscribe(&c1, 5, "new", QoS::AtLeastOnce);
        assert_eq!(store.subscribe(&c1, 4, "old", QoS::ExactlyOnce), None);

        assert_eq!(store.filters("c1"), vec![("new".to_string(), QoS::AtLeastOnce)]);
        let matched = store.matches("new");
        assert_eq!(matched[0].session_id, 5);
    }

    #[test]
    fn test_system_topics_need_explicit_filters() {
        let store = SubscriptionStore::new();
        store.subscribe(&id("all"), 1, "#", QoS::AtMostOnce);
        store.subscribe(&id("sys"), 2, "$SYS/#", QoS::AtMostOnce);

        assert_eq!(
            sorted(store.matches("$SYS/uptime")),
            vec![("sys".to_string(), QoS::AtMostOnce)]
        );
    }
}
