//! Delivery Engine
//!
//! Publish-side fan-out, retained replay and session teardown. Every path
//! that hands a message to a session goes through [`Session::deliver`], so
//! QoS tracking, flow control and ordering live in one place.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use super::{BrokerEvent, Context};
use crate::protocol::{ApplicationMessage, QoS};
use crate::session::{DeliveryOutcome, DisconnectKind, InflightMessage, Session};

/// The message as seen by one subscriber
pub(crate) fn as_delivered(
    message: &ApplicationMessage,
    qos: QoS,
    retain: bool,
) -> ApplicationMessage {
    ApplicationMessage {
        qos,
        retain,
        ..message.clone()
    }
}

impl Context {
    /// Route a message to every matching session.
    ///
    /// Retained messages update the retained store first. Each subscriber
    /// gets the message at the lower of the published and granted QoS, with
    /// the retain flag cleared.
    pub(crate) async fn dispatch(&self, origin: Option<&Arc<str>>, message: ApplicationMessage) {
        self.emit(BrokerEvent::MessageReceived {
            client_id: origin.cloned(),
            message: message.clone(),
        });

        if message.retain && self.config.retain_available {
            self.retained.on_publish(&message).await;
        }

        let subscribers = self.subscriptions.matches(&message.topic);
        trace!(topic = %message.topic, subscribers = subscribers.len(), "routing message");

        for subscriber in subscribers {
            let Some(session) = self.sessions.get(&subscriber.client_id) else {
                continue;
            };
            let qos = message.qos.min(subscriber.qos);
            let outcome = {
                let mut s = session.write();
                // Filters of a replaced incarnation
                if s.session_id != subscriber.session_id {
                    continue;
                }
                s.deliver(&message, qos, false)
            };
            self.record_outcome(&subscriber.client_id, &message, qos, false, outcome);
        }

        self.hooks
            .on_message_published(
                origin.map(|id| &**id),
                &message.topic,
                &message.payload,
                message.qos,
            )
            .await;
    }

    /// Deliver the retained messages matching `filter` to a session that
    /// was just granted a subscription to it
    pub(crate) fn replay_retained(
        &self,
        session: &Arc<RwLock<Session>>,
        filter: &str,
        granted: QoS,
    ) {
        if !self.config.retain_available {
            return;
        }

        let messages = self.retained.snapshot_matching(filter);
        if messages.is_empty() {
            return;
        }

        let client_id = session.read().client_id.clone();
        debug!(
            client_id = %client_id,
            filter,
            count = messages.len(),
            "replaying retained messages"
        );

        for message in messages {
            let qos = message.qos.min(granted);
            let outcome = session.write().deliver(&message, qos, true);
            self.record_outcome(&client_id, &message, qos, true, outcome);
        }
    }

    fn record_outcome(
        &self,
        client_id: &Arc<str>,
        message: &ApplicationMessage,
        qos: QoS,
        retain: bool,
        outcome: DeliveryOutcome,
    ) {
        match outcome {
            DeliveryOutcome::Sent { packet_id: None } => {
                self.emit(BrokerEvent::MessageDelivered {
                    client_id: client_id.clone(),
                    message: as_delivered(message, qos, retain),
                });
            }
            DeliveryOutcome::Sent { packet_id: Some(_) }
            | DeliveryOutcome::Queued { dropped: None } => {}
            DeliveryOutcome::Queued {
                dropped: Some(dropped),
            } => {
                debug!(
                    client_id = %client_id,
                    topic = %dropped.message.topic,
                    "pending queue full, dropped oldest message"
                );
                self.emit(BrokerEvent::MessageDropped {
                    client_id: client_id.clone(),
                    message: as_delivered(&dropped.message, dropped.qos, dropped.retain),
                });
            }
            DeliveryOutcome::Dropped => {
                debug!(
                    client_id = %client_id,
                    topic = %message.topic,
                    "outbound link full, dropped QoS 0 message"
                );
                self.emit(BrokerEvent::MessageDropped {
                    client_id: client_id.clone(),
                    message: as_delivered(message, qos, retain),
                });
            }
            DeliveryOutcome::Closed => {
                trace!(client_id = %client_id, "session closed, message not delivered");
            }
        }
    }

    /// Report an acknowledged QoS 1/2 delivery
    pub(crate) fn delivered(&self, client_id: &Arc<str>, inflight: &InflightMessage) {
        self.emit(BrokerEvent::MessageDelivered {
            client_id: client_id.clone(),
            message: as_delivered(&inflight.message, inflight.qos, inflight.retain),
        });
    }

    /// Tear a session down.
    ///
    /// The single exit path for every disconnect outcome: abandons the
    /// session's trackers, removes its subscriptions and its table entry,
    /// publishes the will when `kind` calls for it, then marks the session
    /// disconnected and wakes its worker. Later calls for the same session
    /// do nothing.
    pub(crate) async fn teardown(&self, session: &Arc<RwLock<Session>>, kind: DisconnectKind) {
        let (client_id, session_id, will) = {
            let mut s = session.write();
            let Some(will) = s.begin_disconnect(kind) else {
                return;
            };
            (s.client_id.clone(), s.session_id, will)
        };

        let removed = self.subscriptions.unsubscribe_all(&client_id, session_id);
        self.sessions.remove(&client_id, session);

        if let Some(will) = will {
            debug!(client_id = %client_id, topic = %will.topic, "publishing will message");
            self.dispatch(Some(&client_id), will).await;
        }

        session.write().finish_disconnect();
        debug!(client_id = %client_id, %kind, subscriptions = removed, "session closed");

        self.emit(BrokerEvent::ClientDisconnected {
            client_id: client_id.clone(),
            kind,
        });
        self.hooks.on_client_disconnected(&client_id, kind).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerConfig;
    use crate::hooks::DefaultHooks;
    use crate::protocol::{Packet, Publish};
    use crate::retained::RetainedStore;
    use crate::session::{SessionState, SessionStore};
    use crate::topic::SubscriptionStore;
    use bytes::Bytes;
    use tokio::sync::{broadcast, mpsc};

    fn context() -> (Context, broadcast::Receiver<BrokerEvent>) {
        let (events, rx) = broadcast::channel(64);
        let ctx = Context {
            config: BrokerConfig::default(),
            sessions: SessionStore::new(),
            subscriptions: SubscriptionStore::new(),
            retained: RetainedStore::new(None),
            events,
            hooks: Arc::new(DefaultHooks),
        };
        (ctx, rx)
    }

    fn connect(ctx: &Context, client_id: &str) -> (Arc<RwLock<Session>>, mpsc::Receiver<Packet>) {
        let (tx, rx) = mpsc::channel(16);
        let mut session = Session::new(Arc::from(client_id), tx);
        session.state = SessionState::Connected;
        let session = Arc::new(RwLock::new(session));
        ctx.sessions.insert(session.clone());
        (session, rx)
    }

    fn subscribe(ctx: &Context, session: &Arc<RwLock<Session>>, filter: &str, qos: QoS) {
        let (client_id, session_id) = {
            let s = session.read();
            (s.client_id.clone(), s.session_id)
        };
        ctx.subscriptions.subscribe(&client_id, session_id, filter, qos);
    }

    fn publish(rx: &mut mpsc::Receiver<Packet>) -> Publish {
        match rx.try_recv() {
            Ok(Packet::Publish(publish)) => publish,
            other => panic!("expected PUBLISH, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dispatch_downgrades_and_clears_retain() {
        let (ctx, _events) = context();
        let (low, mut low_rx) = connect(&ctx, "low");
        let (high, mut high_rx) = connect(&ctx, "high");
        subscribe(&ctx, &low, "t/#", QoS::AtMostOnce);
        subscribe(&ctx, &high, "t/+", QoS::ExactlyOnce);

        let message =
            ApplicationMessage::new("t/x", Bytes::from_static(b"v"), QoS::AtLeastOnce, true);
        ctx.dispatch(None, message).await;

        let to_low = publish(&mut low_rx);
        assert_eq!(to_low.qos, QoS::AtMostOnce);
        assert!(!to_low.retain);

        let to_high = publish(&mut high_rx);
        assert_eq!(to_high.qos, QoS::AtLeastOnce);
        assert!(to_high.packet_id.is_some());
        assert!(!to_high.retain);

        assert_eq!(ctx.retained.len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_skips_stale_incarnation() {
        let (ctx, _events) = context();
        let (old, mut old_rx) = connect(&ctx, "c1");
        subscribe(&ctx, &old, "t", QoS::AtMostOnce);

        // Same client id registered again without the old filters being swept
        let (_new, mut new_rx) = connect(&ctx, "c1");
        ctx.dispatch(None, ApplicationMessage::new("t", &b"v"[..], QoS::AtMostOnce, false))
            .await;

        assert!(old_rx.try_recv().is_err());
        assert!(new_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_replay_sets_retain_flag() {
        let (ctx, _events) = context();
        ctx.retained
            .on_publish(&ApplicationMessage::new("r/1", &b"a"[..], QoS::ExactlyOnce, true))
            .await;
        ctx.retained
            .on_publish(&ApplicationMessage::new("other", &b"b"[..], QoS::AtMostOnce, true))
            .await;

        let (session, mut rx) = connect(&ctx, "c1");
        ctx.replay_retained(&session, "r/#", QoS::AtLeastOnce);

        let replayed = publish(&mut rx);
        assert_eq!(&*replayed.topic, "r/1");
        assert!(replayed.retain);
        assert!(!replayed.dup);
        assert_eq!(replayed.qos, QoS::AtLeastOnce);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_teardown_publishes_will_once() {
        let (ctx, mut events) = context();
        let (watcher, mut watcher_rx) = connect(&ctx, "watcher");
        subscribe(&ctx, &watcher, "wills/#", QoS::AtMostOnce);

        let (victim, _victim_rx) = connect(&ctx, "victim");
        subscribe(&ctx, &victim, "x", QoS::AtMostOnce);
        victim.write().will = Some(ApplicationMessage::new(
            "wills/victim",
            &b"gone"[..],
            QoS::AtMostOnce,
            false,
        ));

        ctx.teardown(&victim, DisconnectKind::Abrupt).await;
        ctx.teardown(&victim, DisconnectKind::Abrupt).await;

        assert_eq!(&*publish(&mut watcher_rx).topic, "wills/victim");
        assert!(watcher_rx.try_recv().is_err());
        assert!(!ctx.sessions.contains("victim"));
        assert!(ctx.subscriptions.filters("victim").is_empty());
        assert_eq!(victim.read().state, SessionState::Disconnected);

        let mut disconnects = 0;
        while let Ok(event) = events.try_recv() {
            if let BrokerEvent::ClientDisconnected { client_id, kind } = event {
                assert_eq!(&*client_id, "victim");
                assert_eq!(kind, DisconnectKind::Abrupt);
                disconnects += 1;
            }
        }
        assert_eq!(disconnects, 1);
    }

    #[tokio::test]
    async fn test_full_link_reports_dropped_message() {
        let (ctx, mut events) = context();
        let (tx, _rx) = mpsc::channel(1);
        let mut session = Session::new(Arc::from("slow"), tx);
        session.state = SessionState::Connected;
        let session = Arc::new(RwLock::new(session));
        ctx.sessions.insert(session.clone());
        subscribe(&ctx, &session, "t", QoS::AtMostOnce);

        for _ in 0..2 {
            ctx.dispatch(None, ApplicationMessage::new("t", &b"v"[..], QoS::AtMostOnce, false))
                .await;
        }

        let mut delivered = 0;
        let mut dropped = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                BrokerEvent::MessageDelivered { .. } => delivered += 1,
                BrokerEvent::MessageDropped { .. } => dropped += 1,
                _ => {}
            }
        }
        assert_eq!((delivered, dropped), (1, 1));
    }
}
