//! Session Management
//!
//! Handles session state, in-flight QoS trackers, the pending outbound
//! queue and packet identifier allocation for one logical client.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tracing::trace;

use crate::protocol::{ApplicationMessage, Packet, PubRel, Publish, QoS};


/// Source of session incarnation numbers
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Identity not yet established
    Connecting,
    /// Registered in the session table and accepting traffic
    Connected,
    /// Teardown in progress
    Disconnecting,
    /// Terminal
    Disconnected,
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectKind {
    /// Client sent DISCONNECT; the will is dropped
    Clean,
    /// Transport closed or keep-alive expired; the will is published
    Abrupt,
    /// Another connection took over the client identifier; the will is
    /// published unless the new connection asked for a clean takeover
    Replaced,
    /// Broker shutdown; the will is dropped
    Shutdown,
}

impl DisconnectKind {
    /// Whether this outcome publishes the session's will
    pub fn publishes_will(self) -> bool {
        matches!(self, DisconnectKind::Abrupt | DisconnectKind::Replaced)
    }
}

impl fmt::Display for DisconnectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DisconnectKind::Clean => "clean",
            DisconnectKind::Abrupt => "abrupt",
            DisconnectKind::Replaced => "replaced",
            DisconnectKind::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// QoS 2 message state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos2State {
    /// PUBLISH sent, waiting for PUBREC
    WaitingPubRec,
    /// PUBREC received, PUBREL sent, waiting for PUBCOMP
    WaitingPubComp,
}

/// Inflight message state for QoS 1/2
#[derive(Debug, Clone)]
pub struct InflightMessage {
    /// Packet identifier
    pub packet_id: u16,
    /// The message being delivered
    pub message: ApplicationMessage,
    /// Delivered QoS (AtLeastOnce or ExactlyOnce)
    pub qos: QoS,
    /// Retain flag as sent
    pub retain: bool,
    /// QoS 2 state
    pub qos2_state: Option<Qos2State>,
    /// Timestamp of the last transmission
    pub sent_at: Instant,
    /// Number of retransmission attempts
    pub retry_count: u32,
}

impl InflightMessage {
    /// The packet to retransmit for this tracker
    fn retransmission(&self) -> Packet {
        match self.qos2_state {
            Some(Qos2State::WaitingPubComp) => Packet::PubRel(PubRel::new(self.packet_id)),
            None | Some(Qos2State::WaitingPubRec) => {
                let mut publish =
                    self.message
                        .to_publish(self.qos, self.retain, Some(self.packet_id));
                publish.dup = true;
                Packet::Publish(publish)
            }
        }
    }
}

/// A QoS 1/2 message waiting for an in-flight slot
#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub message: ApplicationMessage,
    pub qos: QoS,
    pub retain: bool,
}

/// Result of handing a message to a session
#[derive(Debug)]
pub enum DeliveryOutcome {
    /// Written to the outbound link (QoS 0) or tracked in flight (QoS 1/2)
    Sent {
        packet_id: Option<u16>,
    },
    /// In-flight window full; parked in the pending queue. Carries the
    /// oldest queued message if the queue overflowed.
    Queued {
        dropped: Option<PendingMessage>,
    },
    /// QoS 0 message dropped because the outbound link is full
    Dropped,
    /// Session is not connected; nothing was sent
    Closed,
}

/// Result of receiving an inbound QoS 2 PUBLISH
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos2Receive {
    /// First receipt; route it
    First,
    /// Already awaiting PUBREL; acknowledge again without routing
    Duplicate,
    /// Too many identifiers awaiting PUBREL
    QuotaExceeded,
}

/// Client session
pub struct Session {
    /// Client identifier
    pub client_id: Arc<str>,
    /// Incarnation number, unique across all sessions of this process
    pub session_id: u64,
    /// Negotiated keep alive interval in seconds
    pub keep_alive: u16,
    /// Session state
    pub state: SessionState,
    /// Will message
    pub will: Option<ApplicationMessage>,
    /// Inflight outgoing messages (QoS 1/2)
    pub inflight_outgoing: HashMap<u16, InflightMessage>,
    /// Inbound QoS 2 packet identifiers awaiting PUBREL
    pub inflight_incoming: HashSet<u16>,
    /// QoS 1/2 messages waiting for an in-flight slot
    pub pending_messages: VecDeque<PendingMessage>,
    /// Maximum outgoing QoS 1/2 messages in flight
    pub max_inflight: usize,
    /// Maximum pending messages
    pub max_pending_messages: usize,
    /// Next packet identifier
    next_packet_id: u16,
    /// Outbound link to the transport adapter
    outgoing: mpsc::Sender<Packet>,
    /// Signalled when the broker closes this session
    close: Arc<Notify>,
}

impl Session {
    pub fn new(client_id: Arc<str>, outgoing: mpsc::Sender<Packet>) -> Self {
        Self {
            client_id,
            session_id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            keep_alive: 60,
            state: SessionState::Connecting,
            will: None,
            inflight_outgoing: HashMap::new(),
            inflight_incoming: HashSet::new(),
            pending_messages: VecDeque::new(),
            max_inflight: 32,
            max_pending_messages: 1000,
            next_packet_id: 1,
            outgoing,
            close: Arc::new(Notify::new()),
        }
    }

    /// Handle awaited by the session worker; notified when the broker closes the session
    pub fn close_signal(&self) -> Arc<Notify> {
        self.close.clone()
    }

    /// Outbound link, for packets the session worker sends itself
    pub fn outgoing(&self) -> mpsc::Sender<Packet> {
        self.outgoing.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Get next available packet identifier
    pub fn next_packet_id(&mut self) -> u16 {
        loop {
            let id = self.next_packet_id;
            self.next_packet_id = self.next_packet_id.wrapping_add(1);
            if self.next_packet_id == 0 {
                self.next_packet_id = 1;
            }

            // Make sure this ID is not in use
            if !self.inflight_outgoing.contains_key(&id) {
                return id;
            }
        }
    }

    /// Write a packet to the outbound link without waiting
    pub fn try_send(&self, packet: Packet) -> Result<(), TrySendError<Packet>> {
        self.outgoing.try_send(packet)
    }

    /// Hand an application message to this session at the given QoS.
    ///
    /// QoS 1/2 messages beyond the in-flight window wait in the pending
    /// queue. A tracked message that cannot be written right away stays in
    /// flight and goes out with the next retry.
    pub fn deliver(
        &mut self,
        message: &ApplicationMessage,
        qos: QoS,
        retain: bool,
    ) -> DeliveryOutcome {
        if self.state != SessionState::Connected {
            return DeliveryOutcome::Closed;
        }

        if qos == QoS::AtMostOnce {
            return match self.try_send(Packet::Publish(message.to_publish(qos, retain, None))) {
                Ok(()) => DeliveryOutcome::Sent { packet_id: None },
                Err(TrySendError::Full(_)) => DeliveryOutcome::Dropped,
                Err(TrySendError::Closed(_)) => DeliveryOutcome::Closed,
            };
        }

        if self.inflight_outgoing.len() >= self.max_inflight
            || !self.pending_messages.is_empty()
        {
            let dropped = if self.pending_messages.len() >= self.max_pending_messages {
                self.pending_messages.pop_front()
            } else {
                None
            };
            self.pending_messages.push_back(PendingMessage {
                message: message.clone(),
                qos,
                retain,
            });
            return DeliveryOutcome::Queued { dropped };
        }

        let packet_id = self.start_inflight(message.clone(), qos, retain);
        DeliveryOutcome::Sent {
            packet_id: Some(packet_id),
        }
    }

    /// Record a tracker and transmit the PUBLISH
    fn start_inflight(&mut self, message: ApplicationMessage, qos: QoS, retain: bool) -> u16 {
        let packet_id = self.next_packet_id();
        let publish: Publish = message.to_publish(qos, retain, Some(packet_id));

        self.inflight_outgoing.insert(
            packet_id,
            InflightMessage {
                packet_id,
                message,
                qos,
                retain,
                qos2_state: (qos == QoS::ExactlyOnce).then_some(Qos2State::WaitingPubRec),
                sent_at: Instant::now(),
                retry_count: 0,
            },
        );

        if let Err(e) = self.try_send(Packet::Publish(publish)) {
            trace!(
                client_id = %self.client_id,
                packet_id,
                "outbound link unavailable, PUBLISH left for retry: {}",
                e
            );
        }
        packet_id
    }

    /// Move pending messages into free in-flight slots
    fn release_pending(&mut self) {
        while self.inflight_outgoing.len() < self.max_inflight {
            let Some(pending) = self.pending_messages.pop_front() else {
                break;
            };
            self.start_inflight(pending.message, pending.qos, pending.retain);
        }
    }

    /// Handle PUBACK. Returns the retired tracker, or `None` if the
    /// identifier is unknown or not a QoS 1 delivery.
    pub fn handle_puback(&mut self, packet_id: u16) -> Option<InflightMessage> {
        match self.inflight_outgoing.get(&packet_id) {
            Some(inflight) if inflight.qos == QoS::AtLeastOnce => {}
            _ => return None,
        }
        let retired = self.inflight_outgoing.remove(&packet_id);
        self.release_pending();
        retired
    }

    /// Handle PUBREC. Returns true if PUBREL must be sent.
    pub fn handle_pubrec(&mut self, packet_id: u16) -> bool {
        match self.inflight_outgoing.get_mut(&packet_id) {
            Some(inflight) if inflight.qos == QoS::ExactlyOnce => {
                if inflight.qos2_state == Some(Qos2State::WaitingPubRec) {
                    inflight.qos2_state = Some(Qos2State::WaitingPubComp);
                    inflight.sent_at = Instant::now();
                }
                true
            }
            _ => false,
        }
    }

    /// Handle PUBCOMP. Returns the retired tracker.
    pub fn handle_pubcomp(&mut self, packet_id: u16) -> Option<InflightMessage> {
        match self.inflight_outgoing.get(&packet_id) {
            Some(inflight) if inflight.qos2_state == Some(Qos2State::WaitingPubComp) => {}
            _ => return None,
        }
        let retired = self.inflight_outgoing.remove(&packet_id);
        self.release_pending();
        retired
    }

    /// Record an inbound QoS 2 packet identifier
    pub fn receive_qos2(&mut self, packet_id: u16, max_awaiting_rel: usize) -> Qos2Receive {
        if self.inflight_incoming.contains(&packet_id) {
            return Qos2Receive::Duplicate;
        }
        if max_awaiting_rel > 0 && self.inflight_incoming.len() >= max_awaiting_rel {
            return Qos2Receive::QuotaExceeded;
        }
        self.inflight_incoming.insert(packet_id);
        Qos2Receive::First
    }

    /// Handle PUBREL. Returns false if the identifier was not awaiting release.
    pub fn release_incoming(&mut self, packet_id: u16) -> bool {
        self.inflight_incoming.remove(&packet_id)
    }

    /// Retransmit trackers older than `retry_interval`.
    ///
    /// Trackers that already used `max_retries` retransmissions are retired
    /// and returned as failed deliveries.
    pub fn retry_unacked(
        &mut self,
        retry_interval: Duration,
        max_retries: u32,
    ) -> Vec<InflightMessage> {
        if self.state != SessionState::Connected {
            return Vec::new();
        }

        let now = Instant::now();
        let mut expired = Vec::new();
        let mut link_full = false;

        for (packet_id, inflight) in self.inflight_outgoing.iter_mut() {
            if now.duration_since(inflight.sent_at) < retry_interval {
                continue;
            }
            if inflight.retry_count >= max_retries {
                expired.push(*packet_id);
                continue;
            }
            if link_full {
                continue;
            }

            // Only a retransmission that reached the link counts as an attempt
            let packet = inflight.retransmission();
            trace!(client_id = %self.client_id, "retrying {}", packet.name());
            match self.outgoing.try_send(packet) {
                Ok(()) => {
                    inflight.retry_count += 1;
                    inflight.sent_at = now;
                }
                Err(_) => link_full = true,
            }
        }

        let failed: Vec<_> = expired
            .into_iter()
            .filter_map(|id| self.inflight_outgoing.remove(&id))
            .collect();
        if !failed.is_empty() {
            self.release_pending();
        }
        failed
    }

    /// Begin teardown. Abandons all trackers and the pending queue, and
    /// returns the will if `kind` publishes it. Returns `None` if teardown
    /// already started.
    pub fn begin_disconnect(
        &mut self,
        kind: DisconnectKind,
    ) -> Option<Option<ApplicationMessage>> {
        if matches!(
            self.state,
            SessionState::Disconnecting | SessionState::Disconnected
        ) {
            return None;
        }
        self.state = SessionState::Disconnecting;

        self.inflight_outgoing.clear();
        self.inflight_incoming.clear();
        self.pending_messages.clear();

        let will = self.will.take();
        Some(if kind.publishes_will() { will } else { None })
    }

    /// Finish teardown and wake the session worker
    pub fn finish_disconnect(&mut self) {
        self.state = SessionState::Disconnected;
        self.close.notify_one();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("client_id", &self.client_id)
            .field("session_id", &self.session_id)
            .field("state", &self.state)
            .field("inflight_outgoing", &self.inflight_outgoing.len())
            .field("inflight_incoming", &self.inflight_incoming.len())
            .field("pending_messages", &self.pending_messages.len())
            .finish()
    }
}

/// Thread-safe session store
pub struct SessionStore {
    sessions: DashMap<Arc<str>, Arc<RwLock<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Register a session, returning the one it replaces
    pub fn insert(&self, session: Arc<RwLock<Session>>) -> Option<Arc<RwLock<Session>>> {
        let client_id = session.read().client_id.clone();
        self.sessions.insert(client_id, session)
    }

    /// Get a session by client ID
    pub fn get(&self, client_id: &str) -> Option<Arc<RwLock<Session>>> {
        self.sessions.get(client_id).map(|r| r.clone())
    }

    /// Remove `session` from the table if it is still the registered one
    pub fn remove(&self, client_id: &str, session: &Arc<RwLock<Session>>) -> bool {
        self.sessions
            .remove_if(client_id, |_, current| Arc::ptr_eq(current, session))
            .is_some()
    }

    /// Snapshot of all registered sessions
    pub fn all(&self) -> Vec<Arc<RwLock<Session>>> {
        self.sessions.iter().map(|r| r.value().clone()).collect()
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.sessions.contains_key(client_id)
    }

    /// Get session count
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
