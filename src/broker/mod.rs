//! Broker Core
//!
//! The orchestrator: owns the session table, the subscription registry and
//! the retained store, runs one worker per connected session and
//! coordinates startup and shutdown.

mod connection;
mod delivery;

pub use connection::ConnectionError;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::hooks::{DefaultHooks, Hooks};
use crate::persistence::{PersistenceError, RetainedStorage};
use crate::protocol::{ApplicationMessage, ProtocolError, QoS};
use crate::retained::RetainedStore;
use crate::session::{DisconnectKind, SessionStore};
use crate::topic::{validate_topic_name_with_max_levels, SubscriptionStore};
use crate::transport::{channel_pair, ClientEnd, ClientLink};

use connection::Connection;

/// Broker configuration
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Maximum concurrently registered sessions
    pub max_connections: usize,
    /// Outgoing QoS 1/2 messages in flight per session
    pub max_inflight: usize,
    /// Messages waiting for an in-flight slot per session
    pub max_queued_messages: usize,
    /// Inbound QoS 2 messages awaiting PUBREL per session (0 = unbounded)
    pub max_awaiting_rel: usize,
    /// Time before an unacknowledged message is retransmitted
    pub retry_interval: Duration,
    /// Retransmissions before a delivery is reported as failed
    pub max_retries: u32,
    /// Capacity of each direction of a client link
    pub outbound_channel_capacity: usize,
    /// Default keep alive (if client specifies 0)
    pub default_keep_alive: u16,
    /// Maximum keep alive
    pub max_keep_alive: u16,
    /// Maximum QoS granted to subscriptions
    pub max_qos: QoS,
    /// Retain available
    pub retain_available: bool,
    /// Maximum topic levels (0 = unlimited)
    pub max_topic_levels: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_connections: 100_000,
            max_inflight: 32,
            max_queued_messages: 1000,
            max_awaiting_rel: 100,
            retry_interval: Duration::from_secs(10),
            max_retries: 3,
            outbound_channel_capacity: 1024,
            default_keep_alive: 60,
            max_keep_alive: 65535,
            max_qos: QoS::ExactlyOnce,
            retain_available: true,
            max_topic_levels: 0,
        }
    }
}

impl From<&Config> for BrokerConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_connections: config.limits.max_connections,
            max_inflight: usize::from(config.limits.max_inflight).max(1),
            max_queued_messages: config.limits.max_queued_messages,
            max_awaiting_rel: config.limits.max_awaiting_rel,
            retry_interval: config.limits.retry_interval,
            max_retries: config.limits.max_retries,
            outbound_channel_capacity: config.limits.outbound_channel_capacity.max(1),
            default_keep_alive: config.session.default_keep_alive,
            max_keep_alive: config.session.max_keep_alive,
            max_qos: QoS::from_u8(config.mqtt.max_qos).unwrap_or(QoS::ExactlyOnce),
            retain_available: config.mqtt.retain_available,
            max_topic_levels: config.mqtt.max_topic_levels,
        }
    }
}

/// Broker events
///
/// Messages carried by delivery events hold the QoS and retain flag they
/// were delivered with, not the ones they were published with.
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    /// Client connected and CONNACK sent
    ClientConnected { client_id: Arc<str> },
    /// Session torn down
    ClientDisconnected {
        client_id: Arc<str>,
        kind: DisconnectKind,
    },
    /// Application message accepted for routing. `client_id` is `None` for
    /// server-originated publishes.
    MessageReceived {
        client_id: Option<Arc<str>>,
        message: ApplicationMessage,
    },
    /// Message delivered to a session: handed to the link (QoS 0) or
    /// acknowledged (QoS 1/2)
    MessageDelivered {
        client_id: Arc<str>,
        message: ApplicationMessage,
    },
    /// Retries exhausted without acknowledgment
    DeliveryFailed {
        client_id: Arc<str>,
        packet_id: u16,
        message: ApplicationMessage,
    },
    /// Message discarded for one session: the link was full (QoS 0) or the
    /// pending queue overflowed
    MessageDropped {
        client_id: Arc<str>,
        message: ApplicationMessage,
    },
}

/// Broker error types
#[derive(Debug)]
pub enum BrokerError {
    /// Operation needs a started broker
    NotRunning,
    /// `start` called twice
    AlreadyRunning,
    /// Retained storage failed
    Persistence(PersistenceError),
    /// Rejected publish
    Protocol(ProtocolError),
    /// Link closed before the operation completed
    ChannelClosed,
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::NotRunning => write!(f, "Broker is not running"),
            BrokerError::AlreadyRunning => write!(f, "Broker is already running"),
            BrokerError::Persistence(e) => write!(f, "Persistence error: {}", e),
            BrokerError::Protocol(e) => write!(f, "Protocol error: {}", e),
            BrokerError::ChannelClosed => write!(f, "Channel closed"),
        }
    }
}

impl std::error::Error for BrokerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BrokerError::Persistence(e) => Some(e),
            BrokerError::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PersistenceError> for BrokerError {
    fn from(e: PersistenceError) -> Self {
        BrokerError::Persistence(e)
    }
}

impl From<ProtocolError> for BrokerError {
    fn from(e: ProtocolError) -> Self {
        BrokerError::Protocol(e)
    }
}

/// State shared by the broker handle and every session worker
pub(crate) struct Context {
    pub(crate) config: BrokerConfig,
    pub(crate) sessions: SessionStore,
    pub(crate) subscriptions: SubscriptionStore,
    pub(crate) retained: RetainedStore,
    pub(crate) events: broadcast::Sender<BrokerEvent>,
    pub(crate) hooks: Arc<dyn Hooks>,
}

impl Context {
    pub(crate) fn emit(&self, event: BrokerEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }
}

/// A started broker
struct Running {
    ctx: Arc<Context>,
    shutdown: broadcast::Sender<()>,
    workers: JoinSet<()>,
}

/// The broker
pub struct Broker {
    config: BrokerConfig,
    hooks: Arc<dyn Hooks>,
    storage: Option<Arc<dyn RetainedStorage>>,
    events: broadcast::Sender<BrokerEvent>,
    running: Mutex<Option<Running>>,
}

impl Broker {
    /// Create a new broker with default hooks (allows everything)
    pub fn new(config: BrokerConfig) -> Self {
        Self::with_hooks(config, Arc::new(DefaultHooks))
    }

    /// Create a new broker with custom hooks
    pub fn with_hooks(config: BrokerConfig, hooks: Arc<dyn Hooks>) -> Self {
        let (events, _) = broadcast::channel(1024);

        Self {
            config,
            hooks,
            storage: None,
            events,
            running: Mutex::new(None),
        }
    }

    /// Build a broker from file configuration, opening the configured storage
    pub fn from_config(config: &Config) -> Result<Self, BrokerError> {
        let storage = config.persistence.open_storage()?;
        let broker = Self::new(BrokerConfig::from(config));
        Ok(match storage {
            Some(storage) => broker.with_storage(storage),
            None => broker,
        })
    }

    /// Back the retained store with `storage`
    pub fn with_storage(mut self, storage: Arc<dyn RetainedStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Load retained messages and start accepting sessions.
    ///
    /// A failed load is fatal: the broker stays stopped.
    pub async fn start(&self) -> Result<(), BrokerError> {
        if self.running.lock().is_some() {
            return Err(BrokerError::AlreadyRunning);
        }

        let retained = RetainedStore::new(self.storage.clone());
        let loaded = match retained.load().await {
            Ok(count) => count,
            Err(e) => {
                error!("Failed to load retained messages: {}", e);
                return Err(e.into());
            }
        };

        let ctx = Arc::new(Context {
            config: self.config.clone(),
            sessions: SessionStore::new(),
            subscriptions: SubscriptionStore::new(),
            retained,
            events: self.events.clone(),
            hooks: self.hooks.clone(),
        });
        let (shutdown, _) = broadcast::channel(1);

        let mut running = self.running.lock();
        if running.is_some() {
            return Err(BrokerError::AlreadyRunning);
        }
        *running = Some(Running {
            ctx,
            shutdown,
            workers: JoinSet::new(),
        });

        info!(retained = loaded, "Broker started");
        Ok(())
    }

    /// Take over a client link from the transport adapter and run its
    /// session worker
    pub fn accept(&self, link: ClientLink) -> Result<(), BrokerError> {
        let mut running = self.running.lock();
        let running = running.as_mut().ok_or(BrokerError::NotRunning)?;

        // Reap finished workers
        while running.workers.try_join_next().is_some() {}

        let shutdown = running.shutdown.subscribe();
        let connection = Connection::new(link, running.ctx.clone());
        running.workers.spawn(async move {
            if let Err(e) = connection.run(shutdown).await {
                debug!("Connection ended: {}", e);
            }
        });
        Ok(())
    }

    /// Create an in-process link, accept its broker side and return the
    /// adapter side
    pub fn open_link(&self) -> Result<ClientEnd, BrokerError> {
        let (link, end) = channel_pair(self.config.outbound_channel_capacity);
        self.accept(link)?;
        Ok(end)
    }

    /// Publish a server-originated message to all matching sessions
    pub async fn publish(&self, message: ApplicationMessage) -> Result<(), BrokerError> {
        let ctx = self.context().ok_or(BrokerError::NotRunning)?;
        validate_topic_name_with_max_levels(&message.topic, ctx.config.max_topic_levels)
            .map_err(ProtocolError::InvalidTopicName)?;

        ctx.dispatch(None, message).await;
        Ok(())
    }

    /// Stop accepting sessions, close every session without publishing
    /// wills, wait for the workers and flush the retained store
    pub async fn stop(&self) -> Result<(), BrokerError> {
        let running = self.running.lock().take();
        let Some(mut running) = running else {
            return Err(BrokerError::NotRunning);
        };

        info!(sessions = running.ctx.sessions.len(), "Broker stopping");
        // Workers still waiting for CONNECT hold receivers too
        let _ = running.shutdown.send(());

        while let Some(result) = running.workers.join_next().await {
            if let Err(e) = result {
                if e.is_panic() {
                    error!("Session worker panicked: {}", e);
                }
            }
        }

        for session in running.ctx.sessions.all() {
            running
                .ctx
                .teardown(&session, DisconnectKind::Shutdown)
                .await;
        }
        running.ctx.retained.flush().await;

        info!("Broker stopped");
        Ok(())
    }

    /// Subscribe to broker events
    pub fn subscribe_events(&self) -> broadcast::Receiver<BrokerEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Number of registered sessions
    pub fn session_count(&self) -> usize {
        self.context().map_or(0, |ctx| ctx.sessions.len())
    }

    /// Number of retained messages
    pub fn retained_count(&self) -> usize {
        self.context().map_or(0, |ctx| ctx.retained.len())
    }

    /// Current retained message for a topic
    pub fn retained_message(&self, topic: &str) -> Option<ApplicationMessage> {
        self.context().and_then(|ctx| ctx.retained.get(topic))
    }

    fn context(&self) -> Option<Arc<Context>> {
        self.running.lock().as_ref().map(|running| running.ctx.clone())
    }
}
