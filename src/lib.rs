//! QuillMQ - session and delivery engine for an MQTT-style publish/subscribe broker
//!
//! Routes application messages between sessions by hierarchical topic with
//! wildcard filters, drives the QoS 1/2 acknowledgment handshakes, keeps
//! retained messages (optionally persisted) and publishes wills on abnormal
//! disconnect. Packet encoding and sockets belong to a transport adapter,
//! which exchanges decoded packets with the broker over a [`ClientLink`].

pub mod broker;
pub mod config;
pub mod hooks;
pub mod logging;
pub mod persistence;
pub mod protocol;
pub mod retained;
pub mod session;
pub mod topic;
pub mod transport;

pub use broker::{Broker, BrokerConfig, BrokerError, BrokerEvent};
pub use config::Config;
pub use hooks::{CompositeHooks, DefaultHooks, HookError, HookResult, Hooks};
pub use persistence::{FjallStorage, MemoryStorage, PersistenceError, RetainedStorage};
pub use protocol::{ApplicationMessage, Packet, QoS, ReasonCode};
pub use session::DisconnectKind;
pub use transport::{channel_pair, ClientEnd, ClientLink};
