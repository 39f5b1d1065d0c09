//! Packet Definitions
//!
//! Decoded control packets as handed over by the transport adapter. The
//! adapter owns framing and encoding; the broker only sees these values.

use std::sync::Arc;

use bytes::Bytes;

use super::{ApplicationMessage, QoS, ReasonCode};

/// Control packet - unified representation exchanged with the transport adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Box<Connect>),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck(PubAck),
    PubRec(PubRec),
    PubRel(PubRel),
    PubComp(PubComp),
    Subscribe(Subscribe),
    SubAck(SubAck),
    Unsubscribe(Unsubscribe),
    UnsubAck(UnsubAck),
    PingReq,
    PingResp,
    Disconnect(Disconnect),
}

impl Packet {
    /// Packet type name, for logging
    pub fn name(&self) -> &'static str {
        match self {
            Packet::Connect(_) => "CONNECT",
            Packet::ConnAck(_) => "CONNACK",
            Packet::Publish(_) => "PUBLISH",
            Packet::PubAck(_) => "PUBACK",
            Packet::PubRec(_) => "PUBREC",
            Packet::PubRel(_) => "PUBREL",
            Packet::PubComp(_) => "PUBCOMP",
            Packet::Subscribe(_) => "SUBSCRIBE",
            Packet::SubAck(_) => "SUBACK",
            Packet::Unsubscribe(_) => "UNSUBSCRIBE",
            Packet::UnsubAck(_) => "UNSUBACK",
            Packet::PingReq => "PINGREQ",
            Packet::PingResp => "PINGRESP",
            Packet::Disconnect(_) => "DISCONNECT",
        }
    }
}

/// CONNECT packet (client -> server)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Connect {
    /// Client identifier (empty = let the broker assign one)
    pub client_id: String,
    /// Keep alive interval in seconds (0 = use the broker default)
    pub keep_alive: u16,
    /// Username (optional)
    pub username: Option<String>,
    /// Password (optional)
    pub password: Option<Bytes>,
    /// Will message (optional)
    pub will: Option<ApplicationMessage>,
    /// When taking over an existing session with the same client identifier,
    /// drop that session's will instead of publishing it
    pub clean_takeover: bool,
}

impl Connect {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Default::default()
        }
    }

    pub fn with_will(mut self, will: ApplicationMessage) -> Self {
        self.will = Some(will);
        self
    }
}

/// CONNACK packet (server -> client)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnAck {
    /// Session present flag
    pub session_present: bool,
    /// Reason code
    pub reason_code: ReasonCode,
    /// Client identifier assigned by the broker, when the client sent none
    pub assigned_client_id: Option<String>,
}

impl ConnAck {
    pub fn new(reason_code: ReasonCode) -> Self {
        Self {
            session_present: false,
            reason_code,
            assigned_client_id: None,
        }
    }
}

/// PUBLISH packet (bidirectional)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    /// Duplicate delivery flag
    pub dup: bool,
    /// Quality of service
    pub qos: QoS,
    /// Retain flag
    pub retain: bool,
    /// Topic name (Arc<str> for cheap cloning during fan-out)
    pub topic: Arc<str>,
    /// Packet identifier (present only for QoS > 0)
    pub packet_id: Option<u16>,
    /// Payload
    pub payload: Bytes,
}

impl Default for Publish {
    fn default() -> Self {
        Self {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: Arc::from(""),
            packet_id: None,
            payload: Bytes::new(),
        }
    }
}

/// Declares an acknowledgment packet carrying a packet identifier and reason code
macro_rules! ack_packet {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            /// Packet identifier
            pub packet_id: u16,
            /// Reason code
            pub reason_code: ReasonCode,
        }

        impl $name {
            pub fn new(packet_id: u16) -> Self {
                Self {
                    packet_id,
                    reason_code: ReasonCode::Success,
                }
            }

            pub fn with_reason(packet_id: u16, reason_code: ReasonCode) -> Self {
                Self {
                    packet_id,
                    reason_code,
                }
            }
        }
    };
}

ack_packet!(
    /// PUBACK packet (bidirectional, QoS 1 acknowledgment)
    PubAck
);
ack_packet!(
    /// PUBREC packet (bidirectional, QoS 2 step 1)
    PubRec
);
ack_packet!(
    /// PUBREL packet (bidirectional, QoS 2 step 2)
    PubRel
);
ack_packet!(
    /// PUBCOMP packet (bidirectional, QoS 2 step 3)
    PubComp
);

/// Subscription request: a topic filter and the requested QoS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    /// Topic filter (may contain `+` and a trailing `#`)
    pub filter: String,
    /// Requested QoS
    pub qos: QoS,
}

impl TopicFilter {
    pub fn new(filter: impl Into<String>, qos: QoS) -> Self {
        Self {
            filter: filter.into(),
            qos,
        }
    }
}

/// SUBSCRIBE packet (client -> server)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    /// Packet identifier
    pub packet_id: u16,
    /// Requested subscriptions
    pub filters: Vec<TopicFilter>,
}

/// SUBACK packet (server -> client)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    /// Packet identifier
    pub packet_id: u16,
    /// Granted QoS or failure code for each requested filter, in order
    pub reason_codes: Vec<ReasonCode>,
}

/// UNSUBSCRIBE packet (client -> server)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    /// Packet identifier
    pub packet_id: u16,
    /// Topic filters to unsubscribe from
    pub filters: Vec<String>,
}

/// UNSUBACK packet (server -> client)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubAck {
    /// Packet identifier
    pub packet_id: u16,
    /// Result for each filter
    pub reason_codes: Vec<ReasonCode>,
}

/// DISCONNECT packet (bidirectional)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Disconnect {
    /// Reason code
    pub reason_code: ReasonCode,
}

impl Disconnect {
    pub fn new(reason_code: ReasonCode) -> Self {
        Self { reason_code }
    }
}
