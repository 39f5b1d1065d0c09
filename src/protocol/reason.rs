//! Reason Codes
//!
//! The subset of reason codes the broker core emits in acknowledgments,
//! CONNACK, SUBACK/UNSUBACK and DISCONNECT.

use std::fmt;

/// Reason Code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ReasonCode {
    /// Success / Normal disconnection / Granted QoS 0
    #[default]
    Success = 0x00,
    /// Granted QoS 1
    GrantedQoS1 = 0x01,
    /// Granted QoS 2
    GrantedQoS2 = 0x02,
    /// No matching subscribers
    NoMatchingSubscribers = 0x10,
    /// No subscription existed
    NoSubscriptionExisted = 0x11,
    /// Unspecified error
    UnspecifiedError = 0x80,
    /// Protocol Error
    ProtocolError = 0x82,
    /// Client Identifier not valid
    ClientIdNotValid = 0x85,
    /// Not authorized
    NotAuthorized = 0x87,
    /// Server unavailable
    ServerUnavailable = 0x88,
    /// Server shutting down
    ServerShuttingDown = 0x8B,
    /// Keep Alive timeout
    KeepAliveTimeout = 0x8D,
    /// Session taken over
    SessionTakenOver = 0x8E,
    /// Topic Filter invalid
    TopicFilterInvalid = 0x8F,
    /// Topic Name invalid
    TopicNameInvalid = 0x90,
    /// Packet Identifier not found
    PacketIdNotFound = 0x92,
    /// Quota exceeded
    QuotaExceeded = 0x97,
}

impl ReasonCode {
    /// Check if this reason code indicates success
    #[inline]
    pub fn is_success(self) -> bool {
        (self as u8) < 0x80
    }

    /// Check if this reason code indicates failure
    #[inline]
    pub fn is_error(self) -> bool {
        (self as u8) >= 0x80
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "Success",
            Self::GrantedQoS1 => "Granted QoS 1",
            Self::GrantedQoS2 => "Granted QoS 2",
            Self::NoMatchingSubscribers => "No matching subscribers",
            Self::NoSubscriptionExisted => "No subscription existed",
            Self::UnspecifiedError => "Unspecified error",
            Self::ProtocolError => "Protocol error",
            Self::ClientIdNotValid => "Client identifier not valid",
            Self::NotAuthorized => "Not authorized",
            Self::ServerUnavailable => "Server unavailable",
            Self::ServerShuttingDown => "Server shutting down",
            Self::KeepAliveTimeout => "Keep alive timeout",
            Self::SessionTakenOver => "Session taken over",
            Self::TopicFilterInvalid => "Topic filter invalid",
            Self::TopicNameInvalid => "Topic name invalid",
            Self::PacketIdNotFound => "Packet identifier not found",
            Self::QuotaExceeded => "Quota exceeded",
        };
        write!(f, "{}", s)
    }
}
