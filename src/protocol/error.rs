//! Protocol error types

use std::fmt;

/// Protocol violations detected while handling decoded packets.
///
/// A violation rejects the offending request (or closes the offending
/// session); it never takes the broker down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// First packet on a link was not CONNECT
    ExpectedConnect,
    /// A second CONNECT on an established session
    DuplicateConnect,
    /// Invalid topic name in a PUBLISH
    InvalidTopicName(&'static str),
    /// Invalid topic filter in a SUBSCRIBE
    InvalidTopicFilter(&'static str),
    /// QoS 1/2 PUBLISH without a packet identifier
    MissingPacketId,
    /// Packet type the server never accepts from a client
    UnexpectedPacket(&'static str),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExpectedConnect => write!(f, "first packet must be CONNECT"),
            Self::DuplicateConnect => write!(f, "duplicate CONNECT"),
            Self::InvalidTopicName(msg) => write!(f, "invalid topic name: {}", msg),
            Self::InvalidTopicFilter(msg) => write!(f, "invalid topic filter: {}", msg),
            Self::MissingPacketId => write!(f, "QoS > 0 publish without packet identifier"),
            Self::UnexpectedPacket(name) => write!(f, "unexpected {} from client", name),
        }
    }
}

impl std::error::Error for ProtocolError {}
