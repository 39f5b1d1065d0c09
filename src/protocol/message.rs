//! Application message value type

use std::sync::Arc;

use bytes::Bytes;

use super::{Publish, QoS};

/// An application message: what a client publishes and what subscribers
/// receive, independent of packet identifiers and duplicate flags.
///
/// Cloning is cheap (the topic and payload are reference counted), so the
/// message is copied freely into every delivery path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApplicationMessage {
    /// Topic name (`/`-segmented, no wildcards)
    pub topic: Arc<str>,
    /// Payload, may be empty
    pub payload: Bytes,
    /// Requested quality of service
    pub qos: QoS,
    /// Retain flag
    pub retain: bool,
}

impl ApplicationMessage {
    pub fn new(
        topic: impl Into<Arc<str>>,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        }
    }

    /// A retained publish with an empty payload clears the topic's retained entry
    pub fn clears_retained(&self) -> bool {
        self.retain && self.payload.is_empty()
    }

    /// Build the outgoing PUBLISH packet for this message
    pub fn to_publish(&self, qos: QoS, retain: bool, packet_id: Option<u16>) -> Publish {
        Publish {
            dup: false,
            qos,
            retain,
            topic: self.topic.clone(),
            packet_id,
            payload: self.payload.clone(),
        }
    }
}

impl From<Publish> for ApplicationMessage {
    fn from(publish: Publish) -> Self {
        Self {
            topic: publish.topic,
            payload: publish.payload,
            qos: publish.qos,
            retain: publish.retain,
        }
    }
}

impl From<&Publish> for ApplicationMessage {
    fn from(publish: &Publish) -> Self {
        Self {
            topic: publish.topic.clone(),
            payload: publish.payload.clone(),
            qos: publish.qos,
            retain: publish.retain,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clears_retained() {
        let clear = ApplicationMessage::new("a/b", Bytes::new(), QoS::AtLeastOnce, true);
        assert!(clear.clears_retained());

        let keep = ApplicationMessage::new("a/b", &b"x"[..], QoS::AtLeastOnce, true);
        assert!(!keep.clears_retained());

        let not_retained = ApplicationMessage::new("a/b", Bytes::new(), QoS::AtMostOnce, false);
        assert!(!not_retained.clears_retained());
    }

    #[test]
    fn test_publish_conversion_drops_packet_fields() {
        let publish = Publish {
            dup: true,
            qos: QoS::ExactlyOnce,
            retain: true,
            topic: Arc::from("sensors/1"),
            packet_id: Some(42),
            payload: Bytes::from_static(b"21.5"),
        };

        let message = ApplicationMessage::from(&publish);
        assert_eq!(&*message.topic, "sensors/1");
        assert_eq!(message.qos, QoS::ExactlyOnce);
        assert!(message.retain);

        let outgoing = message.to_publish(QoS::AtLeastOnce, false, Some(7));
        assert!(!outgoing.dup);
        assert_eq!(outgoing.packet_id, Some(7));
        assert_eq!(outgoing.qos, QoS::AtLeastOnce);
        assert!(!outgoing.retain);
    }
}
