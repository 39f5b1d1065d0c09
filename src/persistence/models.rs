//! Serializable data models for persistence.
//!
//! Storage-friendly versions of runtime types that can be serialized with
//! bincode.

use bincode::{Decode, Encode};

use super::error::{PersistenceError, Result};
use crate::protocol::{ApplicationMessage, QoS};

/// Stored retained message
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct StoredRetainedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
}

impl From<&ApplicationMessage> for StoredRetainedMessage {
    fn from(message: &ApplicationMessage) -> Self {
        Self {
            topic: message.topic.to_string(),
            payload: message.payload.to_vec(),
            qos: message.qos as u8,
        }
    }
}

impl TryFrom<StoredRetainedMessage> for ApplicationMessage {
    type Error = PersistenceError;

    fn try_from(stored: StoredRetainedMessage) -> Result<Self> {
        let qos = QoS::from_u8(stored.qos).ok_or_else(|| {
            PersistenceError::CorruptRecord(format!(
                "invalid QoS {} for retained topic {}",
                stored.qos, stored.topic
            ))
        })?;
        Ok(ApplicationMessage::new(stored.topic, stored.payload, qos, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_message_restores_retain_flag() {
        let message = ApplicationMessage::new("a/b", &b"on"[..], QoS::AtLeastOnce, true);
        let stored = StoredRetainedMessage::from(&message);
        assert_eq!(stored.qos, 1);

        let restored = ApplicationMessage::try_from(stored).unwrap();
        assert_eq!(restored, message);
    }

    #[test]
    fn test_invalid_qos_is_rejected() {
        let stored = StoredRetainedMessage {
            topic: "a".to_string(),
            payload: vec![1],
            qos: 3,
        };
        assert!(matches!(
            ApplicationMessage::try_from(stored),
            Err(PersistenceError::CorruptRecord(_))
        ));
    }
}
