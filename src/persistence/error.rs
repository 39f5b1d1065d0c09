//! Errors raised while saving or loading the retained set.

use std::fmt;

#[derive(Debug)]
pub enum PersistenceError {
    /// Filesystem failure under the storage directory
    Io(std::io::Error),
    /// A retained message could not be encoded into a record
    Encode(bincode::error::EncodeError),
    /// A stored record does not decode into a retained message
    CorruptRecord(String),
    /// The keyspace or the retained partition failed
    Keyspace(fjall::Error),
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "retained storage I/O failed: {}", e),
            Self::Encode(e) => write!(f, "cannot encode retained message: {}", e),
            Self::CorruptRecord(e) => write!(f, "corrupt retained record: {}", e),
            Self::Keyspace(e) => write!(f, "retained partition error: {}", e),
        }
    }
}

impl std::error::Error for PersistenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Encode(e) => Some(e),
            Self::Keyspace(e) => Some(e),
            Self::CorruptRecord(_) => None,
        }
    }
}

impl From<std::io::Error> for PersistenceError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<fjall::Error> for PersistenceError {
    fn from(err: fjall::Error) -> Self {
        Self::Keyspace(err)
    }
}

impl From<bincode::error::EncodeError> for PersistenceError {
    fn from(err: bincode::error::EncodeError) -> Self {
        Self::Encode(err)
    }
}

impl From<bincode::error::DecodeError> for PersistenceError {
    fn from(err: bincode::error::DecodeError) -> Self {
        Self::CorruptRecord(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PersistenceError>;
