//! Error taxonomy.
//!
//! Everything peer-observable travels as an [`Event`](crate::Event) or a
//! close frame; these types cover the API boundaries inside the process.

use thiserror::Error;

/// Wire codec failures.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Serialize(String),
    #[error("deserialization error: {0}")]
    Deserialize(String),
}

/// Admission failures from the registry.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// The per-room session cap was reached. The diagnostic text is
    /// surfaced to the peer in the close frame.
    #[error("maximum clients in room {0}")]
    RoomFull(String),
}

/// A request could not be posted because the room loop has exited.
#[derive(Debug, Clone, Copy, Error)]
#[error("room closed")]
pub struct RoomClosed;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_full_diagnostic_mentions_maximum_clients() {
        let err = RegistryError::RoomFull("/g/demo".into());
        let text = err.to_string();
        assert!(text.contains("maximum clients"));
        assert!(text.contains("/g/demo"));
    }
}
