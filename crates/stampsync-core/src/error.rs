//! Error types for StampSync

use thiserror::Error;

/// Main error type for StampSync operations
///
/// None of these are fatal to the process. Every failure degrades to
/// "no update this cycle"; the companion's poll and the host's context
/// pushes correct stale state later.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The channel is not activated or not reachable; the request never
    /// left the process
    #[error("Peer is not reachable")]
    Unreachable,

    /// The request left the process but the transport reported that
    /// delivery failed
    #[error("Transmission failed: {0}")]
    TransmissionFailed(String),

    /// Payload is missing required fields or has wrong-typed values
    #[error("Invalid payload: {0}")]
    DecodeInvalid(String),

    /// The session failed to activate
    #[error("Activation failed: {0}")]
    ActivationFailed(String),

    /// A host-side collaborator (button store, time source, event sink) failed
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// Error during wire (de)serialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The actor or reply channel on the other end was dropped
    #[error("Channel closed")]
    ChannelClosed,

    /// Invalid arguments passed to a host-side publishing call
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
}

impl SyncError {
    /// Whether this failure happened before anything was transmitted
    pub fn is_unreachable(&self) -> bool {
        matches!(self, SyncError::Unreachable)
    }
}

/// Result type alias using SyncError
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::TransmissionFailed("link down".to_string());
        assert_eq!(format!("{}", err), "Transmission failed: link down");
        assert_eq!(format!("{}", SyncError::Unreachable), "Peer is not reachable");
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let sync_err: SyncError = json_err.into();
        assert!(matches!(sync_err, SyncError::Serialization(_)));
    }

    #[test]
    fn test_is_unreachable() {
        assert!(SyncError::Unreachable.is_unreachable());
        assert!(!SyncError::ChannelClosed.is_unreachable());
    }
}
