//! Error types for the realtime session core.

use thiserror::Error;

/// Failures surfaced by the session, connection and subscription layers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The hub or the directory rejected the credential. Never retried.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The link could not be opened, was lost, or timed out.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A payload on a channel could not be decoded.
    #[error("Failed to decode payload on {channel}: {reason}")]
    Parse { channel: String, reason: String },

    /// A queued subscription was not established in time.
    #[error("Subscription to {channel} was not established within {waited_ms}ms")]
    Subscription { channel: String, waited_ms: u64 },

    /// A publish was attempted while the session is not connected.
    #[error("Cannot publish to {destination}: session is {state}")]
    Send { destination: String, state: String },

    /// An outgoing payload was rejected before reaching the hub.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

/// Failures of the REST directory collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Network failure or a non-success HTTP status.
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Unexpected response body: {0}")]
    Decode(String),

    /// The envelope carried no data.
    #[error("API error: {0}")]
    Api(String),
}

impl From<DirectoryError> for SessionError {
    fn from(error: DirectoryError) -> Self {
        match error {
            DirectoryError::Unauthorized(reason) => SessionError::Auth(reason),
            other => SessionError::Transport(other.to_string()),
        }
    }
}
