//! Error types for live-state synchronization.

use crate::types::ChannelKind;
use thiserror::Error;

/// Main error type for channel, publisher and resolver operations.
///
/// Every variant that names a channel is contained to that channel: the
/// publisher records it as that channel's outcome and the resolver moves
/// on to the next channel. A stale snapshot is not an error at all, see
/// [`Adoption::Stale`](crate::resolver::Adoption::Stale).
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{channel} unavailable: {reason}")]
    ChannelUnavailable { channel: ChannelKind, reason: String },

    #[error("Malformed payload on {channel}: {message}")]
    Deserialization { channel: ChannelKind, message: String },

    #[error("Encoded link is {encoded} characters (limit {limit})")]
    EncodingTooLarge { encoded: usize, limit: usize },

    #[error("Invalid live state: {0}")]
    InvalidState(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl SyncError {
    pub fn unavailable(channel: ChannelKind, reason: impl Into<String>) -> Self {
        SyncError::ChannelUnavailable {
            channel,
            reason: reason.into(),
        }
    }

    pub fn malformed(channel: ChannelKind, message: impl ToString) -> Self {
        SyncError::Deserialization {
            channel,
            message: message.to_string(),
        }
    }

    /// The channel this error is attributed to, if any.
    pub fn channel(&self) -> Option<ChannelKind> {
        match self {
            SyncError::ChannelUnavailable { channel, .. }
            | SyncError::Deserialization { channel, .. } => Some(*channel),
            SyncError::EncodingTooLarge { .. } => Some(ChannelKind::UrlParameters),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

/// Result type for synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;
