//! Error types for peer connection backends.

use std::borrow::Cow;
use thiserror::Error;

/// Errors surfaced by a `PeerConnection` or `DataChannel` backend
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PeerError {
    /// The peer connection is closed, failed, or was never established
    #[error("peer connection is not connected")]
    NotConnected,

    /// The data channel is closed
    #[error("data channel closed")]
    ChannelClosed,

    /// Handing a message to the transport failed
    #[error("send failed: {0}")]
    Send(Cow<'static, str>),

    /// The statistics query could not be completed
    #[error("stats query failed: {0}")]
    Stats(Cow<'static, str>),

    /// Backend-specific error
    #[error("{0}")]
    Other(Cow<'static, str>),
}

impl PeerError {
    /// Create a send error with static context (zero allocation)
    #[must_use]
    pub const fn send(context: &'static str) -> Self {
        PeerError::Send(Cow::Borrowed(context))
    }

    /// Create a stats error with static context (zero allocation)
    #[must_use]
    pub const fn stats(context: &'static str) -> Self {
        PeerError::Stats(Cow::Borrowed(context))
    }

    /// Returns true if the error means the connection or channel is gone
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, PeerError::NotConnected | PeerError::ChannelClosed)
    }
}

/// Result type for peer backend operations
pub type PeerResult<T> = std::result::Result<T, PeerError>;
