//! Error types for the quality monitor.

use callwire_peer::PeerError;
use std::borrow::Cow;
use thiserror::Error;

/// Quality monitor errors
///
/// Missing or partial statistics are never an error; only the inability
/// to issue the query at all is.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MonitorError {
    /// No peer connection is attached, or the statistics query could not
    /// be issued on it
    #[error("no usable peer connection{}", .cause.as_ref().map(|c| format!(": {c}")).unwrap_or_default())]
    NoConnection {
        /// Backend error that prevented the query, if any
        cause: Option<PeerError>,
    },

    /// Invalid monitor configuration
    #[error("invalid monitor configuration: {0}")]
    InvalidConfig(Cow<'static, str>),
}

impl MonitorError {
    /// No connection attached
    #[must_use]
    pub const fn no_connection() -> Self {
        MonitorError::NoConnection { cause: None }
    }
}

impl From<PeerError> for MonitorError {
    fn from(err: PeerError) -> Self {
        MonitorError::NoConnection { cause: Some(err) }
    }
}

/// Result type for monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;
