//! Error types for the transfer engine.

use callwire_peer::{ChannelState, PeerError};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

/// Chunk decoding errors
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ChunkError {
    /// Buffer shorter than the chunk header
    #[error("chunk too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Expected minimum size
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Unknown wire version byte
    #[error("unsupported chunk version: 0x{0:02X}")]
    UnsupportedVersion(u8),

    /// Length field disagrees with the bytes that follow the header
    #[error("payload length mismatch: header says {declared}, got {actual}")]
    LengthMismatch {
        /// Length declared in the header
        declared: usize,
        /// Bytes actually present
        actual: usize,
    },

    /// Total chunk count of zero
    #[error("total chunk count is zero")]
    ZeroTotal,

    /// Chunk index not below the total
    #[error("chunk index {index} out of range for total {total}")]
    IndexOutOfRange {
        /// Chunk index
        index: u32,
        /// Total chunk count
        total: u32,
    },
}

/// Ways an inbound chunk can break the transfer protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// The chunk could not be decoded or is internally inconsistent
    Malformed(ChunkError),

    /// Total differs from the one the session was opened with
    TotalMismatch {
        /// Total of the open session
        expected: u32,
        /// Total carried by the chunk
        actual: u32,
    },

    /// Chunk payload larger than the configured chunk size
    OversizedChunk {
        /// Payload length
        len: usize,
        /// Largest accepted payload
        max: usize,
    },

    /// The same non-zero index arrived twice
    DuplicateChunk {
        /// Repeated index
        index: u32,
    },

    /// The session cannot fit within the maximum payload size
    PayloadTooLarge {
        /// Total chunk count or byte count that overflowed
        size: u64,
        /// Configured limit
        max: u64,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Malformed(e) => write!(f, "malformed chunk: {e}"),
            Violation::TotalMismatch { expected, actual } => {
                write!(f, "total mismatch: session has {expected}, chunk says {actual}")
            }
            Violation::OversizedChunk { len, max } => {
                write!(f, "chunk payload of {len} bytes exceeds {max}")
            }
            Violation::DuplicateChunk { index } => write!(f, "duplicate chunk {index}"),
            Violation::PayloadTooLarge { size, max } => {
                write!(f, "session size {size} exceeds limit {max}")
            }
        }
    }
}

/// Why a transfer session was abandoned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The channel closed before the session finished
    ChannelClosed,
    /// The transport rejected a chunk
    Send(PeerError),
    /// The buffered amount did not drain in time
    BackpressureTimeout,
    /// The sender cancelled the transfer
    Cancelled,
    /// A new session reused the id before this one completed
    Superseded,
    /// Dropped to make room in a full session table
    Evicted,
    /// No chunk arrived within the inbound session timeout
    TimedOut,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ChannelClosed => f.write_str("channel closed"),
            FailureReason::Send(e) => write!(f, "send failed: {e}"),
            FailureReason::BackpressureTimeout => f.write_str("backpressure timeout"),
            FailureReason::Cancelled => f.write_str("cancelled"),
            FailureReason::Superseded => f.write_str("superseded by a new session"),
            FailureReason::Evicted => f.write_str("evicted from a full session table"),
            FailureReason::TimedOut => f.write_str("timed out"),
        }
    }
}

/// Transfer engine errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// No usable peer connection
    #[error("no usable peer connection")]
    NoConnection,

    /// The data channel is not open
    #[error("data channel not ready: {state}")]
    ChannelNotReady {
        /// Ready state at the time of the call
        state: ChannelState,
    },

    /// Payload rejected before any chunk was sent
    #[error("invalid payload: {0}")]
    InvalidPayload(Cow<'static, str>),

    /// Inbound chunk broke the protocol
    #[error("protocol violation{}: {violation}", fmt_session(.session_id))]
    ProtocolViolation {
        /// Session the chunk claimed, if it could be read
        session_id: Option<u32>,
        /// What was wrong
        violation: Violation,
    },

    /// A session was abandoned
    #[error("transfer {session_id} failed{}: {reason}", fmt_chunk(.chunk_index))]
    TransferFailed {
        /// Session id
        session_id: u32,
        /// Where the session stopped: the first chunk not handed to the
        /// transport when sending, the lowest chunk never received when
        /// receiving
        chunk_index: Option<u32>,
        /// Why the session was abandoned
        reason: FailureReason,
    },

    /// Invalid engine configuration
    #[error("invalid transfer configuration: {0}")]
    InvalidConfig(Cow<'static, str>),

    /// Backend error that is not a closed connection
    #[error("peer error: {0}")]
    Peer(#[from] PeerError),
}

fn fmt_session(session_id: &Option<u32>) -> String {
    session_id
        .map(|id| format!(" in session {id}"))
        .unwrap_or_default()
}

fn fmt_chunk(chunk_index: &Option<u32>) -> String {
    chunk_index
        .map(|index| format!(" at chunk {index}"))
        .unwrap_or_default()
}

impl TransferError {
    /// Create an invalid payload error
    #[must_use]
    pub const fn invalid_payload(msg: &'static str) -> Self {
        TransferError::InvalidPayload(Cow::Borrowed(msg))
    }

    /// Create an invalid configuration error
    #[must_use]
    pub const fn invalid_config(msg: &'static str) -> Self {
        TransferError::InvalidConfig(Cow::Borrowed(msg))
    }

    /// Create a transfer failure
    #[must_use]
    pub const fn failed(session_id: u32, chunk_index: Option<u32>, reason: FailureReason) -> Self {
        TransferError::TransferFailed {
            session_id,
            chunk_index,
            reason,
        }
    }

    /// Create a protocol violation
    #[must_use]
    pub const fn violation(session_id: Option<u32>, violation: Violation) -> Self {
        TransferError::ProtocolViolation {
            session_id,
            violation,
        }
    }

    /// Session the error refers to, if any
    #[must_use]
    pub fn session_id(&self) -> Option<u32> {
        match self {
            TransferError::ProtocolViolation { session_id, .. } => *session_id,
            TransferError::TransferFailed { session_id, .. } => Some(*session_id),
            _ => None,
        }
    }

    /// Check if the peer broke the protocol
    #[must_use]
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, TransferError::ProtocolViolation { .. })
    }

    /// Check if resending the payload under a new session may succeed.
    ///
    /// The engine never retries by itself.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, TransferError::TransferFailed { .. })
    }
}

impl From<ChunkError> for Violation {
    fn from(err: ChunkError) -> Self {
        Violation::Malformed(err)
    }
}

/// Result type for transfer operations
pub type Result<T> = std::result::Result<T, TransferError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransferError::failed(7, Some(3), FailureReason::BackpressureTimeout);
        assert_eq!(
            err.to_string(),
            "transfer 7 failed at chunk 3: backpressure timeout"
        );

        let err = TransferError::failed(7, None, FailureReason::Superseded);
        assert_eq!(
            err.to_string(),
            "transfer 7 failed: superseded by a new session"
        );

        let err = TransferError::violation(
            Some(2),
            Violation::Malformed(ChunkError::IndexOutOfRange { index: 5, total: 5 }),
        );
        assert_eq!(
            err.to_string(),
            "protocol violation in session 2: malformed chunk: chunk index 5 out of range for total 5"
        );

        let err = TransferError::ChannelNotReady {
            state: ChannelState::Closing,
        };
        assert_eq!(err.to_string(), "data channel not ready: closing");
    }

    #[test]
    fn test_error_helpers() {
        let failed = TransferError::failed(1, Some(0), FailureReason::ChannelClosed);
        assert_eq!(failed.session_id(), Some(1));
        assert!(failed.is_retriable());
        assert!(!failed.is_protocol_violation());

        let violation = TransferError::violation(None, Violation::DuplicateChunk { index: 4 });
        assert_eq!(violation.session_id(), None);
        assert!(violation.is_protocol_violation());
        assert!(!violation.is_retriable());

        assert!(!TransferError::NoConnection.is_retriable());
        assert!(!TransferError::invalid_payload("empty").is_retriable());
    }

    #[test]
    fn test_peer_error_conversion() {
        let err: TransferError = PeerError::send("backend").into();
        assert!(matches!(err, TransferError::Peer(_)));
    }
}
