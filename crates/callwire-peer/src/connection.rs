//! Peer connection and data channel traits.
//!
//! These traits describe the two capabilities callwire needs from an
//! established connection: pulling statistics, and creating a
//! message-based data channel with a backpressure signal.

use crate::error::PeerResult;
use crate::report::StatsReport;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Aggregate connection state of a peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created, no transport activity yet
    New,
    /// Transports are being established
    Connecting,
    /// At least one transport is usable
    Connected,
    /// Connectivity was lost and may come back
    Disconnected,
    /// Connectivity failed permanently
    Failed,
    /// The connection was closed locally
    Closed,
}

impl ConnectionState {
    /// Returns true if statistics can still be queried and channels opened
    #[must_use]
    pub fn is_usable(&self) -> bool {
        !matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

/// Ready state of a data channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Waiting for the underlying transport
    Connecting,
    /// Messages can be sent
    Open,
    /// Close has been requested
    Closing,
    /// The channel is closed
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelState::Connecting => "connecting",
            ChannelState::Open => "open",
            ChannelState::Closing => "closing",
            ChannelState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Data channel configuration passed to `create_data_channel`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChannelInit {
    /// Deliver messages in the order they were sent
    pub ordered: bool,

    /// Maximum time a message may stay queued before it is dropped.
    /// This bounds latency; it does not guarantee delivery.
    pub max_packet_life_time: Option<Duration>,

    /// Maximum number of retransmissions (mutually exclusive with lifetime)
    pub max_retransmits: Option<u16>,

    /// Sub-protocol name
    pub protocol: String,
}

impl Default for DataChannelInit {
    fn default() -> Self {
        Self {
            ordered: true,
            max_packet_life_time: Some(Duration::from_secs(3)),
            max_retransmits: None,
            protocol: String::new(),
        }
    }
}

/// Message-based data channel with a buffered-amount backpressure signal.
///
/// Implementations are expected to be cheap to share behind an `Arc`;
/// every method takes `&self`.
#[async_trait]
pub trait DataChannel: Send + Sync {
    /// Channel label
    fn label(&self) -> &str;

    /// Current ready state
    fn ready_state(&self) -> ChannelState;

    /// Bytes queued locally and not yet handed to the network
    fn buffered_amount(&self) -> usize;

    /// Queue one message for transmission.
    ///
    /// Returns the number of bytes accepted. Resolving does not mean the
    /// peer received the message.
    ///
    /// # Errors
    /// Returns `PeerError::ChannelClosed` if the channel is not open, or a
    /// backend error if the transport rejects the message.
    async fn send(&self, data: Bytes) -> PeerResult<usize>;

    /// Wait until `buffered_amount()` is at or below `threshold`.
    ///
    /// # Errors
    /// Returns `PeerError::ChannelClosed` if the channel closes while waiting.
    async fn buffered_amount_low(&self, threshold: usize) -> PeerResult<()>;

    /// Wait for the next inbound message. `None` once the channel is closed.
    async fn recv(&self) -> Option<Bytes>;

    /// Close the channel.
    ///
    /// # Errors
    /// Returns a backend error if closing fails.
    async fn close(&self) -> PeerResult<()>;
}

/// An established (or establishing) peer connection
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Current aggregate connection state
    fn connection_state(&self) -> ConnectionState;

    /// Pull one statistics report set.
    ///
    /// # Errors
    /// Returns `PeerError` if the query cannot be issued.
    async fn get_stats(&self) -> PeerResult<Vec<StatsReport>>;

    /// Create a data channel over this connection.
    ///
    /// # Errors
    /// Returns `PeerError` if the channel cannot be created.
    async fn create_data_channel(
        &self,
        label: &str,
        init: DataChannelInit,
    ) -> PeerResult<Arc<dyn DataChannel>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_usable() {
        assert!(ConnectionState::New.is_usable());
        assert!(ConnectionState::Connecting.is_usable());
        assert!(ConnectionState::Connected.is_usable());
        assert!(ConnectionState::Disconnected.is_usable());
        assert!(!ConnectionState::Failed.is_usable());
        assert!(!ConnectionState::Closed.is_usable());
    }

    #[test]
    fn test_default_init_is_ordered_with_lifetime() {
        let init = DataChannelInit::default();
        assert!(init.ordered);
        assert_eq!(init.max_packet_life_time, Some(Duration::from_secs(3)));
        assert!(init.max_retransmits.is_none());
    }

    #[test]
    fn test_channel_state_display() {
        assert_eq!(ChannelState::Open.to_string(), "open");
        assert_eq!(ChannelState::Connecting.to_string(), "connecting");
    }
}
