//! Transfer engine configuration.

use crate::CHUNK_HEADER_SIZE;
use crate::chunk::chunk_count;
use crate::error::{Result, TransferError};
use callwire_peer::DataChannelInit;
use callwire_stats::QualityTier;
use std::time::Duration;

/// Transfer engine configuration
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Largest outbound chunk payload, in bytes
    pub chunk_size: usize,

    /// Largest message the channel accepts, header included. Inbound
    /// chunks are bounded by this rather than by `chunk_size`, so the two
    /// ends need not agree on a chunk size.
    pub max_message_size: usize,

    /// Floor for quality-reduced chunk sizes
    pub min_chunk_size: usize,

    /// Buffered amount the sender waits for before the next chunk
    pub buffered_amount_low_threshold: usize,

    /// How long the sender waits for the buffered amount to drain
    pub backpressure_timeout: Duration,

    /// Largest payload accepted for sending or reassembly
    pub max_payload_size: usize,

    /// Inbound sessions held at once before the least recently active
    /// one is evicted
    pub max_inbound_sessions: usize,

    /// Idle time after which an inbound session is dropped
    pub inbound_session_timeout: Duration,

    /// Channel options used by `open_channel`
    pub channel: DataChannelInit,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: 16_000,
            max_message_size: 16 * 1024,
            min_chunk_size: 1024,
            buffered_amount_low_threshold: 0,
            backpressure_timeout: Duration::from_secs(10),
            max_payload_size: 256 * 1024 * 1024,
            max_inbound_sessions: 16,
            inbound_session_timeout: Duration::from_secs(60),
            channel: DataChannelInit::default(),
        }
    }
}

impl TransferConfig {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `TransferError::InvalidConfig` if a chunk plus its header
    /// would not fit in one message, or if any size, count, or timeout is
    /// zero or inconsistent.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(TransferError::invalid_config("chunk_size must be non-zero"));
        }
        if self.chunk_size.saturating_add(CHUNK_HEADER_SIZE) > self.max_message_size {
            return Err(TransferError::invalid_config(
                "chunk_size plus header exceeds max_message_size",
            ));
        }
        if self.min_chunk_size == 0 || self.min_chunk_size > self.chunk_size {
            return Err(TransferError::invalid_config(
                "min_chunk_size must be in 1..=chunk_size",
            ));
        }
        if self.backpressure_timeout.is_zero() {
            return Err(TransferError::invalid_config(
                "backpressure_timeout must be non-zero",
            ));
        }
        if self.max_payload_size == 0 {
            return Err(TransferError::invalid_config(
                "max_payload_size must be non-zero",
            ));
        }
        if chunk_count(self.max_payload_size, self.min_chunk_size).is_none() {
            return Err(TransferError::invalid_config(
                "max_payload_size needs more than u32::MAX chunks",
            ));
        }
        if self.max_inbound_sessions == 0 {
            return Err(TransferError::invalid_config(
                "max_inbound_sessions must be non-zero",
            ));
        }
        if self.inbound_session_timeout.is_zero() {
            return Err(TransferError::invalid_config(
                "inbound_session_timeout must be non-zero",
            ));
        }
        if !self.channel.ordered {
            return Err(TransferError::invalid_config("channel must be ordered"));
        }
        if self.channel.max_packet_life_time.is_some() && self.channel.max_retransmits.is_some() {
            return Err(TransferError::invalid_config(
                "max_packet_life_time and max_retransmits are mutually exclusive",
            ));
        }
        Ok(())
    }

    /// Chunk size to use at the given link quality.
    ///
    /// Excellent and good links use the full chunk size; fair halves it,
    /// poor quarters it, bad divides it by eight. Never below
    /// `min_chunk_size`.
    #[must_use]
    pub fn chunk_size_for(&self, tier: Option<QualityTier>) -> usize {
        let divisor = match tier {
            None | Some(QualityTier::Excellent | QualityTier::Good) => 1,
            Some(QualityTier::Fair) => 2,
            Some(QualityTier::Poor) => 4,
            Some(QualityTier::Bad) => 8,
        };
        (self.chunk_size / divisor).max(self.min_chunk_size)
    }

    /// Most chunks a valid inbound session can declare
    #[must_use]
    pub fn max_total_chunks(&self) -> u32 {
        chunk_count(self.max_payload_size, self.min_chunk_size.max(1)).unwrap_or(u32::MAX)
    }
}
