//! Loss-rate classification.
//!
//! The tier is a step function of packet loss rate alone. Round-trip time
//! and jitter are carried through to the verdict for display but never
//! influence the tier.

use crate::snapshot::StatsSnapshot;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, SystemTime};

/// Loss rate (percent) above which the link is `Bad`
pub const BAD_LOSS_PERCENT: f64 = 30.0;

/// Loss rate (percent) above which the link is `Poor`
pub const POOR_LOSS_PERCENT: f64 = 20.0;

/// Loss rate (percent) above which the link is `Fair`
pub const FAIR_LOSS_PERCENT: f64 = 10.0;

/// Loss rate (percent) above which the link is `Good` rather than `Excellent`
pub const GOOD_LOSS_PERCENT: f64 = 5.0;

/// Discrete link quality, best first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    /// Loss at or below 5%
    Excellent,
    /// Loss above 5%, at most 10%
    Good,
    /// Loss above 10%, at most 20%
    Fair,
    /// Loss above 20%, at most 30%
    Poor,
    /// Loss above 30%
    Bad,
}

impl QualityTier {
    /// Map a loss percentage onto a tier
    #[must_use]
    pub fn from_loss_rate(loss_percent: f64) -> Self {
        if loss_percent > BAD_LOSS_PERCENT {
            QualityTier::Bad
        } else if loss_percent > POOR_LOSS_PERCENT {
            QualityTier::Poor
        } else if loss_percent > FAIR_LOSS_PERCENT {
            QualityTier::Fair
        } else if loss_percent > GOOD_LOSS_PERCENT {
            QualityTier::Good
        } else {
            QualityTier::Excellent
        }
    }

    /// Lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Excellent => "excellent",
            QualityTier::Good => "good",
            QualityTier::Fair => "fair",
            QualityTier::Poor => "poor",
            QualityTier::Bad => "bad",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quality verdict derived from one snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityVerdict {
    /// Quality tier
    pub tier: QualityTier,
    /// Packet loss rate in percent
    pub packet_loss_rate: f64,
    /// Sum of packets received across all streams
    pub total_packets: u64,
    /// Sum of packets lost across all streams
    pub total_packets_lost: u64,
    /// Sum of bytes received across all streams
    pub total_bytes: u64,
    /// Round-trip time of the nominated pair (informational)
    pub round_trip_time: Option<Duration>,
    /// Available outgoing bitrate of the nominated pair (informational)
    pub available_outgoing_bitrate: Option<f64>,
    /// When the underlying snapshot was taken
    pub sampled_at: SystemTime,
}

/// Classify a snapshot.
///
/// Counters are summed over inbound and outbound streams. Negative loss
/// counters (duplicates outnumbering losses) count as zero. A snapshot
/// without any packet counters classifies as `Excellent` with 0% loss.
#[must_use]
pub fn classify(snapshot: &StatsSnapshot) -> QualityVerdict {
    let mut total_packets = 0u64;
    let mut total_packets_lost = 0u64;
    let mut total_bytes = 0u64;

    for stream in snapshot.streams() {
        let lost = stream.packets_lost.unwrap_or(0).max(0) as u64;
        total_packets_lost = total_packets_lost.saturating_add(lost);
        total_packets = total_packets.saturating_add(stream.packets_received.unwrap_or(0));
        total_bytes = total_bytes.saturating_add(stream.bytes_received.unwrap_or(0));
    }

    let packet_loss_rate = if total_packets > 0 {
        total_packets_lost as f64 / total_packets as f64 * 100.0
    } else {
        0.0
    };

    let pair = snapshot.active_pair.as_ref();

    QualityVerdict {
        tier: QualityTier::from_loss_rate(packet_loss_rate),
        packet_loss_rate,
        total_packets,
        total_packets_lost,
        total_bytes,
        round_trip_time: pair.and_then(|p| p.round_trip_time),
        available_outgoing_bitrate: pair.and_then(|p| p.available_outgoing_bitrate),
        sampled_at: snapshot.sampled_at,
    }
}
