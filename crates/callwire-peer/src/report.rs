//! Typed statistics report set.
//!
//! A statistics pull yields a heterogeneous set of reports distinguished
//! by their `type` field. Only the kinds the quality monitor reads are
//! modelled; every other kind lands in [`StatsReport::Unknown`].
//! Field names follow the W3C `RTCStats` dictionaries (camelCase).

use serde::{Deserialize, Serialize};

/// One entry of a statistics report set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StatsReport {
    /// Received RTP stream
    InboundRtp(RtpStreamReport),
    /// Sent RTP stream
    OutboundRtp(RtpStreamReport),
    /// ICE candidate pair
    CandidatePair(CandidatePairReport),
    /// Any report kind not listed above
    #[serde(other)]
    Unknown,
}

/// Media kind of an RTP stream
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
    /// Missing or unrecognised kind
    #[default]
    #[serde(other)]
    Other,
}

/// Counters shared by inbound and outbound RTP stream reports.
///
/// Inbound reports carry the receive counters and outbound reports carry
/// the send counters; every counter is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RtpStreamReport {
    /// Report id
    pub id: String,
    /// Sample time in milliseconds
    pub timestamp: f64,
    /// Media kind
    pub kind: MediaKind,
    /// Packets lost (may be negative when duplicates arrive)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packets_lost: Option<i64>,
    /// Packets received
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packets_received: Option<u64>,
    /// Payload bytes received
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_received: Option<u64>,
    /// Packet jitter in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter: Option<f64>,
    /// Packets sent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packets_sent: Option<u64>,
    /// Payload bytes sent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_sent: Option<u64>,
}

/// ICE candidate pair report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CandidatePairReport {
    /// Report id
    pub id: String,
    /// Sample time in milliseconds
    pub timestamp: f64,
    /// ICE pair state (`succeeded`, `in-progress`, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Whether this pair is the nominated one
    pub nominated: bool,
    /// Latest STUN round-trip time in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_round_trip_time: Option<f64>,
    /// Estimated available outgoing bitrate in bits per second
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_outgoing_bitrate: Option<f64>,
    /// Connectivity check requests sent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_sent: Option<u64>,
    /// Connectivity check requests received
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_received: Option<u64>,
    /// Connectivity check responses sent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responses_sent: Option<u64>,
    /// Connectivity check responses received
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responses_received: Option<u64>,
}

/// Parse a JSON array of statistics reports.
///
/// # Errors
/// Returns the JSON error if the input is not an array of objects with a
/// string `type` field.
pub fn parse_reports(json: &str) -> Result<Vec<StatsReport>, serde_json::Error> {
    serde_json::from_str(json)
}
