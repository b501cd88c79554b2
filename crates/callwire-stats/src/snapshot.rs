//! Point-in-time aggregate over one statistics pull.

use callwire_peer::{CandidatePairReport, MediaKind, RtpStreamReport, StatsReport};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

/// Counters of one RTP stream direction for one media kind.
///
/// Every counter keeps the report's optionality: a counter the backend did
/// not report stays `None` rather than becoming zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamCounters {
    /// Media kind
    pub kind: MediaKind,
    /// Packets lost (signed, as reported)
    pub packets_lost: Option<i64>,
    /// Packets received
    pub packets_received: Option<u64>,
    /// Bytes received
    pub bytes_received: Option<u64>,
    /// Packets sent
    pub packets_sent: Option<u64>,
    /// Bytes sent
    pub bytes_sent: Option<u64>,
    /// Jitter in seconds
    pub jitter: Option<f64>,
    /// Sample timestamp in milliseconds
    pub timestamp: f64,
}

impl From<&RtpStreamReport> for StreamCounters {
    fn from(report: &RtpStreamReport) -> Self {
        Self {
            kind: report.kind,
            packets_lost: report.packets_lost,
            packets_received: report.packets_received,
            bytes_received: report.bytes_received,
            packets_sent: report.packets_sent,
            bytes_sent: report.bytes_sent,
            jitter: report.jitter,
            timestamp: report.timestamp,
        }
    }
}

/// The nominated candidate pair at sample time
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActivePair {
    /// Current round-trip time
    pub round_trip_time: Option<Duration>,
    /// Available outgoing bitrate in bits per second
    pub available_outgoing_bitrate: Option<f64>,
    /// Connectivity check requests sent
    pub requests_sent: Option<u64>,
    /// Connectivity check requests received
    pub requests_received: Option<u64>,
    /// Connectivity check responses sent
    pub responses_sent: Option<u64>,
    /// Connectivity check responses received
    pub responses_received: Option<u64>,
    /// Sample timestamp in milliseconds
    pub timestamp: f64,
}

impl From<&CandidatePairReport> for ActivePair {
    fn from(report: &CandidatePairReport) -> Self {
        Self {
            round_trip_time: report
                .current_round_trip_time
                .filter(|rtt| rtt.is_finite() && *rtt >= 0.0)
                .map(Duration::from_secs_f64),
            available_outgoing_bitrate: report.available_outgoing_bitrate,
            requests_sent: report.requests_sent,
            requests_received: report.requests_received,
            responses_sent: report.responses_sent,
            responses_received: report.responses_received,
            timestamp: report.timestamp,
        }
    }
}

/// Aggregate of one statistics pull.
///
/// Streams are keyed by media kind. When one pull carries several streams
/// of the same kind and direction, the last one wins; the snapshot does
/// not sum parallel streams of one kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Received streams by kind
    pub inbound: BTreeMap<MediaKind, StreamCounters>,
    /// Sent streams by kind
    pub outbound: BTreeMap<MediaKind, StreamCounters>,
    /// Nominated candidate pair, absent when none was nominated
    pub active_pair: Option<ActivePair>,
    /// Reports of kinds the monitor does not read
    pub ignored_reports: usize,
    /// Wall-clock time of the pull
    pub sampled_at: SystemTime,
}

impl StatsSnapshot {
    /// Empty snapshot taken at `sampled_at`
    #[must_use]
    pub fn empty(sampled_at: SystemTime) -> Self {
        Self {
            inbound: BTreeMap::new(),
            outbound: BTreeMap::new(),
            active_pair: None,
            ignored_reports: 0,
            sampled_at,
        }
    }

    /// Fold a report set into a snapshot
    pub fn from_reports<'a, I>(reports: I, sampled_at: SystemTime) -> Self
    where
        I: IntoIterator<Item = &'a StatsReport>,
    {
        let mut snapshot = Self::empty(sampled_at);
        for report in reports {
            snapshot.record(report);
        }
        snapshot
    }

    fn record(&mut self, report: &StatsReport) {
        match report {
            StatsReport::InboundRtp(stream) => {
                if self.inbound.insert(stream.kind, stream.into()).is_some() {
                    tracing::trace!(kind = ?stream.kind, "duplicate inbound stream, keeping last");
                }
            }
            StatsReport::OutboundRtp(stream) => {
                if self.outbound.insert(stream.kind, stream.into()).is_some() {
                    tracing::trace!(kind = ?stream.kind, "duplicate outbound stream, keeping last");
                }
            }
            StatsReport::CandidatePair(pair) if pair.nominated => {
                if self.active_pair.replace(pair.into()).is_some() {
                    tracing::debug!(pair = %pair.id, "multiple nominated candidate pairs, keeping last");
                }
            }
            StatsReport::CandidatePair(_) => {}
            StatsReport::Unknown => self.ignored_reports += 1,
        }
    }

    /// Returns true if the pull carried no stream or pair data
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inbound.is_empty() && self.outbound.is_empty() && self.active_pair.is_none()
    }

    /// All stream counters, inbound first
    pub fn streams(&self) -> impl Iterator<Item = &StreamCounters> {
        self.inbound.values().chain(self.outbound.values())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound(kind: MediaKind, lost: i64, received: u64) -> StatsReport {
        StatsReport::InboundRtp(RtpStreamReport {
            kind,
            packets_lost: Some(lost),
            packets_received: Some(received),
            bytes_received: Some(received * 1000),
            ..Default::default()
        })
    }

    fn pair(id: &str, nominated: bool, rtt: f64) -> StatsReport {
        StatsReport::CandidatePair(CandidatePairReport {
            id: id.to_string(),
            nominated,
            current_round_trip_time: Some(rtt),
            ..Default::default()
        })
    }

    #[test]
    fn test_empty_report_set() {
        let snapshot = StatsSnapshot::from_reports(std::iter::empty(), SystemTime::UNIX_EPOCH);
        assert!(snapshot.is_empty());
        assert!(snapshot.active_pair.is_none());
        assert_eq!(snapshot.ignored_reports, 0);
    }

    #[test]
    fn test_streams_keyed_by_kind() {
        let reports = vec![
            inbound(MediaKind::Audio, 1, 100),
            inbound(MediaKind::Video, 5, 500),
            StatsReport::OutboundRtp(RtpStreamReport {
                kind: MediaKind::Video,
                packets_sent: Some(700),
                ..Default::default()
            }),
        ];
        let snapshot = StatsSnapshot::from_reports(&reports, SystemTime::UNIX_EPOCH);

        assert_eq!(snapshot.inbound.len(), 2);
        assert_eq!(snapshot.inbound[&MediaKind::Audio].packets_received, Some(100));
        assert_eq!(snapshot.inbound[&MediaKind::Video].packets_lost, Some(5));
        assert_eq!(snapshot.outbound[&MediaKind::Video].packets_sent, Some(700));
        assert!(snapshot.outbound[&MediaKind::Video].packets_received.is_none());
        assert_eq!(snapshot.streams().count(), 3);
    }

    #[test]
    fn test_duplicate_kind_last_write_wins() {
        let reports = vec![
            inbound(MediaKind::Video, 1, 100),
            inbound(MediaKind::Video, 9, 900),
        ];
        let snapshot = StatsSnapshot::from_reports(&reports, SystemTime::UNIX_EPOCH);

        assert_eq!(snapshot.inbound.len(), 1);
        assert_eq!(snapshot.inbound[&MediaKind::Video].packets_received, Some(900));
    }

    #[test]
    fn test_only_nominated_pair_recorded() {
        let reports = vec![pair("a", false, 0.5), pair("b", true, 0.02)];
        let snapshot = StatsSnapshot::from_reports(&reports, SystemTime::UNIX_EPOCH);

        let active = snapshot.active_pair.unwrap();
        assert_eq!(active.round_trip_time.map(|rtt| rtt.as_millis()), Some(20));
    }

    #[test]
    fn test_no_nominated_pair_is_absent() {
        let reports = vec![pair("a", false, 0.5)];
        let snapshot = StatsSnapshot::from_reports(&reports, SystemTime::UNIX_EPOCH);

        assert!(snapshot.active_pair.is_none());
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_unknown_reports_counted() {
        let reports = vec![StatsReport::Unknown, StatsReport::Unknown];
        let snapshot = StatsSnapshot::from_reports(&reports, SystemTime::UNIX_EPOCH);

        assert_eq!(snapshot.ignored_reports, 2);
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_invalid_rtt_dropped() {
        let reports = vec![pair("a", true, -1.0)];
        let snapshot = StatsSnapshot::from_reports(&reports, SystemTime::UNIX_EPOCH);

        assert!(snapshot.active_pair.unwrap().round_trip_time.is_none());
    }
}
