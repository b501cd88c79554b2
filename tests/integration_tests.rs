//! Integration tests across the peer, stats, and transfer crates.
//!
//! Every test runs over the in-memory loopback backend: a scripted peer
//! connection for statistics and a connected channel pair for transfers.

use bytes::Bytes;
use callwire_integration_tests::{engine_pair, inbound, nominated_pair, random_payload};
use callwire_peer::{ConnectionState, LoopbackPeer, MediaKind, PeerConnection, parse_reports};
use callwire_stats::{MonitorConfig, MonitorError, QualityMonitor, QualityTier, sample};
use callwire_transfer::{
    Chunk, FailureReason, Reassembler, TransferConfig, TransferEngine, TransferError,
    TransferEvent, open_channel, split,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn config() -> TransferConfig {
    TransferConfig {
        chunk_size: 8_000,
        min_chunk_size: 1_000,
        ..Default::default()
    }
}

// ============================================================================
// Quality Monitor
// ============================================================================

#[tokio::test]
async fn test_classify_w3c_stats_dump() {
    let dump = r#"[
        {"type": "inbound-rtp", "id": "IT01A", "timestamp": 1700000000000.0, "kind": "audio",
         "packetsLost": 5, "packetsReceived": 50, "bytesReceived": 8000, "jitter": 0.004},
        {"type": "inbound-rtp", "id": "IT01V", "timestamp": 1700000000000.0, "kind": "video",
         "packetsLost": 20, "packetsReceived": 150, "bytesReceived": 180000, "jitter": 0.011},
        {"type": "candidate-pair", "id": "CP01", "timestamp": 1700000000000.0,
         "state": "succeeded", "nominated": true, "currentRoundTripTime": 0.042,
         "availableOutgoingBitrate": 2500000},
        {"type": "candidate-pair", "id": "CP02", "timestamp": 1700000000000.0,
         "state": "failed", "nominated": false},
        {"type": "codec", "id": "CO01", "timestamp": 1700000000000.0, "mimeType": "video/VP8"},
        {"type": "transport", "id": "T01", "timestamp": 1700000000000.0}
    ]"#;

    let peer = Arc::new(LoopbackPeer::new());
    peer.set_reports(parse_reports(dump).unwrap());
    let monitor = QualityMonitor::with_connection(MonitorConfig::default(), peer);

    let snapshot = monitor.sample().await.unwrap();
    assert_eq!(snapshot.inbound.len(), 2);
    assert_eq!(snapshot.ignored_reports, 2);
    assert_eq!(
        snapshot
            .active_pair
            .as_ref()
            .and_then(|p| p.round_trip_time)
            .map(|rtt| rtt.as_millis()),
        Some(42)
    );

    let verdict = monitor.check().await.unwrap();
    assert_eq!(verdict.total_packets, 200);
    assert_eq!(verdict.total_packets_lost, 25);
    assert_eq!(verdict.packet_loss_rate, 12.5);
    assert_eq!(verdict.tier, QualityTier::Fair);
    assert_eq!(verdict.available_outgoing_bitrate, Some(2_500_000.0));
}

#[tokio::test]
async fn test_sample_requires_usable_connection() {
    assert_eq!(
        sample(None).await.unwrap_err(),
        MonitorError::no_connection()
    );

    let peer = LoopbackPeer::new();
    peer.set_reports(vec![inbound(MediaKind::Audio, 0, 10)]);
    assert!(sample(Some(&peer)).await.is_ok());

    peer.set_state(ConnectionState::Failed);
    assert!(matches!(
        sample(Some(&peer)).await,
        Err(MonitorError::NoConnection { .. })
    ));
}

#[tokio::test]
async fn test_monitor_detects_degradation() {
    let peer = Arc::new(LoopbackPeer::new());
    peer.set_reports(vec![inbound(MediaKind::Video, 1, 1_000), nominated_pair(0.02)]);

    let monitor = QualityMonitor::with_connection(
        MonitorConfig {
            interval: Duration::from_millis(10),
        },
        peer.clone(),
    );
    let (handle, mut verdicts) = monitor.spawn().unwrap();

    verdicts.changed().await.unwrap();
    assert_eq!(
        verdicts.borrow_and_update().as_ref().map(|v| v.tier),
        Some(QualityTier::Excellent)
    );

    peer.set_reports(vec![inbound(MediaKind::Video, 250, 1_000), nominated_pair(0.3)]);
    let degraded = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            verdicts.changed().await.unwrap();
            let tier = verdicts.borrow_and_update().as_ref().map(|v| v.tier);
            if tier == Some(QualityTier::Poor) {
                return tier;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(degraded, Some(QualityTier::Poor));

    drop(verdicts);
    handle.await.unwrap();
}

// ============================================================================
// Transfer Engine
// ============================================================================

#[tokio::test]
async fn test_transfer_over_opened_channel() {
    let peer = LoopbackPeer::new();
    let sender = open_channel(Some(&peer), "files", config()).await.unwrap();
    let remote = peer.accept_channel().await.unwrap();
    let receiver = TransferEngine::new(remote, config()).unwrap();

    let original = random_payload(1024 * 1024);
    let rx = tokio::spawn(async move { receiver.next_event().await });

    let report = sender.send(original.clone()).await.unwrap();
    assert_eq!(report.total_chunks, 132);
    assert_eq!(report.bytes_sent, 1024 * 1024);

    match rx.await.unwrap() {
        Some(TransferEvent::Completed(done)) => {
            assert_eq!(done.session_id, report.session_id);
            assert_eq!(done.total_chunks, 132);
            assert_eq!(done.payload, original);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_open_channel_on_closed_connection() {
    let peer = LoopbackPeer::new();
    peer.set_state(ConnectionState::Closed);
    assert!(matches!(
        open_channel(Some(&peer), "files", config()).await,
        Err(TransferError::NoConnection)
    ));
}

#[tokio::test]
async fn test_concurrent_sends_are_serialized() {
    let (sender, receiver) = engine_pair(&config());
    let payloads: Vec<Bytes> = (1..=3).map(|i| random_payload(i * 10_000)).collect();

    let expected = payloads.clone();
    let rx = tokio::spawn(async move {
        let mut received = Vec::new();
        while received.len() < 3 {
            match receiver.next_event().await {
                Some(TransferEvent::Completed(done)) => received.push(done.payload),
                other => panic!("unexpected event: {other:?}"),
            }
        }
        received
    });

    let sends: Vec<_> = payloads
        .into_iter()
        .map(|payload| {
            let sender = sender.clone();
            tokio::spawn(async move { sender.send(payload).await })
        })
        .collect();
    for send in sends {
        send.await.unwrap().unwrap();
    }

    // Sessions never interleave, so every payload arrives intact.
    let mut received = rx.await.unwrap();
    received.sort_by_key(Bytes::len);
    assert_eq!(received, expected);
}

#[tokio::test]
async fn test_quality_verdict_sizes_chunks() {
    let peer = Arc::new(LoopbackPeer::new());
    peer.set_reports(vec![inbound(MediaKind::Audio, 40, 100)]);
    let monitor = QualityMonitor::with_connection(MonitorConfig::default(), peer.clone());
    let verdict = monitor.check().await.unwrap();
    assert_eq!(verdict.tier, QualityTier::Bad);

    let sender = open_channel(Some(&*peer), "files", config()).await.unwrap();
    let remote = peer.accept_channel().await.unwrap();
    let receiver = TransferEngine::new(remote, config()).unwrap();

    sender.set_link_quality(Some(verdict.tier));
    assert_eq!(sender.current_chunk_size(), 1_000);

    let original = random_payload(4_500);
    let rx = tokio::spawn(async move { receiver.next_event().await });
    let report = sender.send(original.clone()).await.unwrap();
    assert_eq!(report.total_chunks, 5);

    assert!(matches!(
        rx.await.unwrap(),
        Some(TransferEvent::Completed(done)) if done.payload == original
    ));
}

#[tokio::test]
async fn test_peer_closing_mid_transfer() {
    let (sender, receiver) = engine_pair(&TransferConfig {
        backpressure_timeout: Duration::from_secs(5),
        ..config()
    });

    // Nobody reads, so the first chunk never drains.
    let send = {
        let sender = sender.clone();
        tokio::spawn(async move { sender.send(random_payload(40_000)).await })
    };
    let mut progress = sender.subscribe_progress();
    progress.wait_for(Option::is_some).await.unwrap();
    receiver.close().await.unwrap();

    match send.await.unwrap().unwrap_err() {
        TransferError::TransferFailed {
            chunk_index,
            reason,
            ..
        } => {
            assert_eq!(chunk_index, Some(1));
            assert_eq!(reason, FailureReason::ChannelClosed);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(sender.active_send().is_none());
}

// ============================================================================
// Reassembly
// ============================================================================

#[test]
fn test_lost_chunk_times_out() {
    let config = config();
    let mut reassembler = Reassembler::new(&config);
    let start = Instant::now();

    let chunks: Vec<Chunk> = split(77, random_payload(20_000), 8_000).unwrap().collect();
    // Chunk 1 is lost in transit.
    for chunk in [&chunks[0], &chunks[2]] {
        let wire = chunk.encode();
        let decoded = Chunk::decode(wire).unwrap();
        assert!(
            reassembler
                .on_chunk_received_at(decoded, start)
                .unwrap()
                .is_none()
        );
    }

    assert_eq!(reassembler.session(77).unwrap().missing_chunks(), vec![1]);
    assert_eq!(
        reassembler.evict_stale(start + config.inbound_session_timeout + Duration::from_secs(1)),
        1
    );
    assert_eq!(
        reassembler.take_failures(),
        vec![TransferError::failed(77, Some(1), FailureReason::TimedOut)]
    );
}

#[test]
fn test_violation_does_not_disturb_other_sessions() {
    let mut reassembler = Reassembler::new(&config());
    let first: Vec<Chunk> = split(1, Bytes::from_static(b"first payload"), 4).unwrap().collect();
    let second: Vec<Chunk> = split(2, Bytes::from_static(b"second"), 4).unwrap().collect();

    reassembler.on_chunk_received(first[0].clone()).unwrap();
    reassembler.on_chunk_received(second[0].clone()).unwrap();

    let mut bogus = second[1].clone();
    bogus.index = 9;
    assert!(
        reassembler
            .on_chunk_received(bogus)
            .unwrap_err()
            .is_protocol_violation()
    );
    assert!(reassembler.session(2).is_none());

    let mut done = None;
    for chunk in first.into_iter().skip(1) {
        done = reassembler.on_chunk_received(chunk).unwrap();
    }
    assert_eq!(done.unwrap().payload, Bytes::from_static(b"first payload"));
}

#[tokio::test]
async fn test_stats_query_failure_keeps_transfer_working() {
    let peer = Arc::new(LoopbackPeer::new());
    let sender = open_channel(Some(&*peer), "files", config()).await.unwrap();
    let remote = peer.accept_channel().await.unwrap();
    let receiver = TransferEngine::new(remote, config()).unwrap();

    peer.fail_stats(callwire_peer::PeerError::stats("backend busy"));
    assert!(peer.get_stats().await.is_err());
    assert!(sample(Some(&*peer)).await.is_err());

    let rx = tokio::spawn(async move { receiver.next_event().await });
    sender.send(Bytes::from_static(b"still flowing")).await.unwrap();
    assert!(matches!(
        rx.await.unwrap(),
        Some(TransferEvent::Completed(_))
    ));
}
