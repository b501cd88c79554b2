//! In-memory loopback backend.
//!
//! [`channel_pair`] returns two connected [`LoopbackChannel`] ends. A
//! message sent on one end counts against that end's buffered amount
//! until the other end reads it with `recv`, so backpressure behaves like
//! a real channel whose peer drains at the reader's pace.
//!
//! [`LoopbackPeer`] is a scripted `PeerConnection`: statistics are
//! whatever the test (or demo) last installed, and every data channel it
//! creates has its remote end queued for [`LoopbackPeer::accept_channel`].

use crate::connection::{
    ChannelState, ConnectionState, DataChannel, DataChannelInit, PeerConnection,
};
use crate::error::{PeerError, PeerResult};
use crate::report::StatsReport;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, Notify, mpsc};

const STATE_CONNECTING: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_CLOSING: u8 = 2;
const STATE_CLOSED: u8 = 3;

fn decode_state(raw: u8) -> ChannelState {
    match raw {
        STATE_CONNECTING => ChannelState::Connecting,
        STATE_OPEN => ChannelState::Open,
        STATE_CLOSING => ChannelState::Closing,
        _ => ChannelState::Closed,
    }
}

fn encode_state(state: ChannelState) -> u8 {
    match state {
        ChannelState::Connecting => STATE_CONNECTING,
        ChannelState::Open => STATE_OPEN,
        ChannelState::Closing => STATE_CLOSING,
        ChannelState::Closed => STATE_CLOSED,
    }
}

/// State shared by both ends of a pair
#[derive(Debug)]
struct Link {
    state: AtomicU8,
    state_changed: Notify,
}

impl Link {
    fn state(&self) -> ChannelState {
        decode_state(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ChannelState) {
        self.state.store(encode_state(state), Ordering::Release);
        self.state_changed.notify_waiters();
    }
}

/// One direction of a pair: written by one end, drained by the other
#[derive(Debug)]
struct Pipe {
    buffered: AtomicUsize,
    drained: Notify,
}

/// One end of an in-memory channel pair
#[derive(Debug)]
pub struct LoopbackChannel {
    label: String,
    init: DataChannelInit,
    link: Arc<Link>,
    outgoing: Arc<Pipe>,
    incoming: Arc<Pipe>,
    tx: mpsc::UnboundedSender<Bytes>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<Bytes>>,
    /// Number of further sends that succeed before sends start failing
    send_budget: AtomicUsize,
}

/// Create two connected, open channel ends.
#[must_use]
pub fn channel_pair(
    label: &str,
    init: DataChannelInit,
) -> (Arc<LoopbackChannel>, Arc<LoopbackChannel>) {
    let link = Arc::new(Link {
        state: AtomicU8::new(STATE_OPEN),
        state_changed: Notify::new(),
    });
    let a_to_b = Arc::new(Pipe {
        buffered: AtomicUsize::new(0),
        drained: Notify::new(),
    });
    let b_to_a = Arc::new(Pipe {
        buffered: AtomicUsize::new(0),
        drained: Notify::new(),
    });
    let (tx_ab, rx_ab) = mpsc::unbounded_channel();
    let (tx_ba, rx_ba) = mpsc::unbounded_channel();

    let a = LoopbackChannel {
        label: label.to_string(),
        init: init.clone(),
        link: link.clone(),
        outgoing: a_to_b.clone(),
        incoming: b_to_a.clone(),
        tx: tx_ab,
        rx: AsyncMutex::new(rx_ba),
        send_budget: AtomicUsize::new(usize::MAX),
    };
    let b = LoopbackChannel {
        label: label.to_string(),
        init,
        link,
        outgoing: b_to_a,
        incoming: a_to_b,
        tx: tx_ba,
        rx: AsyncMutex::new(rx_ab),
        send_budget: AtomicUsize::new(usize::MAX),
    };

    (Arc::new(a), Arc::new(b))
}

impl LoopbackChannel {
    /// Configuration the channel was created with
    #[must_use]
    pub fn init(&self) -> &DataChannelInit {
        &self.init
    }

    /// Force the ready state of both ends (simulates transport transitions)
    pub fn set_ready_state(&self, state: ChannelState) {
        self.link.set_state(state);
    }

    /// Let `count` more sends succeed, then fail every send after that
    pub fn fail_sends_after(&self, count: usize) {
        self.send_budget.store(count, Ordering::Release);
    }

    fn take_send_budget(&self) -> bool {
        self.send_budget
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| match left {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

#[async_trait]
impl DataChannel for LoopbackChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn ready_state(&self) -> ChannelState {
        self.link.state()
    }

    fn buffered_amount(&self) -> usize {
        self.outgoing.buffered.load(Ordering::Acquire)
    }

    async fn send(&self, data: Bytes) -> PeerResult<usize> {
        if self.link.state() != ChannelState::Open {
            return Err(PeerError::ChannelClosed);
        }
        if !self.take_send_budget() {
            return Err(PeerError::send("loopback send budget exhausted"));
        }

        let len = data.len();
        self.outgoing.buffered.fetch_add(len, Ordering::AcqRel);
        if self.tx.send(data).is_err() {
            self.outgoing.buffered.fetch_sub(len, Ordering::AcqRel);
            return Err(PeerError::ChannelClosed);
        }

        tracing::trace!(channel = %self.label, bytes = len, "loopback send");
        Ok(len)
    }

    async fn buffered_amount_low(&self, threshold: usize) -> PeerResult<()> {
        loop {
            // Register before checking so a drain between the check and
            // the await is not missed.
            let drained = self.outgoing.drained.notified();
            let state_changed = self.link.state_changed.notified();

            if self.link.state() == ChannelState::Closed {
                return Err(PeerError::ChannelClosed);
            }
            if self.buffered_amount() <= threshold {
                return Ok(());
            }

            tokio::select! {
                () = drained => {}
                () = state_changed => {}
            }
        }
    }

    async fn recv(&self) -> Option<Bytes> {
        let mut rx = self.rx.lock().await;
        loop {
            let state_changed = self.link.state_changed.notified();

            if self.link.state() == ChannelState::Closed {
                return None;
            }
            if let Ok(data) = rx.try_recv() {
                self.mark_drained(data.len());
                return Some(data);
            }

            tokio::select! {
                data = rx.recv() => {
                    let data = data?;
                    self.mark_drained(data.len());
                    return Some(data);
                }
                () = state_changed => {}
            }
        }
    }

    async fn close(&self) -> PeerResult<()> {
        self.link.set_state(ChannelState::Closed);
        tracing::debug!(channel = %self.label, "loopback channel closed");
        Ok(())
    }
}

impl LoopbackChannel {
    fn mark_drained(&self, len: usize) {
        self.incoming.buffered.fetch_sub(len, Ordering::AcqRel);
        self.incoming.drained.notify_waiters();
    }
}

/// Scripted in-memory peer connection
#[derive(Debug)]
pub struct LoopbackPeer {
    state: Mutex<ConnectionState>,
    reports: Mutex<PeerResult<Vec<StatsReport>>>,
    remote_tx: mpsc::UnboundedSender<Arc<LoopbackChannel>>,
    remote_rx: AsyncMutex<mpsc::UnboundedReceiver<Arc<LoopbackChannel>>>,
}

impl LoopbackPeer {
    /// Create a connected peer with an empty statistics report set
    #[must_use]
    pub fn new() -> Self {
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(ConnectionState::Connected),
            reports: Mutex::new(Ok(Vec::new())),
            remote_tx,
            remote_rx: AsyncMutex::new(remote_rx),
        }
    }

    /// Replace the report set returned by subsequent `get_stats` calls
    pub fn set_reports(&self, reports: Vec<StatsReport>) {
        *self.reports.lock().unwrap_or_else(PoisonError::into_inner) = Ok(reports);
    }

    /// Make subsequent `get_stats` calls fail with `err`
    pub fn fail_stats(&self, err: PeerError) {
        *self.reports.lock().unwrap_or_else(PoisonError::into_inner) = Err(err);
    }

    /// Change the connection state
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Wait for the remote end of the next channel created on this peer
    pub async fn accept_channel(&self) -> Option<Arc<LoopbackChannel>> {
        self.remote_rx.lock().await.recv().await
    }
}

impl Default for LoopbackPeer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerConnection for LoopbackPeer {
    fn connection_state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn get_stats(&self) -> PeerResult<Vec<StatsReport>> {
        if !self.connection_state().is_usable() {
            return Err(PeerError::NotConnected);
        }
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn create_data_channel(
        &self,
        label: &str,
        init: DataChannelInit,
    ) -> PeerResult<Arc<dyn DataChannel>> {
        if !self.connection_state().is_usable() {
            return Err(PeerError::NotConnected);
        }

        let (local, remote) = channel_pair(label, init);
        // Nobody accepting is fine; the remote end is simply dropped.
        let _ = self.remote_tx.send(remote);

        Ok(local)
    }
}
