//! Transfer engine bound to one data channel.

use crate::chunk::{self, Chunk};
use crate::config::TransferConfig;
use crate::error::{FailureReason, Result, TransferError, Violation};
use crate::reassembler::{CompletedPayload, Reassembler};
use crate::session::TransferSession;
use bytes::Bytes;
use callwire_peer::{ChannelState, DataChannel, PeerConnection, PeerError};
use callwire_stats::QualityTier;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, Notify, watch};

/// Open a transfer channel over an existing connection.
///
/// The channel is created with `config.channel` (ordered, bounded
/// per-message lifetime by default). No retry is attempted.
///
/// # Errors
///
/// Returns `TransferError::NoConnection` if `connection` is `None`, closed
/// or failed; `TransferError::InvalidConfig` if `config` is invalid; and
/// `TransferError::Peer` for any other channel creation failure.
pub async fn open_channel(
    connection: Option<&dyn PeerConnection>,
    label: &str,
    config: TransferConfig,
) -> Result<TransferEngine> {
    config.validate()?;

    let connection = connection.ok_or(TransferError::NoConnection)?;
    if !connection.connection_state().is_usable() {
        return Err(TransferError::NoConnection);
    }

    let channel = connection
        .create_data_channel(label, config.channel.clone())
        .await
        .map_err(|e| match e {
            PeerError::NotConnected => TransferError::NoConnection,
            other => TransferError::Peer(other),
        })?;

    tracing::debug!(channel = %label, "transfer channel opened");
    TransferEngine::new(channel, config)
}

/// Outcome of a completed send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    /// Session id the payload was sent under
    pub session_id: u32,
    /// Number of chunks sent
    pub total_chunks: u32,
    /// Chunk size used
    pub chunk_size: usize,
    /// Payload bytes sent
    pub bytes_sent: u64,
    /// Time from first chunk to last hand-off
    pub elapsed: Duration,
}

/// Progress of the send in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendProgress {
    /// Session id
    pub session_id: u32,
    /// Chunks handed to the channel so far
    pub chunks_sent: u32,
    /// Total chunks in the session
    pub total_chunks: u32,
    /// Payload bytes handed to the channel so far
    pub bytes_sent: u64,
    /// Payload size
    pub total_bytes: u64,
}

/// Inbound event produced by [`TransferEngine::next_event`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// A payload was fully reassembled
    Completed(CompletedPayload),
    /// A chunk broke the protocol or a session was abandoned
    Failed(TransferError),
}

/// Outbound transfer in flight
#[derive(Debug, Clone, Copy)]
struct ActiveSend {
    session_id: u32,
    cancelled: bool,
}

/// Clears the active send when the send finishes or its future is dropped
struct ActiveSendGuard<'a> {
    engine: &'a TransferEngine,
    session_id: u32,
}

impl Drop for ActiveSendGuard<'_> {
    fn drop(&mut self) {
        let mut active = self.engine.lock_active();
        if active.is_some_and(|a| a.session_id == self.session_id) {
            *active = None;
        }
    }
}

/// Chunked transfer engine for one data channel.
///
/// Outbound sends are serialized: at most one transfer is in flight and
/// further `send` calls wait their turn. Inbound chunks are read and
/// reassembled by [`TransferEngine::next_event`].
pub struct TransferEngine {
    channel: Arc<dyn DataChannel>,
    config: TransferConfig,

    send_lock: AsyncMutex<()>,
    active: Mutex<Option<ActiveSend>>,
    cancel: Notify,
    next_session_id: AtomicU32,
    link_quality: Mutex<Option<QualityTier>>,
    progress: watch::Sender<Option<SendProgress>>,

    reassembler: AsyncMutex<Reassembler>,
    inbound_closed: AtomicBool,
}

impl TransferEngine {
    /// Wrap an already open channel (for example one accepted from the peer)
    ///
    /// # Errors
    ///
    /// Returns `TransferError::InvalidConfig` if `config` is invalid.
    pub fn new(channel: Arc<dyn DataChannel>, config: TransferConfig) -> Result<Self> {
        config.validate()?;

        let (progress, _) = watch::channel(None);
        let reassembler = Reassembler::new(&config);

        Ok(Self {
            channel,
            config,
            send_lock: AsyncMutex::new(()),
            active: Mutex::new(None),
            cancel: Notify::new(),
            next_session_id: AtomicU32::new(rand::random()),
            link_quality: Mutex::new(None),
            progress,
            reassembler: AsyncMutex::new(reassembler),
            inbound_closed: AtomicBool::new(false),
        })
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Get the underlying channel
    #[must_use]
    pub fn channel(&self) -> &Arc<dyn DataChannel> {
        &self.channel
    }

    /// Current channel ready state
    #[must_use]
    pub fn ready_state(&self) -> ChannelState {
        self.channel.ready_state()
    }

    /// Set the link quality used to size chunks of subsequent sends
    pub fn set_link_quality(&self, tier: Option<QualityTier>) {
        *self
            .link_quality
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = tier;
    }

    /// Chunk size the next send will use
    #[must_use]
    pub fn current_chunk_size(&self) -> usize {
        let tier = *self
            .link_quality
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.config.chunk_size_for(tier)
    }

    /// Subscribe to progress of outbound sends
    #[must_use]
    pub fn subscribe_progress(&self) -> watch::Receiver<Option<SendProgress>> {
        self.progress.subscribe()
    }

    /// Session id of the send in flight, if any
    #[must_use]
    pub fn active_send(&self) -> Option<u32> {
        self.lock_active().map(|a| a.session_id)
    }

    /// Cancel the send in flight.
    ///
    /// No further chunks are sent and the pending `send` fails with
    /// `FailureReason::Cancelled`. Nothing is sent to the peer. Returns
    /// the cancelled session id, or `None` if no send was in flight.
    pub fn cancel_send(&self) -> Option<u32> {
        let session_id = {
            let mut active = self.lock_active();
            let send = active.as_mut()?;
            send.cancelled = true;
            send.session_id
        };
        self.cancel.notify_waiters();
        tracing::debug!(session_id, "send cancellation requested");
        Some(session_id)
    }

    /// Send one payload.
    ///
    /// Resolves once the final chunk has been handed to the channel; that
    /// does not mean the peer has received it. Dropping the returned
    /// future cancels the transfer.
    ///
    /// # Errors
    ///
    /// - `TransferError::ChannelNotReady` if the channel is not open
    /// - `TransferError::InvalidPayload` if the payload is empty or larger
    ///   than `max_payload_size`
    /// - `TransferError::TransferFailed` if the session is abandoned after
    ///   it started
    pub async fn send(&self, payload: Bytes) -> Result<SendReport> {
        self.check_sendable(&payload)?;

        let _turn = self.send_lock.lock().await;
        // The channel may have closed while waiting for the previous send.
        self.check_sendable(&payload)?;

        let chunk_size = self.current_chunk_size();
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let chunks = chunk::split(session_id, payload.clone(), chunk_size)?;
        let total_chunks = chunks.total();

        *self.lock_active() = Some(ActiveSend {
            session_id,
            cancelled: false,
        });
        let _active = ActiveSendGuard {
            engine: self,
            session_id,
        };

        let mut session =
            TransferSession::new_send(session_id, total_chunks, payload.len(), chunk_size);
        session.start(Instant::now());

        tracing::debug!(
            session_id,
            bytes = payload.len(),
            chunks = total_chunks,
            chunk_size,
            "send started"
        );

        for chunk in chunks {
            if let Err(reason) = self.send_chunk(&chunk).await {
                session.abort();
                return Err(self.abandon(session_id, chunk.index, reason));
            }

            session.mark_chunk_sent(chunk.index, chunk.payload.len(), Instant::now());
            self.progress.send_replace(Some(SendProgress {
                session_id,
                chunks_sent: session.chunks_done(),
                total_chunks,
                bytes_sent: session.bytes_transferred(),
                total_bytes: payload.len() as u64,
            }));

            tracing::trace!(
                session_id,
                index = chunk.index,
                total = total_chunks,
                buffered = self.channel.buffered_amount(),
                "chunk sent"
            );

            if !chunk.is_last() {
                if let Err(reason) = self.wait_for_drain(session_id).await {
                    session.abort();
                    return Err(self.abandon(session_id, chunk.index + 1, reason));
                }
            }
        }

        let report = SendReport {
            session_id,
            total_chunks,
            chunk_size,
            bytes_sent: session.bytes_transferred(),
            elapsed: session.elapsed(Instant::now()),
        };

        tracing::info!(
            session_id,
            bytes = report.bytes_sent,
            chunks = report.total_chunks,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "send complete"
        );

        Ok(report)
    }

    /// Wait for the next inbound event.
    ///
    /// Sessions that stop receiving chunks are failed with
    /// `FailureReason::TimedOut` once idle for `inbound_session_timeout`,
    /// even if the channel stays silent. Returns `None` once the channel
    /// has closed and every pending failure has been reported.
    pub async fn next_event(&self) -> Option<TransferEvent> {
        let mut reassembler = self.reassembler.lock().await;

        loop {
            if let Some(err) = reassembler.pop_failure() {
                return Some(TransferEvent::Failed(err));
            }
            if self.inbound_closed.load(Ordering::Acquire) {
                return None;
            }

            let received = match reassembler.next_deadline() {
                Some(deadline) => tokio::select! {
                    data = self.channel.recv() => data,
                    () = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                        reassembler.evict_stale(Instant::now());
                        continue;
                    }
                },
                None => self.channel.recv().await,
            };

            let Some(data) = received else {
                self.inbound_closed.store(true, Ordering::Release);
                reassembler.abort_all(FailureReason::ChannelClosed);
                continue;
            };

            reassembler.evict_stale(Instant::now());

            let chunk = match Chunk::decode(data) {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::warn!("undecodable message on transfer channel: {}", e);
                    return Some(TransferEvent::Failed(TransferError::violation(
                        None,
                        Violation::Malformed(e),
                    )));
                }
            };

            match reassembler.on_chunk_received(chunk) {
                Ok(Some(completed)) => return Some(TransferEvent::Completed(completed)),
                Ok(None) => {}
                Err(e) => return Some(TransferEvent::Failed(e)),
            }
        }
    }

    /// Close the channel
    ///
    /// # Errors
    ///
    /// Returns `TransferError::Peer` if the backend fails to close.
    pub async fn close(&self) -> Result<()> {
        self.cancel_send();
        self.channel.close().await?;
        Ok(())
    }

    fn check_sendable(&self, payload: &Bytes) -> Result<()> {
        let state = self.channel.ready_state();
        if state != ChannelState::Open {
            return Err(TransferError::ChannelNotReady { state });
        }
        if payload.is_empty() {
            return Err(TransferError::invalid_payload("payload is empty"));
        }
        if payload.len() > self.config.max_payload_size {
            return Err(TransferError::InvalidPayload(
                format!(
                    "payload of {} bytes exceeds limit of {}",
                    payload.len(),
                    self.config.max_payload_size
                )
                .into(),
            ));
        }
        Ok(())
    }

    async fn send_chunk(&self, chunk: &Chunk) -> std::result::Result<(), FailureReason> {
        if self.is_cancelled(chunk.session_id) {
            return Err(FailureReason::Cancelled);
        }

        match self.channel.send(chunk.encode()).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_closed() => Err(FailureReason::ChannelClosed),
            Err(e) => Err(FailureReason::Send(e)),
        }
    }

    async fn wait_for_drain(&self, session_id: u32) -> std::result::Result<(), FailureReason> {
        // Register before checking so a cancel between the two is not lost.
        let cancelled = self.cancel.notified();
        if self.is_cancelled(session_id) {
            return Err(FailureReason::Cancelled);
        }

        let drained = tokio::time::timeout(
            self.config.backpressure_timeout,
            self.channel
                .buffered_amount_low(self.config.buffered_amount_low_threshold),
        );

        tokio::select! {
            result = drained => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(FailureReason::ChannelClosed),
                Err(_) => Err(FailureReason::BackpressureTimeout),
            },
            () = cancelled => Err(FailureReason::Cancelled),
        }
    }

    fn abandon(&self, session_id: u32, chunk_index: u32, reason: FailureReason) -> TransferError {
        tracing::warn!(session_id, chunk_index, %reason, "send abandoned");
        TransferError::failed(session_id, Some(chunk_index), reason)
    }

    fn is_cancelled(&self, session_id: u32) -> bool {
        self.lock_active()
            .is_some_and(|a| a.session_id == session_id && a.cancelled)
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveSend>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
