//! Transfer session state machine.

use bytes::{Bytes, BytesMut};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Transfer session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, nothing transferred yet
    Pending,
    /// Outbound chunks are being handed to the channel
    Sending,
    /// Inbound chunks are arriving
    Receiving,
    /// Every chunk was transferred
    Complete,
    /// Abandoned; never resumes
    Aborted,
}

impl SessionState {
    /// Returns true for states that never transition again
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Complete | SessionState::Aborted)
    }
}

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Sending a payload
    Send,
    /// Reassembling a payload
    Receive,
}

/// Transfer session
///
/// Tracks one payload moving over the channel, in either direction.
/// Outbound sessions only count progress; inbound sessions also hold the
/// received chunk payloads until the session completes.
#[derive(Debug)]
pub struct TransferSession {
    /// Session id
    pub id: u32,
    /// Transfer direction
    pub direction: Direction,
    /// Total number of chunks
    pub total_chunks: u32,
    /// Chunk size in bytes (largest accepted payload on the receive side)
    pub chunk_size: usize,

    /// Current state
    state: SessionState,

    /// Received chunk payloads by index (inbound only)
    received: BTreeMap<u32, Bytes>,
    /// Chunks transferred so far
    chunks_done: u32,
    /// Payload bytes transferred so far
    bytes_transferred: u64,
    /// Payload length, known up front on the send side
    payload_len: Option<u64>,

    /// Creation timestamp
    created_at: Instant,
    /// Last chunk timestamp
    last_activity: Instant,
    /// Completion timestamp
    completed_at: Option<Instant>,
}

impl TransferSession {
    /// Create a new send session
    #[must_use]
    pub fn new_send(id: u32, total_chunks: u32, payload_len: usize, chunk_size: usize) -> Self {
        let mut session = Self::new(id, Direction::Send, total_chunks, chunk_size, Instant::now());
        session.payload_len = Some(payload_len as u64);
        session
    }

    /// Create a new receive session
    #[must_use]
    pub fn new_receive(id: u32, total_chunks: u32, chunk_size: usize, now: Instant) -> Self {
        Self::new(id, Direction::Receive, total_chunks, chunk_size, now)
    }

    fn new(
        id: u32,
        direction: Direction,
        total_chunks: u32,
        chunk_size: usize,
        now: Instant,
    ) -> Self {
        Self {
            id,
            direction,
            total_chunks,
            chunk_size,
            state: SessionState::Pending,
            received: BTreeMap::new(),
            chunks_done: 0,
            bytes_transferred: 0,
            payload_len: None,
            created_at: now,
            last_activity: now,
            completed_at: None,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move out of `Pending` into the direction's active state
    pub fn start(&mut self, now: Instant) {
        if self.state == SessionState::Pending {
            self.state = match self.direction {
                Direction::Send => SessionState::Sending,
                Direction::Receive => SessionState::Receiving,
            };
            self.last_activity = now;
        }
    }

    /// Record that outbound chunk `index` was handed to the channel.
    ///
    /// Chunks must be recorded in ascending order; anything else is ignored.
    pub fn mark_chunk_sent(&mut self, index: u32, len: usize, now: Instant) {
        if self.state != SessionState::Sending || index != self.chunks_done {
            return;
        }

        self.chunks_done += 1;
        self.bytes_transferred += len as u64;
        self.last_activity = now;

        if self.chunks_done == self.total_chunks {
            self.state = SessionState::Complete;
            self.completed_at = Some(now);
        }
    }

    /// Store an inbound chunk payload.
    ///
    /// Returns false if the index is out of range, already present, or the
    /// session is not receiving.
    pub fn insert_chunk(&mut self, index: u32, payload: Bytes, now: Instant) -> bool {
        self.start(now);
        if self.state != SessionState::Receiving
            || index >= self.total_chunks
            || self.received.contains_key(&index)
        {
            return false;
        }

        self.bytes_transferred += payload.len() as u64;
        self.received.insert(index, payload);
        self.chunks_done += 1;
        self.last_activity = now;

        if self.chunks_done == self.total_chunks {
            self.state = SessionState::Complete;
            self.completed_at = Some(now);
        }
        true
    }

    /// Check if an inbound chunk is present
    #[must_use]
    pub fn has_chunk(&self, index: u32) -> bool {
        self.received.contains_key(&index)
    }

    /// Concatenate the inbound chunks in index order.
    ///
    /// Returns `None` unless the session is complete. The chunk payloads
    /// are released.
    pub fn assemble(&mut self) -> Option<Bytes> {
        if self.state != SessionState::Complete || self.direction != Direction::Receive {
            return None;
        }

        let mut out = BytesMut::with_capacity(self.bytes_transferred as usize);
        for payload in std::mem::take(&mut self.received).into_values() {
            out.extend_from_slice(&payload);
        }
        Some(out.freeze())
    }

    /// Abandon the session
    pub fn abort(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Aborted;
            self.received.clear();
        }
    }

    /// Check if the session is complete
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state == SessionState::Complete
    }

    /// Chunks transferred so far
    #[must_use]
    pub fn chunks_done(&self) -> u32 {
        self.chunks_done
    }

    /// Payload bytes transferred so far
    #[must_use]
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    /// Get transfer progress (0.0 to 1.0)
    #[must_use]
    pub fn progress(&self) -> f64 {
        match self.payload_len {
            Some(0) => 1.0,
            Some(len) => self.bytes_transferred as f64 / len as f64,
            None if self.total_chunks == 0 => 1.0,
            None => f64::from(self.chunks_done) / f64::from(self.total_chunks),
        }
    }

    /// Time since the session was created, frozen at completion
    #[must_use]
    pub fn elapsed(&self, now: Instant) -> Duration {
        self.completed_at
            .unwrap_or(now)
            .saturating_duration_since(self.created_at)
    }

    /// Time since the last chunk
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Last chunk timestamp
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Get missing inbound chunk indices
    #[must_use]
    pub fn missing_chunks(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|i| !self.received.contains_key(i))
            .collect()
    }

    /// Lowest inbound chunk index not yet received
    #[must_use]
    pub fn first_missing(&self) -> Option<u32> {
        (0..self.total_chunks).find(|i| !self.received.contains_key(i))
    }

    /// Get number of chunks not yet transferred
    #[must_use]
    pub fn missing_count(&self) -> u32 {
        self.total_chunks - self.chunks_done
    }
}
