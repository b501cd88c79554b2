//! Inbound session table and payload reassembly.

use crate::CHUNK_HEADER_SIZE;
use crate::chunk::Chunk;
use crate::config::TransferConfig;
use crate::error::{FailureReason, Result, TransferError, Violation};
use crate::session::TransferSession;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// A fully reassembled inbound payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPayload {
    /// Session the payload arrived on
    pub session_id: u32,
    /// Reassembled bytes
    pub payload: Bytes,
    /// Number of chunks it arrived in
    pub total_chunks: u32,
    /// Time from first to last chunk
    pub elapsed: Duration,
}

/// Inbound reassembler for one channel.
///
/// Sessions are created by their first chunk and leave the table on
/// completion, protocol violation, supersession, eviction, idle timeout,
/// or channel closure. Failures that are not the direct result of the
/// chunk being processed are queued for [`Reassembler::take_failures`].
#[derive(Debug)]
pub struct Reassembler {
    max_chunk_payload: usize,
    max_payload_size: usize,
    max_total_chunks: u32,
    max_sessions: usize,
    session_timeout: Duration,
    sessions: HashMap<u32, TransferSession>,
    failures: VecDeque<TransferError>,
}

impl Reassembler {
    /// Create a reassembler using the inbound limits of `config`
    #[must_use]
    pub fn new(config: &TransferConfig) -> Self {
        Self {
            max_chunk_payload: config.max_message_size.saturating_sub(CHUNK_HEADER_SIZE),
            max_payload_size: config.max_payload_size,
            max_total_chunks: config.max_total_chunks(),
            max_sessions: config.max_inbound_sessions.max(1),
            session_timeout: config.inbound_session_timeout,
            sessions: HashMap::new(),
            failures: VecDeque::new(),
        }
    }

    /// Process one inbound chunk
    ///
    /// # Errors
    ///
    /// Returns `TransferError::ProtocolViolation` if the chunk breaks the
    /// protocol. Its session, if any, is discarded.
    pub fn on_chunk_received(&mut self, chunk: Chunk) -> Result<Option<CompletedPayload>> {
        self.on_chunk_received_at(chunk, Instant::now())
    }

    /// Process one inbound chunk at an explicit time
    ///
    /// # Errors
    ///
    /// Returns `TransferError::ProtocolViolation` if the chunk breaks the
    /// protocol. Its session, if any, is discarded.
    pub fn on_chunk_received_at(
        &mut self,
        chunk: Chunk,
        now: Instant,
    ) -> Result<Option<CompletedPayload>> {
        let session_id = chunk.session_id;

        if let Err(e) = chunk.validate() {
            return Err(self.reject(session_id, e.into()));
        }
        if chunk.payload.len() > self.max_chunk_payload {
            return Err(self.reject(
                session_id,
                Violation::OversizedChunk {
                    len: chunk.payload.len(),
                    max: self.max_chunk_payload,
                },
            ));
        }
        if chunk.total > self.max_total_chunks {
            return Err(self.reject(
                session_id,
                Violation::PayloadTooLarge {
                    size: u64::from(chunk.total),
                    max: u64::from(self.max_total_chunks),
                },
            ));
        }

        if let Some(session) = self.sessions.get(&session_id) {
            if chunk.index == 0 && session.has_chunk(0) {
                tracing::warn!(session_id, "session id reused, discarding previous session");
                self.fail(session_id, FailureReason::Superseded);
            } else if chunk.total != session.total_chunks {
                let expected = session.total_chunks;
                return Err(self.reject(
                    session_id,
                    Violation::TotalMismatch {
                        expected,
                        actual: chunk.total,
                    },
                ));
            } else if session.has_chunk(chunk.index) {
                return Err(self.reject(
                    session_id,
                    Violation::DuplicateChunk { index: chunk.index },
                ));
            }
        }

        if !self.sessions.contains_key(&session_id) {
            self.make_room();
            tracing::debug!(session_id, total = chunk.total, "inbound session opened");
            self.sessions.insert(
                session_id,
                TransferSession::new_receive(session_id, chunk.total, self.max_chunk_payload, now),
            );
        }

        let Some(session) = self.sessions.get_mut(&session_id) else {
            return Ok(None);
        };

        let index = chunk.index;
        session.insert_chunk(index, chunk.payload, now);
        tracing::trace!(session_id, index, total = chunk.total, "chunk received");

        if session.bytes_transferred() > self.max_payload_size as u64 {
            let size = session.bytes_transferred();
            return Err(self.reject(
                session_id,
                Violation::PayloadTooLarge {
                    size,
                    max: self.max_payload_size as u64,
                },
            ));
        }

        if !session.is_complete() {
            return Ok(None);
        }

        let Some(mut session) = self.sessions.remove(&session_id) else {
            return Ok(None);
        };
        let Some(payload) = session.assemble() else {
            return Ok(None);
        };

        let completed = CompletedPayload {
            session_id,
            total_chunks: session.total_chunks,
            elapsed: session.elapsed(now),
            payload,
        };
        tracing::info!(
            session_id,
            bytes = completed.payload.len(),
            chunks = completed.total_chunks,
            elapsed_ms = completed.elapsed.as_millis() as u64,
            "inbound transfer complete"
        );

        Ok(Some(completed))
    }

    /// Drain queued failures, oldest first
    pub fn take_failures(&mut self) -> Vec<TransferError> {
        self.failures.drain(..).collect()
    }

    /// Pop the oldest queued failure
    pub fn pop_failure(&mut self) -> Option<TransferError> {
        self.failures.pop_front()
    }

    /// Check if failures are queued
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Drop sessions idle longer than the inbound session timeout.
    ///
    /// Returns the number of sessions dropped.
    pub fn evict_stale(&mut self, now: Instant) -> usize {
        let stale: Vec<u32> = self
            .sessions
            .values()
            .filter(|s| s.idle_for(now) >= self.session_timeout)
            .map(|s| s.id)
            .collect();

        for &session_id in &stale {
            tracing::warn!(session_id, "inbound session timed out");
            self.fail(session_id, FailureReason::TimedOut);
        }
        stale.len()
    }

    /// Earliest instant at which an open session goes stale
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.sessions
            .values()
            .filter_map(|s| s.last_activity().checked_add(self.session_timeout))
            .min()
    }

    /// Discard every in-progress session with `reason`
    pub fn abort_all(&mut self, reason: FailureReason) {
        let mut ids: Vec<u32> = self.sessions.keys().copied().collect();
        ids.sort_unstable();
        if !ids.is_empty() {
            tracing::warn!(sessions = ids.len(), %reason, "discarding inbound sessions");
        }
        for session_id in ids {
            self.fail(session_id, reason.clone());
        }
    }

    /// Number of sessions in progress
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Look up an in-progress session
    #[must_use]
    pub fn session(&self, session_id: u32) -> Option<&TransferSession> {
        self.sessions.get(&session_id)
    }

    /// Evict the least recently active session if the table is full
    fn make_room(&mut self) {
        if self.sessions.len() < self.max_sessions {
            return;
        }
        let oldest = self
            .sessions
            .values()
            .min_by_key(|s| s.last_activity())
            .map(|s| s.id);
        if let Some(session_id) = oldest {
            tracing::warn!(session_id, "session table full, evicting least recently active");
            self.fail(session_id, FailureReason::Evicted);
        }
    }

    /// Remove a session and queue its failure, naming the first chunk
    /// that never arrived
    fn fail(&mut self, session_id: u32, reason: FailureReason) {
        if let Some(mut session) = self.sessions.remove(&session_id) {
            let stopped_at = session.first_missing();
            session.abort();
            self.failures
                .push_back(TransferError::failed(session_id, stopped_at, reason));
        }
    }

    /// Remove a session and build the violation returned to the caller
    fn reject(&mut self, session_id: u32, violation: Violation) -> TransferError {
        tracing::warn!(session_id, %violation, "protocol violation");
        if let Some(mut session) = self.sessions.remove(&session_id) {
            session.abort();
        }
        TransferError::violation(Some(session_id), violation)
    }
}
