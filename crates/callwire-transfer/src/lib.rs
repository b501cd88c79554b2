//! # callwire Transfer
//!
//! Chunked transfer of arbitrary-sized payloads over a message-based data
//! channel with a per-message size limit.
//!
//! This crate provides:
//! - Chunk framing (fixed big-endian header, zero-copy decode)
//! - A sender that keeps one chunk outstanding and paces itself on the
//!   channel's buffered amount
//! - A [`Reassembler`] with a bounded, idle-swept session table
//! - [`open_channel`] and [`TransferEngine`] tying both to one channel
//!
//! ## Flow
//!
//! ```text
//!  send(payload)                                   next_event()
//!       │                                               ▲
//!       ▼                                               │
//!   split ──► encode ──► DataChannel ──► decode ──► Reassembler
//!       ▲                    │
//!       └─ buffered_amount_low(threshold)
//! ```
//!
//! Delivery is best effort: a lost chunk leaves its session incomplete
//! until it times out. There is no acknowledgment and no retransmission.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod config;
pub mod engine;
pub mod error;
pub mod reassembler;
pub mod session;

pub use chunk::{Chunk, Chunks, chunk_count, split};
pub use config::TransferConfig;
pub use engine::{SendProgress, SendReport, TransferEngine, TransferEvent, open_channel};
pub use error::{ChunkError, FailureReason, Result, TransferError, Violation};
pub use reassembler::{CompletedPayload, Reassembler};
pub use session::{Direction, SessionState, TransferSession};

/// Wire format version carried in every chunk header
pub const WIRE_VERSION: u8 = 0x01;

/// Fixed chunk header size in bytes
pub const CHUNK_HEADER_SIZE: usize = 17;
