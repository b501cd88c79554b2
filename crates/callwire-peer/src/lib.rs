//! # callwire Peer
//!
//! The seam between callwire and an already-negotiated peer connection.
//!
//! This crate provides:
//! - The `PeerConnection` and `DataChannel` async traits the monitor and
//!   transfer engine are written against
//! - Channel configuration (`DataChannelInit`) and ready states
//! - A typed model of the statistics report set (`StatsReport`)
//! - An in-memory loopback backend for tests and demos
//!
//! Signaling, ICE, and media capture live outside this crate. Whatever
//! backend implements these traits is expected to hand over a connection
//! that is already connected or connecting.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod error;
pub mod loopback;
pub mod report;

pub use connection::{ChannelState, ConnectionState, DataChannel, DataChannelInit, PeerConnection};
pub use error::{PeerError, PeerResult};
pub use loopback::{LoopbackChannel, LoopbackPeer, channel_pair};
pub use report::{CandidatePairReport, MediaKind, RtpStreamReport, StatsReport, parse_reports};
