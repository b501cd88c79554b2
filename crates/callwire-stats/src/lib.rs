//! # callwire Stats
//!
//! Link quality monitoring for an existing peer connection.
//!
//! This crate provides:
//! - `sample`: one statistics pull folded into a [`StatsSnapshot`]
//! - `classify`: a pure loss-rate classification into a [`QualityTier`]
//! - [`QualityMonitor`]: on-demand and periodic sampling with a `watch`
//!   channel publishing the latest [`QualityVerdict`]
//!
//! ## Pipeline
//!
//! ```text
//! PeerConnection::get_stats()
//!         │  Vec<StatsReport>
//!         ▼
//!   StatsSnapshot  (inbound / outbound per kind, nominated pair)
//!         │  classify()
//!         ▼
//!   QualityVerdict (tier, loss rate, totals)
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod monitor;
pub mod quality;
pub mod snapshot;

pub use error::{MonitorError, Result};
pub use monitor::{MonitorConfig, QualityMonitor, sample};
pub use quality::{QualityTier, QualityVerdict, classify};
pub use snapshot::{ActivePair, StatsSnapshot, StreamCounters};
