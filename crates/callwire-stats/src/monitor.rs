//! On-demand and periodic quality monitoring.

use crate::error::{MonitorError, Result};
use crate::quality::{QualityTier, QualityVerdict, classify};
use crate::snapshot::StatsSnapshot;
use callwire_peer::PeerConnection;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Quality monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Time between periodic samples
    pub interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
        }
    }
}

impl MonitorConfig {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::InvalidConfig` if the interval is zero.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(MonitorError::InvalidConfig(Cow::Borrowed(
                "interval must be non-zero",
            )));
        }
        Ok(())
    }
}

/// Pull one statistics report set and fold it into a snapshot.
///
/// An empty report set is a valid, empty snapshot.
///
/// # Errors
///
/// Returns `MonitorError::NoConnection` if `connection` is `None`, is
/// closed or failed, or rejects the statistics query.
pub async fn sample(connection: Option<&dyn PeerConnection>) -> Result<StatsSnapshot> {
    let connection = connection.ok_or(MonitorError::no_connection())?;

    let state = connection.connection_state();
    if !state.is_usable() {
        tracing::debug!(?state, "skipping stats pull on unusable connection");
        return Err(MonitorError::no_connection());
    }

    let reports = connection.get_stats().await?;
    let snapshot = StatsSnapshot::from_reports(&reports, SystemTime::now());

    tracing::trace!(
        reports = reports.len(),
        inbound = snapshot.inbound.len(),
        outbound = snapshot.outbound.len(),
        active_pair = snapshot.active_pair.is_some(),
        "stats sampled"
    );

    Ok(snapshot)
}

/// Link quality monitor for one peer connection
pub struct QualityMonitor {
    /// Configuration
    config: MonitorConfig,

    /// Connection being observed
    connection: Option<Arc<dyn PeerConnection>>,
}

impl QualityMonitor {
    /// Create a monitor with no connection attached
    #[must_use]
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            connection: None,
        }
    }

    /// Create a monitor observing `connection`
    #[must_use]
    pub fn with_connection(config: MonitorConfig, connection: Arc<dyn PeerConnection>) -> Self {
        Self {
            config,
            connection: Some(connection),
        }
    }

    /// Observe `connection` from now on
    pub fn attach(&mut self, connection: Arc<dyn PeerConnection>) {
        self.connection = Some(connection);
    }

    /// Stop observing the current connection
    pub fn detach(&mut self) -> Option<Arc<dyn PeerConnection>> {
        self.connection.take()
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Pull one snapshot from the attached connection
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::NoConnection` if no usable connection is attached.
    pub async fn sample(&self) -> Result<StatsSnapshot> {
        sample(self.connection.as_deref()).await
    }

    /// Sample and classify once
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::NoConnection` if no usable connection is attached.
    pub async fn check(&self) -> Result<QualityVerdict> {
        let snapshot = self.sample().await?;
        Ok(classify(&snapshot))
    }

    /// Run the monitor on a fixed interval.
    ///
    /// The returned receiver holds the latest verdict (`None` until the
    /// first successful sample). A failed sample is logged and leaves the
    /// previous verdict in place. The task exits once every receiver has
    /// been dropped.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::InvalidConfig` if the interval is zero.
    pub fn spawn(self) -> Result<(JoinHandle<()>, watch::Receiver<Option<QualityVerdict>>)> {
        self.config.validate()?;

        let (tx, rx) = watch::channel(None);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last_tier: Option<QualityTier> = None;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    () = tx.closed() => break,
                }

                match self.check().await {
                    Ok(verdict) => {
                        if last_tier != Some(verdict.tier) {
                            tracing::info!(
                                tier = %verdict.tier,
                                loss = verdict.packet_loss_rate,
                                previous = ?last_tier,
                                "link quality changed"
                            );
                            last_tier = Some(verdict.tier);
                        }
                        tx.send_replace(Some(verdict));
                    }
                    Err(e) => {
                        tracing::warn!("quality sample failed: {}", e);
                    }
                }
            }

            tracing::debug!("quality monitor stopped");
        });

        Ok((handle, rx))
    }
}
