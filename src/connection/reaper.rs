//! Background Idle Reaper
//!
//! Clients that connect and then go silent would otherwise hold their
//! buffers and tasks forever. The reaper wakes on a fixed interval and asks
//! the registry to purge every connection that has been idle for longer
//! than the configured timeout.
//!
//! ## Design
//!
//! 1. Sleep for `interval` (default: 10s)
//! 2. Purge connections idle for longer than `timeout` whose output queue
//!    is empty; a client that is still being sent a response is never cut
//!    off
//! 3. Log how many were purged
//!
//! A slow poster in the middle of POST is treated like any other client:
//! each line it sends refreshes its activity timestamp.

use crate::connection::registry::ConnectionRegistry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, trace};

/// Configuration for the idle reaper.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Interval between scans (default: 10s)
    pub interval: Duration,

    /// Idle time after which a connection is purged (default: 600s)
    pub timeout: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(600),
        }
    }
}

/// A handle to the running idle reaper.
///
/// When this handle is dropped, the reaper task will be stopped.
#[derive(Debug)]
pub struct IdleReaper {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
}

impl IdleReaper {
    /// Starts the reaper as a background task.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use newsd::connection::{ConnectionRegistry, IdleReaper, ReaperConfig};
    ///
    /// let reaper = IdleReaper::start(Arc::clone(&registry), ReaperConfig::default());
    ///
    /// // Dropping the reaper stops it
    /// drop(reaper);
    /// ```
    pub fn start(registry: Arc<ConnectionRegistry>, config: ReaperConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            interval_secs = config.interval.as_secs_f64(),
            timeout_secs = config.timeout.as_secs(),
            "Idle connection reaper started"
        );

        tokio::spawn(reaper_loop(registry, config, shutdown_rx));

        Self { shutdown_tx }
    }

    /// Stops the reaper. Called automatically on drop.
    pub fn stop(&self) {
        if self.shutdown_tx.send(true).is_ok() {
            info!("Idle connection reaper stopped");
        }
    }
}

impl Drop for IdleReaper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn reaper_loop(
    registry: Arc<ConnectionRegistry>,
    config: ReaperConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Idle reaper received shutdown signal");
                    return;
                }
            }
        }

        let purged = registry.purge_idle(Instant::now(), config.timeout);
        if purged > 0 {
            debug!(
                purged = purged,
                remaining = registry.len(),
                "Idle connections purged"
            );
        } else {
            trace!(connections = registry.len(), "Idle scan found nothing");
        }
    }
}
