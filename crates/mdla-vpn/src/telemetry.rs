//! Traffic Telemetry
//!
//! Periodic traffic sampling from the backend while a session is up.

use crate::backend::Backend;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One traffic sample
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrafficSnapshot {
    /// Bytes per second sent
    pub upload_rate: f64,
    /// Bytes per second received
    pub download_rate: f64,
    /// Bytes sent this session
    pub total_uploaded: u64,
    /// Bytes received this session
    pub total_downloaded: u64,
}

impl TrafficSnapshot {
    /// Format for display
    pub fn format(&self) -> String {
        format!(
            "↑ {} ({}) | ↓ {} ({})",
            format_speed(self.upload_rate),
            format_bytes(self.total_uploaded),
            format_speed(self.download_rate),
            format_bytes(self.total_downloaded)
        )
    }
}

const KIB: f64 = 1024.0;
const MIB: f64 = KIB * 1024.0;
const GIB: f64 = MIB * 1024.0;

/// Human-readable rate, 1024-based
pub fn format_speed(bytes_per_sec: f64) -> String {
    if bytes_per_sec < KIB {
        format!("{:.0} B/s", bytes_per_sec)
    } else if bytes_per_sec < MIB {
        format!("{:.1} KB/s", bytes_per_sec / KIB)
    } else if bytes_per_sec < GIB {
        format!("{:.1} MB/s", bytes_per_sec / MIB)
    } else {
        format!("{:.1} GB/s", bytes_per_sec / GIB)
    }
}

/// Human-readable byte count, 1024-based
pub fn format_bytes(total: u64) -> String {
    let bytes = total as f64;
    if bytes < KIB {
        format!("{} B", total)
    } else if bytes < MIB {
        format!("{:.1} KB", bytes / KIB)
    } else if bytes < GIB {
        format!("{:.1} MB", bytes / MIB)
    } else {
        format!("{:.1} GB", bytes / GIB)
    }
}

/// Shortest interval the poller will tick at
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Handle to a running poll task
///
/// Dropping the handle cancels the task without waiting for it.
pub struct TelemetryPoller {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl TelemetryPoller {
    /// Poll `backend` every `interval`, handing each sample to `on_sample`
    ///
    /// The first sample is taken one interval after spawning. Intervals
    /// below [`MIN_POLL_INTERVAL`] are raised to it. Poll errors are logged
    /// and skipped.
    pub fn spawn<F>(backend: Arc<dyn Backend>, interval: Duration, on_sample: F) -> Self
    where
        F: Fn(TrafficSnapshot) + Send + Sync + 'static,
    {
        let interval = interval.max(MIN_POLL_INTERVAL);
        let token = CancellationToken::new();
        let child = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                tokio::select! {
                    biased;
                    _ = child.cancelled() => break,
                    result = backend.poll_telemetry() => match result {
                        Ok(sample) => on_sample(sample),
                        Err(e) => debug!("Telemetry poll failed: {}", e),
                    },
                }
            }

            debug!("Telemetry poller stopped");
        });

        Self {
            token,
            handle: Some(handle),
        }
    }

    /// Cancel the task and wait for it to finish
    ///
    /// No sample is delivered after this returns.
    pub async fn cancel(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Telemetry poller ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for TelemetryPoller {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
