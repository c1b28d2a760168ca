//! Connection Controller
//!
//! Owns the lifecycle of one proxy session: synthesizes the core config,
//! drives the backend through start and stop, tracks traffic, and tells
//! observers about every transition.
//!
//! # Usage
//!
//! ```rust,ignore
//! let backend = Arc::new(ProcessBackend::from_config(&config));
//! let controller = ConnectionController::from_config(backend, &config);
//! controller.subscribe(Arc::new(MyObserver));
//!
//! if controller.start(&descriptor).await {
//!     let proxy = controller.proxy_endpoints(); // ["socks5://127.0.0.1:10808"]
//! }
//!
//! controller.stop().await;
//! ```
//!
//! # States
//!
//! ```text
//! Disconnected ──start──▶ Connecting ──ok──▶ Connected ──stop──▶ Disconnecting ──▶ Disconnected
//!                              │                                       │
//!                              └──────────fail──────▶ Error ◀──────fail─┘
//! ```

use crate::backend::Backend;
use crate::config::AppConfig;
use crate::synth::{ConfigSynthesizer, CoreConfig};
use crate::telemetry::{MIN_POLL_INTERVAL, TelemetryPoller, TrafficSnapshot};
use chrono::{DateTime, Utc};
use mdla_link::{ProtocolKind, ServerDescriptor};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    /// Last start or stop failed
    Error,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Start or stop in progress
    pub fn is_transitioning(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Disconnecting)
    }
}

/// Snapshot of the current session
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub active_protocol: Option<ProtocolKind>,
    /// Label of the active server
    pub active_server: Option<String>,
    pub backend_process_id: Option<u32>,
    pub upload_rate: f64,
    pub download_rate: f64,
    pub total_uploaded: u64,
    pub total_downloaded: u64,
    pub error_message: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl ConnectionStatus {
    pub fn traffic(&self) -> TrafficSnapshot {
        TrafficSnapshot {
            upload_rate: self.upload_rate,
            download_rate: self.download_rate,
            total_uploaded: self.total_uploaded,
            total_downloaded: self.total_downloaded,
        }
    }
}

/// Receives controller notifications
///
/// Called synchronously on the task that caused the change.
pub trait ConnectionObserver: Send + Sync {
    fn on_status_change(&self, _status: &ConnectionStatus) {}

    fn on_traffic(&self, _traffic: &TrafficSnapshot) {}
}

/// Status and observers, shared with the telemetry task
#[derive(Default)]
struct Shared {
    status: Mutex<ConnectionStatus>,
    observers: RwLock<Vec<Arc<dyn ConnectionObserver>>>,
}

impl Shared {
    /// Mutate the status, then notify with the result
    fn update(&self, change: impl FnOnce(&mut ConnectionStatus)) {
        let snapshot = {
            let mut status = self.status.lock();
            change(&mut status);
            status.clone()
        };
        for observer in self.observers() {
            observer.on_status_change(&snapshot);
        }
    }

    fn apply_traffic(&self, sample: TrafficSnapshot) {
        let traffic = {
            let mut status = self.status.lock();
            if !status.state.is_connected() {
                return;
            }
            status.upload_rate = sample.upload_rate;
            status.download_rate = sample.download_rate;
            status.total_uploaded = status.total_uploaded.max(sample.total_uploaded);
            status.total_downloaded = status.total_downloaded.max(sample.total_downloaded);
            status.traffic()
        };
        for observer in self.observers() {
            observer.on_traffic(&traffic);
        }
    }

    fn observers(&self) -> Vec<Arc<dyn ConnectionObserver>> {
        self.observers.read().clone()
    }

    fn state(&self) -> ConnectionState {
        self.status.lock().state
    }
}

/// Connection controller
pub struct ConnectionController {
    backend: Arc<dyn Backend>,
    synthesizer: ConfigSynthesizer,
    poll_interval: Duration,
    shared: Arc<Shared>,
    /// Held for a whole start or stop; owns the running poller
    lifecycle: tokio::sync::Mutex<Option<TelemetryPoller>>,
}

impl ConnectionController {
    pub fn new(backend: Arc<dyn Backend>, synthesizer: ConfigSynthesizer) -> Self {
        Self {
            backend,
            synthesizer,
            poll_interval: Duration::from_secs(1),
            shared: Arc::new(Shared::default()),
            lifecycle: tokio::sync::Mutex::new(None),
        }
    }

    pub fn from_config(backend: Arc<dyn Backend>, config: &AppConfig) -> Self {
        Self::new(backend, ConfigSynthesizer::from_config(config))
            .with_poll_interval(config.poll_interval())
    }

    /// Telemetry cadence, never below [`MIN_POLL_INTERVAL`]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    /// Register an observer for all later notifications
    pub fn subscribe(&self, observer: Arc<dyn ConnectionObserver>) {
        self.shared.observers.write().push(observer);
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.lock().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Local proxy endpoints served while connected
    pub fn proxy_endpoints(&self) -> Vec<String> {
        vec![format!("socks5://127.0.0.1:{}", self.synthesizer.socks_port)]
    }

    /// Connect to `descriptor`, replacing any current session
    ///
    /// Concurrent calls are serialized; a later call waits for the earlier
    /// one and then replaces its connection.
    pub async fn start(&self, descriptor: &ServerDescriptor) -> bool {
        let mut poller = self.lifecycle.lock().await;

        if self.shared.state().is_connected() {
            info!("Replacing active connection");
            self.stop_locked(&mut poller).await;
        }

        info!("Connecting to {}", descriptor);
        self.shared.update(|s| {
            s.state = ConnectionState::Connecting;
            s.error_message = None;
            s.active_protocol = Some(descriptor.protocol);
            s.active_server = Some(descriptor.label());
        });

        let config = self.synthesizer.synthesize(descriptor);
        match self.bring_up(&config).await {
            Ok(()) => {
                let shared = Arc::clone(&self.shared);
                *poller = Some(TelemetryPoller::spawn(
                    Arc::clone(&self.backend),
                    self.poll_interval,
                    move |sample| shared.apply_traffic(sample),
                ));

                let pid = self.backend.process_id();
                self.shared.update(|s| {
                    s.state = ConnectionState::Connected;
                    s.error_message = None;
                    s.backend_process_id = pid;
                    s.upload_rate = 0.0;
                    s.download_rate = 0.0;
                    s.total_uploaded = 0;
                    s.total_downloaded = 0;
                    s.connected_at = Some(Utc::now());
                });
                info!("Connected ({})", descriptor.label());
                true
            }
            Err(message) => {
                error!("Connection failed: {}", message);
                if let Err(e) = self.backend.terminate().await {
                    debug!("Cleanup after failed start: {}", e);
                }
                self.shared.update(|s| {
                    s.state = ConnectionState::Error;
                    s.error_message = Some(message);
                    s.backend_process_id = None;
                    s.upload_rate = 0.0;
                    s.download_rate = 0.0;
                    s.connected_at = None;
                });
                false
            }
        }
    }

    async fn bring_up(&self, config: &CoreConfig) -> Result<(), String> {
        match self.backend.acquire_interface().await {
            Ok(true) => {}
            Ok(false) => return Err("Interface permission denied".to_string()),
            Err(e) => return Err(e.to_string()),
        }
        match self.backend.launch(config).await {
            Ok(true) => Ok(()),
            Ok(false) => Err("Proxy core failed to start".to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Disconnect
    ///
    /// Returns true without notifying when already disconnected.
    pub async fn stop(&self) -> bool {
        let mut poller = self.lifecycle.lock().await;
        self.stop_locked(&mut poller).await
    }

    async fn stop_locked(&self, poller: &mut Option<TelemetryPoller>) -> bool {
        if self.shared.state() == ConnectionState::Disconnected {
            return true;
        }

        info!("Disconnecting");
        self.shared.update(|s| s.state = ConnectionState::Disconnecting);

        if let Some(poller) = poller.take() {
            poller.cancel().await;
        }

        let result = match self.backend.terminate().await {
            Ok(true) => Ok(()),
            Ok(false) => Err("Proxy core did not stop".to_string()),
            Err(e) => Err(e.to_string()),
        };

        match result {
            Ok(()) => {
                self.shared.update(|s| {
                    s.state = ConnectionState::Disconnected;
                    s.error_message = None;
                    s.backend_process_id = None;
                    s.upload_rate = 0.0;
                    s.download_rate = 0.0;
                    s.connected_at = None;
                });
                info!("Disconnected");
                true
            }
            Err(message) => {
                warn!("Disconnect failed: {}", message);
                self.shared.update(|s| {
                    s.state = ConnectionState::Error;
                    s.error_message = Some(message);
                });
                false
            }
        }
    }
}
