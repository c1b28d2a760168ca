//! Platform Backend
//!
//! The seam between the connection controller and whatever actually runs
//! the proxy core. [`ProcessBackend`] runs it as a child process and reads
//! traffic from interface byte counters.

use crate::config::{AppConfig, CORE_CONFIG_FILE};
use crate::synth::CoreConfig;
use crate::telemetry::TrafficSnapshot;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Time a freshly spawned core gets to fail on its config
const STARTUP_GRACE: Duration = Duration::from_millis(500);

/// Backend errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Failed to start core: {0}")]
    SpawnFailed(String),

    #[error("Backend error: {0}")]
    Other(String),
}

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self {
        BackendError::IoError(e.to_string())
    }
}

/// Runs the proxy core on behalf of the controller
///
/// `Ok(false)` means the step was refused or did not take effect;
/// `Err` means it could not be attempted.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Obtain whatever the platform needs before launching
    async fn acquire_interface(&self) -> Result<bool, BackendError>;

    /// Start the core with `config`
    async fn launch(&self, config: &CoreConfig) -> Result<bool, BackendError>;

    /// Stop the core
    async fn terminate(&self) -> Result<bool, BackendError>;

    /// Current session traffic
    async fn poll_telemetry(&self) -> Result<TrafficSnapshot, BackendError>;

    /// Process id of the running core, if any
    fn process_id(&self) -> Option<u32> {
        None
    }
}

/// Rate and total computation from raw interface counters
#[derive(Debug, Default)]
struct CounterState {
    /// (rx, tx) at session start
    baseline: Option<(u64, u64)>,
    /// Previous sample: (time, rx, tx)
    last: Option<(Instant, u64, u64)>,
}

impl CounterState {
    fn reset(&mut self, now: Instant, counters: Option<(u64, u64)>) {
        self.baseline = counters;
        self.last = counters.map(|(rx, tx)| (now, rx, tx));
    }

    fn sample(&mut self, now: Instant, rx: u64, tx: u64) -> TrafficSnapshot {
        let (base_rx, base_tx) = *self.baseline.get_or_insert((rx, tx));

        let (upload_rate, download_rate) = match self.last {
            Some((at, last_rx, last_tx)) => {
                let secs = now.saturating_duration_since(at).as_secs_f64();
                if secs > 0.0 {
                    (
                        tx.saturating_sub(last_tx) as f64 / secs,
                        rx.saturating_sub(last_rx) as f64 / secs,
                    )
                } else {
                    (0.0, 0.0)
                }
            }
            None => (0.0, 0.0),
        };
        self.last = Some((now, rx, tx));

        TrafficSnapshot {
            upload_rate,
            download_rate,
            total_uploaded: tx.saturating_sub(base_tx),
            total_downloaded: rx.saturating_sub(base_rx),
        }
    }
}

/// Receive and transmit byte counters of `interface` from `/proc/net/dev`
/// content
pub fn parse_net_dev(content: &str, interface: &str) -> Option<(u64, u64)> {
    content.lines().skip(2).find_map(|line| {
        let (name, stats) = line.split_once(':')?;
        if name.trim() != interface {
            return None;
        }
        let fields: Vec<u64> = stats
            .split_whitespace()
            .map(|f| f.parse().unwrap_or(0))
            .collect();
        Some((*fields.first()?, *fields.get(8)?))
    })
}

/// Runs `<binary> run -c <config file>` as a child process
pub struct ProcessBackend {
    binary: String,
    data_dir: PathBuf,
    config_path: PathBuf,
    interface: String,
    child: tokio::sync::Mutex<Option<Child>>,
    pid: AtomicU32,
    counters: Mutex<CounterState>,
}

impl ProcessBackend {
    pub fn new(binary: impl Into<String>, data_dir: impl Into<PathBuf>, interface: impl Into<String>) -> Self {
        let data_dir = data_dir.into();
        Self {
            binary: binary.into(),
            config_path: data_dir.join(CORE_CONFIG_FILE),
            data_dir,
            interface: interface.into(),
            child: tokio::sync::Mutex::new(None),
            pid: AtomicU32::new(0),
            counters: Mutex::new(CounterState::default()),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let mut backend = Self::new(&config.core_binary, &config.data_dir, &config.tun_interface);
        backend.config_path = config.core_config_path();
        backend
    }

    /// Where the core config is written
    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    async fn read_counters(&self) -> Option<(u64, u64)> {
        if !cfg!(target_os = "linux") {
            return None;
        }
        let content = tokio::fs::read_to_string("/proc/net/dev").await.ok()?;
        parse_net_dev(&content, &self.interface)
    }
}

#[async_trait]
impl Backend for ProcessBackend {
    async fn acquire_interface(&self) -> Result<bool, BackendError> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        Ok(true)
    }

    async fn launch(&self, config: &CoreConfig) -> Result<bool, BackendError> {
        let mut slot = self.child.lock().await;
        if slot.is_some() {
            warn!("Core already running, refusing second launch");
            return Ok(false);
        }

        tokio::fs::write(&self.config_path, config.to_json_pretty()).await?;

        let mut child = Command::new(&self.binary)
            .arg("run")
            .arg("-c")
            .arg(&self.config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackendError::SpawnFailed(format!("{}: {}", self.binary, e)))?;

        tokio::time::sleep(STARTUP_GRACE).await;
        if let Some(status) = child.try_wait()? {
            warn!("Core exited during startup ({})", status);
            return Ok(false);
        }

        let pid = child.id().unwrap_or(0);
        self.pid.store(pid, Ordering::SeqCst);
        *slot = Some(child);

        let baseline = self.read_counters().await;
        self.counters.lock().reset(Instant::now(), baseline);

        info!("Core started (pid {})", pid);
        Ok(true)
    }

    async fn terminate(&self) -> Result<bool, BackendError> {
        let child = self.child.lock().await.take();
        self.pid.store(0, Ordering::SeqCst);
        *self.counters.lock() = CounterState::default();

        if let Some(mut child) = child {
            child.kill().await?;
            info!("Core stopped");
        } else {
            debug!("Terminate with no running core");
        }
        Ok(true)
    }

    async fn poll_telemetry(&self) -> Result<TrafficSnapshot, BackendError> {
        let Some((rx, tx)) = self.read_counters().await else {
            return Ok(TrafficSnapshot::default());
        };
        Ok(self.counters.lock().sample(Instant::now(), rx, tx))
    }

    fn process_id(&self) -> Option<u32> {
        match self.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::ConfigSynthesizer;
    use mdla_link::{ProtocolKind, ServerDescriptor};

    const NET_DEV: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo:  123456     100    0    0    0     0          0         0   123456     100    0    0    0     0       0          0
  tun0: 5000000    4000    0    0    0     0          0         0  1200000    3000    0    0    0     0       0          0
";

    fn sample_config() -> CoreConfig {
        ConfigSynthesizer::default().synthesize(&ServerDescriptor::new(
            ProtocolKind::Trojan,
            "t.example.com",
            443,
        ))
    }

    #[test]
    fn test_parse_net_dev() {
        assert_eq!(parse_net_dev(NET_DEV, "tun0"), Some((5_000_000, 1_200_000)));
        assert_eq!(parse_net_dev(NET_DEV, "lo"), Some((123_456, 123_456)));
        assert_eq!(parse_net_dev(NET_DEV, "wg0"), None);
    }

    #[test]
    fn test_counter_rates_and_totals() {
        let start = Instant::now();
        let mut state = CounterState::default();
        state.reset(start, Some((1000, 500)));

        let s = state.sample(start + Duration::from_secs(2), 3048, 1524);
        assert_eq!(s.total_downloaded, 2048);
        assert_eq!(s.total_uploaded, 1024);
        assert_eq!(s.download_rate, 1024.0);
        assert_eq!(s.upload_rate, 512.0);

        let s = state.sample(start + Duration::from_secs(3), 3048, 1524);
        assert_eq!(s.download_rate, 0.0);
        assert_eq!(s.total_downloaded, 2048);
    }

    #[test]
    fn test_counter_without_baseline() {
        let mut state = CounterState::default();
        let s = state.sample(Instant::now(), 10, 20);
        assert_eq!(s, TrafficSnapshot::default());
    }

    #[test]
    fn test_config_path_follows_app_config() {
        let config = AppConfig {
            data_dir: PathBuf::from("/var/lib/mdla"),
            ..Default::default()
        };
        let backend = ProcessBackend::from_config(&config);
        assert_eq!(backend.config_path(), &config.core_config_path());
        assert_eq!(
            ProcessBackend::new("xray", "/var/lib/mdla", "tun0").config_path(),
            &config.core_config_path()
        );
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ProcessBackend::new("/nonexistent/mdla-core", dir.path(), "tun0");

        assert_eq!(backend.acquire_interface().await, Ok(true));
        let result = backend.launch(&sample_config()).await;
        assert!(matches!(result, Err(BackendError::SpawnFailed(_))));
        assert!(backend.config_path().exists());
        assert_eq!(backend.process_id(), None);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_core_exiting_at_startup() {
        let dir = tempfile::tempdir().unwrap();
        // `false run -c <file>` exits 1 immediately
        let backend = ProcessBackend::new("false", dir.path(), "tun0");

        backend.acquire_interface().await.unwrap();
        assert_eq!(backend.launch(&sample_config()).await, Ok(false));
        assert_eq!(backend.process_id(), None);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_launch_and_terminate() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("core.sh");
        std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let backend = ProcessBackend::new(script.to_string_lossy(), dir.path().join("data"), "tun0");
        assert_eq!(backend.acquire_interface().await, Ok(true));
        assert_eq!(backend.launch(&sample_config()).await, Ok(true));
        assert!(backend.process_id().is_some());

        let written = std::fs::read_to_string(backend.config_path()).unwrap();
        assert!(written.contains("socks-in"));

        assert_eq!(backend.terminate().await, Ok(true));
        assert_eq!(backend.process_id(), None);
        assert_eq!(backend.terminate().await, Ok(true));
    }
}
