//! Sidecar configuration from environment variables.
//!
//! The orchestrator drives this process entirely through the environment;
//! there is no command-line surface. All fixed addresses and intervals are
//! collected into one immutable [`SidecarConfig`] at startup and passed
//! explicitly to every component.
//!
//! # Environment Variables
//!
//! - `MOULT_MODE`: `serve` (default) or `idle`
//! - `MOULT_GENERATION`: own generation identifier (integer string)
//! - `MOULT_SIBLING_GENERATION`: sibling generation identifier; absent,
//!   empty, or `"0"` means no upgrade pair
//! - `MOULT_SERVICE_PORT`: well-known service port. Default: `9091`
//! - `MOULT_HANDOFF_SOCKET`: rendezvous socket path.
//!   Default: `/dev/shm/moult-handoff.sock`
//! - `MOULT_READY_FILE`: readiness marker path. Default: `/result`
//! - `MOULT_SERVE_DELAY_MS`: artificial latency on the health endpoint.
//!   Default: `10`
//! - `MOULT_CONFIRM_SECS`: readiness confirmation interval. Default: `5`
//! - `MOULT_DRAIN_SECS`: post-relinquish drain interval. Default: `10`
//! - `MOULT_YIELD_SECS`: stale-older-instance yield pause. Default: `60`
//! - `MOULT_HANDOFF_TIMEOUT_SECS`: bound on every successor-side
//!   handoff wait. Default: `5`

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::info;

/// Sidecar operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SidecarMode {
    /// Acquire a listener and serve traffic.
    #[default]
    Serve,

    /// Do nothing, forever. Used for the placeholder container slot an
    /// orchestrator schedules before the real sidecar image arrives; the
    /// process must stay alive without touching the port or the
    /// readiness marker.
    Idle,
}

impl fmt::Display for SidecarMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SidecarMode::Serve => write!(f, "Serve"),
            SidecarMode::Idle => write!(f, "Idle"),
        }
    }
}

impl SidecarMode {
    /// Parse the mode from a string.
    ///
    /// Valid values (case-insensitive): "idle", "noop", "placeholder" ->
    /// Idle. Any other value defaults to Serve.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "idle" | "noop" | "placeholder" => SidecarMode::Idle,
            _ => SidecarMode::Serve,
        }
    }
}

/// Sidecar configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct SidecarConfig {
    /// Operating mode
    pub mode: SidecarMode,
    /// Own generation identifier; also shown by the health endpoint
    pub generation: String,
    /// Sibling generation identifier, if an upgrade pair exists
    pub sibling_generation: Option<String>,
    /// Well-known service port
    pub service_port: u16,
    /// Rendezvous socket path for the listener handoff
    pub handoff_socket: PathBuf,
    /// Readiness marker path
    pub ready_file: PathBuf,
    /// Artificial latency on the health endpoint
    pub serve_delay: Duration,
    /// How long the service loop must run cleanly before the readiness
    /// marker is written
    pub confirm_after: Duration,
    /// How long a relinquishing process stays alive for stragglers
    pub drain_wait: Duration,
    /// How long a stale older generation pauses before exiting
    pub yield_wait: Duration,
    /// Bound on every successor-side handoff wait
    pub handoff_timeout: Duration,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            mode: SidecarMode::default(),
            generation: "0".to_string(),
            sibling_generation: None,
            service_port: 9091,
            handoff_socket: PathBuf::from("/dev/shm/moult-handoff.sock"),
            ready_file: PathBuf::from("/result"),
            serve_delay: Duration::from_millis(10),
            confirm_after: Duration::from_secs(5),
            drain_wait: Duration::from_secs(10),
            yield_wait: Duration::from_secs(60),
            handoff_timeout: Duration::from_secs(5),
        }
    }
}

impl SidecarConfig {
    /// Load the configuration from environment variables, falling back to
    /// the defaults above for anything absent or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            mode: SidecarMode::from_str(&var("MOULT_MODE").unwrap_or_default()),
            generation: var("MOULT_GENERATION").unwrap_or(defaults.generation),
            sibling_generation: var("MOULT_SIBLING_GENERATION"),
            service_port: parsed_var("MOULT_SERVICE_PORT", defaults.service_port),
            handoff_socket: var("MOULT_HANDOFF_SOCKET")
                .map(PathBuf::from)
                .unwrap_or(defaults.handoff_socket),
            ready_file: var("MOULT_READY_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.ready_file),
            serve_delay: Duration::from_millis(parsed_var("MOULT_SERVE_DELAY_MS", 10)),
            confirm_after: Duration::from_secs(parsed_var("MOULT_CONFIRM_SECS", 5)),
            drain_wait: Duration::from_secs(parsed_var("MOULT_DRAIN_SECS", 10)),
            yield_wait: Duration::from_secs(parsed_var("MOULT_YIELD_SECS", 60)),
            handoff_timeout: Duration::from_secs(parsed_var("MOULT_HANDOFF_TIMEOUT_SECS", 5)),
        }
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        info!("Running in {} mode", self.mode);
        info!("Generation: {}", self.generation);
        match &self.sibling_generation {
            Some(sibling) => info!("Sibling generation: {}", sibling),
            None => info!("Sibling generation: none"),
        }
        info!("Service port: {}", self.service_port);
        info!("Handoff socket: {}", self.handoff_socket.display());
        info!("Readiness marker: {}", self.ready_file.display());
    }
}

/// Read an environment variable, treating empty values as absent.
fn var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var<T: FromStr>(key: &str, default: T) -> T {
    var(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_from_str() {
        assert_eq!(SidecarMode::from_str("idle"), SidecarMode::Idle);
        assert_eq!(SidecarMode::from_str("IDLE"), SidecarMode::Idle);
        assert_eq!(SidecarMode::from_str("noop"), SidecarMode::Idle);
        assert_eq!(SidecarMode::from_str("placeholder"), SidecarMode::Idle);

        assert_eq!(SidecarMode::from_str("serve"), SidecarMode::Serve);
        assert_eq!(SidecarMode::from_str(""), SidecarMode::Serve);
        assert_eq!(SidecarMode::from_str("unknown"), SidecarMode::Serve);
    }

    #[test]
    fn mode_display() {
        assert_eq!(format!("{}", SidecarMode::Serve), "Serve");
        assert_eq!(format!("{}", SidecarMode::Idle), "Idle");
    }

    #[test]
    fn default_config() {
        let config = SidecarConfig::default();
        assert_eq!(config.mode, SidecarMode::Serve);
        assert_eq!(config.generation, "0");
        assert!(config.sibling_generation.is_none());
        assert_eq!(config.service_port, 9091);
        assert_eq!(config.confirm_after, Duration::from_secs(5));
        assert_eq!(config.drain_wait, Duration::from_secs(10));
        assert_eq!(config.yield_wait, Duration::from_secs(60));
        assert_eq!(config.handoff_timeout, Duration::from_secs(5));
    }

    // NOTE: from_env() is not exercised with set_var here because env vars
    // are shared process-wide and tests run in parallel. The parsing
    // helpers cover the interesting paths.
    #[test]
    fn parsed_var_falls_back_on_garbage() {
        assert_eq!(parsed_var("MOULT_TEST_UNSET_VARIABLE", 7u16), 7);
    }
}
