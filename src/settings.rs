//! Murmur application settings
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::config_error;
use crate::error::Result;

pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const STANDARD_PORT_COORDINATOR: u16 = 5559;
pub const DEFAULT_PORT_COORDINATOR: &str = "5559";
pub const STANDARD_PORT_RELAY_PUBLISH: u16 = 5557;
pub const DEFAULT_PORT_RELAY_PUBLISH: &str = "5557";
pub const STANDARD_PORT_RELAY_SUBSCRIBE: u16 = 5558;
pub const DEFAULT_PORT_RELAY_SUBSCRIBE: &str = "5558";
pub const STANDARD_PORT_HTTP: u16 = 8559;
pub const DEFAULT_PORT_HTTP: &str = "8559";

pub const DEFAULT_SNAPSHOT_PATH: &str = "/data/reference_data.json";
pub const DEFAULT_ACTIVE_WINDOW_SECS: u64 = 30;
pub const DEFAULT_STALE_WINDOW_SECS: u64 = 60;
pub const DEFAULT_EVICTION_INTERVAL_SECS: u64 = 15;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_RELAY_CAPACITY: usize = 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunMode {
    Coordinator,
    Broker,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Coordinator => write!(f, "coordinator"),
            RunMode::Broker => write!(f, "broker"),
        }
    }
}

impl std::str::FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "coordinator" | "reference" => Ok(RunMode::Coordinator),
            "broker" | "relay" => Ok(RunMode::Broker),
            _ => Err(format!("Invalid run-mode: {}", s)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Invalid log format: {}", s)),
        }
    }
}

/// Liveness windows applied by the server registry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegistryWindows {
    /// A server is listed while its last heartbeat is younger than this
    pub active: Duration,
    /// A server is evicted once its last heartbeat is older than this
    pub stale: Duration,
}

impl Default for RegistryWindows {
    fn default() -> Self {
        Self {
            active: Duration::from_secs(DEFAULT_ACTIVE_WINDOW_SECS),
            stale: Duration::from_secs(DEFAULT_STALE_WINDOW_SECS),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    // Server listen address
    pub listen_address: String,

    // Mode of operation
    pub run_mode: RunMode,

    // Coordinator request/response port
    pub coordinator_port: u16,

    // HTTP status API port (coordinator mode only); None disables the API
    pub http_port: Option<u16>,

    // Relay ports: producers publish into one, consumers subscribe on the other
    pub relay_publish_port: u16,
    pub relay_subscribe_port: u16,

    // Registry snapshot file
    pub snapshot_path: PathBuf,

    // Liveness windows
    pub active_window_secs: u64,
    pub stale_window_secs: u64,

    // How often the background task evicts stale servers
    pub eviction_interval_secs: u64,

    // Connections with no inbound frame for this long are closed
    pub idle_timeout_secs: u64,

    // Per-direction relay buffer; slow subscribers lag past this many frames
    pub relay_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".to_string(),
            run_mode: RunMode::Coordinator,
            coordinator_port: STANDARD_PORT_COORDINATOR,
            http_port: Some(STANDARD_PORT_HTTP),
            relay_publish_port: STANDARD_PORT_RELAY_PUBLISH,
            relay_subscribe_port: STANDARD_PORT_RELAY_SUBSCRIBE,
            snapshot_path: PathBuf::from(DEFAULT_SNAPSHOT_PATH),
            active_window_secs: DEFAULT_ACTIVE_WINDOW_SECS,
            stale_window_secs: DEFAULT_STALE_WINDOW_SECS,
            eviction_interval_secs: DEFAULT_EVICTION_INTERVAL_SECS,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            relay_capacity: DEFAULT_RELAY_CAPACITY,
        }
    }
}

impl Settings {
    /// Check settings that clap cannot check on its own
    pub fn validate(&self) -> Result<()> {
        self.ip_address()?;
        if self.active_window_secs == 0 {
            return Err(config_error!("active window must be at least one second"));
        }
        if self.stale_window_secs < self.active_window_secs {
            return Err(config_error!(
                "stale window ({}s) must not be shorter than active window ({}s)",
                self.stale_window_secs,
                self.active_window_secs
            ));
        }
        if self.eviction_interval_secs == 0 {
            return Err(config_error!("eviction interval must be at least one second"));
        }
        if self.relay_capacity == 0 {
            return Err(config_error!("relay capacity must be positive"));
        }
        Ok(())
    }

    fn ip_address(&self) -> Result<IpAddr> {
        self.listen_address
            .parse::<IpAddr>()
            .map_err(|e| config_error!("Invalid ip address {}: {}", self.listen_address, e))
    }

    fn socket_addr(&self, port: u16) -> Result<SocketAddr> {
        Ok(SocketAddr::from((self.ip_address()?, port)))
    }

    pub fn coordinator_addr(&self) -> Result<SocketAddr> {
        self.socket_addr(self.coordinator_port)
    }

    pub fn http_addr(&self) -> Result<Option<SocketAddr>> {
        self.http_port.map(|port| self.socket_addr(port)).transpose()
    }

    pub fn relay_publish_addr(&self) -> Result<SocketAddr> {
        self.socket_addr(self.relay_publish_port)
    }

    pub fn relay_subscribe_addr(&self) -> Result<SocketAddr> {
        self.socket_addr(self.relay_subscribe_port)
    }

    pub fn registry_windows(&self) -> RegistryWindows {
        RegistryWindows {
            active: Duration::from_secs(self.active_window_secs),
            stale: Duration::from_secs(self.stale_window_secs),
        }
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}
