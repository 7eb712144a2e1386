//! CLI for this application
//!
use std::path::PathBuf;

use crate::settings::{self, LogFormat, RunMode};

pub use crate::settings::{APP_NAME, APP_VERSION};

#[derive(Clone, Debug, clap::Parser)]
#[command(name = "murmur", version, about = "Chat fleet coordinator and pub/sub relay")]
pub struct Cli {
    // Server listen address
    #[clap(
        long,
        default_value = "0.0.0.0",
        env("MURMUR_LISTEN_ADDRESS"),
        help = "IP Address to listen on"
    )]
    pub listen_address: String,

    // Which service this process runs
    #[clap(
        long,
        default_value = "coordinator",
        env("MURMUR_RUN_MODE"),
        help = "run-mode: 'coordinator' or 'broker'"
    )]
    pub run_mode: RunMode,

    // Coordinator port
    #[clap(
        long,
        default_value = settings::DEFAULT_PORT_COORDINATOR,
        env("MURMUR_COORDINATOR_PORT"),
        help = "Port the coordinator answers rank/list/heartbeat requests on"
    )]
    pub coordinator_port: u16,

    // HTTP status API port
    #[clap(
        long,
        default_value = settings::DEFAULT_PORT_HTTP,
        env("MURMUR_HTTP_PORT"),
        help = "Port to bind the coordinator HTTP status API to"
    )]
    pub http_port: u16,

    #[clap(
        long,
        env("MURMUR_DISABLE_HTTP"),
        help = "Do not start the HTTP status API"
    )]
    pub disable_http: bool,

    // Relay ports
    #[clap(
        long,
        default_value = settings::DEFAULT_PORT_RELAY_PUBLISH,
        env("MURMUR_RELAY_PUBLISH_PORT"),
        help = "Port producers publish into"
    )]
    pub relay_publish_port: u16,

    #[clap(
        long,
        default_value = settings::DEFAULT_PORT_RELAY_SUBSCRIBE,
        env("MURMUR_RELAY_SUBSCRIBE_PORT"),
        help = "Port consumers subscribe on"
    )]
    pub relay_subscribe_port: u16,

    // Registry snapshot
    #[clap(
        long,
        default_value = settings::DEFAULT_SNAPSHOT_PATH,
        env("MURMUR_SNAPSHOT_PATH"),
        help = "File the server registry is persisted to"
    )]
    pub snapshot_path: PathBuf,

    #[clap(
        long,
        default_value = "30",
        env("MURMUR_ACTIVE_WINDOW_SECONDS"),
        help = "Servers are listed while their last heartbeat is younger than this"
    )]
    pub active_window_seconds: u64,

    #[clap(
        long,
        default_value = "60",
        env("MURMUR_STALE_WINDOW_SECONDS"),
        help = "Servers are evicted once their last heartbeat is older than this"
    )]
    pub stale_window_seconds: u64,

    #[clap(
        long,
        default_value = "15",
        env("MURMUR_EVICTION_INTERVAL_SECONDS"),
        help = "Interval between stale-server eviction passes"
    )]
    pub eviction_interval_seconds: u64,

    #[clap(
        long,
        default_value = "300",
        env("MURMUR_IDLE_TIMEOUT_SECONDS"),
        help = "Close client connections that send nothing for this long"
    )]
    pub idle_timeout_seconds: u64,

    #[clap(
        long,
        default_value = "1024",
        env("MURMUR_RELAY_CAPACITY"),
        help = "Frames buffered per relay direction before slow readers lag"
    )]
    pub relay_capacity: usize,

    #[clap(
        long,
        default_value = "pretty",
        env("MURMUR_LOG_FORMAT"),
        help = "log format: 'pretty' or 'json'"
    )]
    pub log_format: LogFormat,
}

impl Cli {
    pub fn into_settings(self) -> settings::Settings {
        settings::Settings {
            listen_address: self.listen_address,
            run_mode: self.run_mode,
            coordinator_port: self.coordinator_port,
            http_port: (!self.disable_http).then_some(self.http_port),
            relay_publish_port: self.relay_publish_port,
            relay_subscribe_port: self.relay_subscribe_port,
            snapshot_path: self.snapshot_path,
            active_window_secs: self.active_window_seconds,
            stale_window_secs: self.stale_window_seconds,
            eviction_interval_secs: self.eviction_interval_seconds,
            idle_timeout_secs: self.idle_timeout_seconds,
            relay_capacity: self.relay_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["murmur"]);
        let settings = cli.into_settings();
        assert_eq!(settings.run_mode, RunMode::Coordinator);
        assert_eq!(settings.coordinator_port, settings::STANDARD_PORT_COORDINATOR);
        assert_eq!(settings.http_port, Some(settings::STANDARD_PORT_HTTP));
        assert_eq!(settings.active_window_secs, 30);
        assert_eq!(settings.stale_window_secs, 60);
    }

    #[test]
    fn test_broker_mode_without_http() {
        let cli = Cli::parse_from([
            "murmur",
            "--run-mode",
            "broker",
            "--disable-http",
            "--relay-publish-port",
            "6000",
        ]);
        let settings = cli.into_settings();
        assert_eq!(settings.run_mode, RunMode::Broker);
        assert_eq!(settings.http_port, None);
        assert_eq!(settings.relay_publish_port, 6000);
    }
}
