use clap::Parser;
use std::time::Duration;

pub const DEFAULT_RELAY_URL: &str = "ws://localhost:5273/ws/";
pub const DEFAULT_PARENT_PROCESS: &str = "reachfms";
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

#[derive(Parser, Debug, Clone)]
#[command(name = "sim_connector", about = "Relays simulator variables to the cockpit backend")]
pub struct ConnectorArgs {
    #[arg(long, env = "SIM_RELAY_URL", default_value = DEFAULT_RELAY_URL)]
    pub relay_url: String,

    /// Exit once no process with this name is running.
    #[arg(long, env = "SIM_PARENT_PROCESS", default_value = DEFAULT_PARENT_PROCESS)]
    pub parent_process: String,

    #[arg(long, default_value_t = false)]
    pub no_parent_watch: bool,

    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,

    /// Runtime client name suffix; defaults to the host name.
    #[arg(long, env = "SIM_CLIENT_NAME")]
    pub client_name: Option<String>,

    /// Stop after this many milliseconds (smoke runs).
    #[arg(long)]
    pub run_for_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub relay_url: String,
    pub parent_process: Option<String>,
    pub poll_interval: Duration,
    pub client_name: String,
    pub run_for: Option<Duration>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            parent_process: Some(DEFAULT_PARENT_PROCESS.to_string()),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            client_name: host_identity(),
            run_for: None,
        }
    }
}

impl ConnectorArgs {
    pub fn into_config(self) -> ConnectorConfig {
        let parent_process = if self.no_parent_watch || self.parent_process.trim().is_empty() {
            None
        } else {
            Some(self.parent_process.trim().to_string())
        };
        ConnectorConfig {
            relay_url: self.relay_url,
            parent_process,
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            client_name: self.client_name.unwrap_or_else(host_identity),
            run_for: self.run_for_ms.map(Duration::from_millis),
        }
    }
}

pub fn is_websocket_url(url: &str) -> bool {
    url.starts_with("ws://") || url.starts_with("wss://")
}

pub fn host_identity() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_backend() {
        let args = ConnectorArgs::parse_from(["sim_connector", "--client-name", "PIT"]);
        let config = args.into_config();
        assert_eq!(config.relay_url, DEFAULT_RELAY_URL);
        assert_eq!(config.parent_process.as_deref(), Some("reachfms"));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.client_name, "PIT");
        assert_eq!(config.run_for, None);
    }

    #[test]
    fn relay_url_must_be_websocket() {
        assert!(is_websocket_url(DEFAULT_RELAY_URL));
        assert!(is_websocket_url("wss://backend.local/ws/"));
        assert!(!is_websocket_url("http://localhost:5273/ws/"));
        assert!(!is_websocket_url("localhost:5273"));
    }

    #[test]
    fn parent_watch_can_be_disabled() {
        let args = ConnectorArgs::parse_from([
            "sim_connector",
            "--no-parent-watch",
            "--poll-interval-ms",
            "0",
            "--run-for-ms",
            "250",
        ]);
        let config = args.into_config();
        assert_eq!(config.parent_process, None);
        assert_eq!(config.poll_interval, Duration::from_millis(1));
        assert_eq!(config.run_for, Some(Duration::from_millis(250)));
    }
}
