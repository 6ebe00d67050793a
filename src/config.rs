//! Process configuration from the environment

use crate::sync::DEFAULT_SUPPRESSION_WINDOW;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8700;
pub const DEFAULT_REMOTE_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// HTTP API port
    pub port: u16,
    /// Document service base URL
    pub remote_url: String,
    /// Opaque token exchanged for a session credential at startup
    pub token: Option<String>,
    pub suppression_window: Duration,
    /// Request timeout for non-streaming remote calls
    pub http_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            remote_url: DEFAULT_REMOTE_URL.to_string(),
            token: None,
            suppression_window: DEFAULT_SUPPRESSION_WINDOW,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

fn parsed<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

impl BridgeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset, empty or unparseable values keep their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            port: parsed(non_empty("BRIDGE_PORT")).unwrap_or(defaults.port),
            remote_url: non_empty("BRIDGE_REMOTE_URL")
                .map(|url| url.trim().trim_end_matches('/').to_string())
                .unwrap_or(defaults.remote_url),
            token: non_empty("BRIDGE_TOKEN"),
            suppression_window: parsed::<u64>(non_empty("BRIDGE_SUPPRESSION_MS"))
                .map_or(defaults.suppression_window, Duration::from_millis),
            http_timeout: parsed::<u64>(non_empty("BRIDGE_HTTP_TIMEOUT_SECS"))
                .filter(|secs| *secs > 0)
                .map_or(defaults.http_timeout, Duration::from_secs),
        }
    }
}
