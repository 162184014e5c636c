//! Client configuration with environment overrides.

use std::env;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_WDA_URL: &str = "http://localhost:8100";
pub const DEFAULT_WDA_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_COMPANION_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(8);

/// Where the automation server and the companion app live, and how long to wait on them.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub wda_url: String,
    pub wda_timeout: Duration,
    /// Explicit companion address. When unset the companion is found by multicast discovery.
    pub companion_url: Option<String>,
    pub companion_timeout: Duration,
    pub discovery_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            wda_url: DEFAULT_WDA_URL.to_string(),
            wda_timeout: DEFAULT_WDA_TIMEOUT,
            companion_url: None,
            companion_timeout: DEFAULT_COMPANION_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Defaults overlaid with `WDA_URL`, `WDA_TIMEOUT_SECS`, `COMPANION_URL`,
    /// `COMPANION_TIMEOUT_SECS` and `COMPANION_DISCOVERY_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            wda_url: lookup("WDA_URL")
                .filter(|v| !v.trim().is_empty())
                .map(|v| normalize_url(&v))
                .unwrap_or(defaults.wda_url),
            wda_timeout: secs_or(&lookup, "WDA_TIMEOUT_SECS", defaults.wda_timeout),
            companion_url: lookup("COMPANION_URL")
                .filter(|v| !v.trim().is_empty())
                .map(|v| normalize_url(&v)),
            companion_timeout: secs_or(
                &lookup,
                "COMPANION_TIMEOUT_SECS",
                defaults.companion_timeout,
            ),
            discovery_timeout: secs_or(
                &lookup,
                "COMPANION_DISCOVERY_TIMEOUT_SECS",
                defaults.discovery_timeout,
            ),
        }
    }

    pub fn with_wda_url(mut self, url: impl AsRef<str>) -> Self {
        self.wda_url = normalize_url(url.as_ref());
        self
    }

    pub fn with_wda_timeout(mut self, timeout: Duration) -> Self {
        self.wda_timeout = timeout;
        self
    }

    pub fn with_companion_url(mut self, url: impl AsRef<str>) -> Self {
        self.companion_url = Some(normalize_url(url.as_ref()));
        self
    }

    pub fn with_companion_timeout(mut self, timeout: Duration) -> Self {
        self.companion_timeout = timeout;
        self
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }
}

pub(crate) fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn secs_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<f64>() {
            Ok(secs) if secs.is_finite() && secs > 0.0 => Duration::from_secs_f64(secs),
            _ => {
                warn!(key, value = %raw, "ignoring unparsable timeout, using default");
                default
            }
        },
    }
}
