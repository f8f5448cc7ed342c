//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so the client starts with no configuration.

use std::path::PathBuf;
use std::time::Duration;

use circle_net::ControllerConfig;
use circle_shared::constants::{DEFAULT_ATTACH_TIMEOUT_SECS, DEFAULT_DISCOVERY_TIMEOUT_SECS};

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// SQLite database file.
    /// Env: `CIRCLE_DB_PATH`
    /// Default: the platform data directory.
    pub db_path: Option<PathBuf>,

    /// Connect to every newly discovered peer.
    /// Env: `CIRCLE_AUTO_CONNECT` (true/false)
    /// Default: `false`
    pub auto_connect: bool,

    /// Use precise ranging when the device supports it.
    /// Env: `CIRCLE_PRECISE_RANGING` (true/false)
    /// Default: `true`
    pub precise_ranging: bool,

    /// Env: `CIRCLE_ATTACH_TIMEOUT_SECS`
    pub attach_timeout: Duration,

    /// Deadline for publish/subscribe to start.
    /// Env: `CIRCLE_DISCOVERY_TIMEOUT_SECS`
    pub discovery_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            auto_connect: false,
            precise_ranging: true,
            attach_timeout: Duration::from_secs(DEFAULT_ATTACH_TIMEOUT_SECS),
            discovery_timeout: Duration::from_secs(DEFAULT_DISCOVERY_TIMEOUT_SECS),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("CIRCLE_DB_PATH") {
            if !path.trim().is_empty() {
                config.db_path = Some(PathBuf::from(path));
            }
        }

        if let Some(val) = lookup("CIRCLE_AUTO_CONNECT") {
            config.auto_connect = parse_flag("CIRCLE_AUTO_CONNECT", &val, config.auto_connect);
        }

        if let Some(val) = lookup("CIRCLE_PRECISE_RANGING") {
            config.precise_ranging =
                parse_flag("CIRCLE_PRECISE_RANGING", &val, config.precise_ranging);
        }

        if let Some(val) = lookup("CIRCLE_ATTACH_TIMEOUT_SECS") {
            if let Some(timeout) = parse_secs("CIRCLE_ATTACH_TIMEOUT_SECS", &val) {
                config.attach_timeout = timeout;
            }
        }

        if let Some(val) = lookup("CIRCLE_DISCOVERY_TIMEOUT_SECS") {
            if let Some(timeout) = parse_secs("CIRCLE_DISCOVERY_TIMEOUT_SECS", &val) {
                config.discovery_timeout = timeout;
            }
        }

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            attach_timeout: self.attach_timeout,
            discovery_timeout: self.discovery_timeout,
            auto_connect: self.auto_connect,
            precise_ranging: self.precise_ranging,
            ..ControllerConfig::default()
        }
    }
}

fn parse_flag(key: &str, value: &str, default: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => true,
        "false" | "0" | "no" => false,
        _ => {
            tracing::warn!(key, value = %value, "Invalid boolean, using default");
            default
        }
    }
}

/// Longest timeout accepted from the environment.
const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

fn parse_secs(key: &str, value: &str) -> Option<Duration> {
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 && secs <= MAX_TIMEOUT_SECS => Some(Duration::from_secs(secs)),
        Ok(secs) if secs > MAX_TIMEOUT_SECS => {
            tracing::warn!(key, secs, max = MAX_TIMEOUT_SECS, "Timeout too long, using default");
            None
        }
        _ => {
            tracing::warn!(key, value = %value, "Invalid timeout, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> ClientConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClientConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = config_from(&[]);
        assert_eq!(config, ClientConfig::default());
        assert!(config.db_path.is_none());
        assert!(!config.auto_connect);
        assert!(config.precise_ranging);
        assert_eq!(config.attach_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_reads_every_variable() {
        let config = config_from(&[
            ("CIRCLE_DB_PATH", "/tmp/circle.db"),
            ("CIRCLE_AUTO_CONNECT", "true"),
            ("CIRCLE_PRECISE_RANGING", "0"),
            ("CIRCLE_ATTACH_TIMEOUT_SECS", "3"),
            ("CIRCLE_DISCOVERY_TIMEOUT_SECS", "7"),
        ]);
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/circle.db")));
        assert!(config.auto_connect);
        assert!(!config.precise_ranging);
        assert_eq!(config.attach_timeout, Duration::from_secs(3));
        assert_eq!(config.discovery_timeout, Duration::from_secs(7));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = config_from(&[
            ("CIRCLE_DB_PATH", "  "),
            ("CIRCLE_AUTO_CONNECT", "maybe"),
            ("CIRCLE_ATTACH_TIMEOUT_SECS", "soon"),
            ("CIRCLE_DISCOVERY_TIMEOUT_SECS", "0"),
        ]);
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_oversized_timeouts_keep_defaults() {
        let max = MAX_TIMEOUT_SECS.to_string();
        let huge = u64::MAX.to_string();
        let config = config_from(&[
            ("CIRCLE_ATTACH_TIMEOUT_SECS", max.as_str()),
            ("CIRCLE_DISCOVERY_TIMEOUT_SECS", huge.as_str()),
        ]);
        assert_eq!(config.attach_timeout, Duration::from_secs(MAX_TIMEOUT_SECS));
        assert_eq!(config.discovery_timeout, ClientConfig::default().discovery_timeout);
    }

    #[test]
    fn test_controller_config_carries_settings() {
        let config = config_from(&[("CIRCLE_AUTO_CONNECT", "yes")]);
        let controller = config.controller_config();
        assert!(controller.auto_connect);
        assert_eq!(controller.service_name, circle_shared::constants::SERVICE_NAME);
        assert_eq!(controller.attach_timeout, config.attach_timeout);
    }
}
