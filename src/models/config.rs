//! Configuration module for the admin server
//!
//! All tunables come from environment variables with defaults taken from
//! `utils::constants`.

use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

use crate::utils::constants::{
    DEFAULT_COMMAND_USER, DEFAULT_DAEMON_URL, DEFAULT_HOST, DEFAULT_LOGIN_LOG_FILE,
    DEFAULT_PORT, LOGIN_ATTEMPTS, LOGIN_BAN_SECONDS,
};

/// Server configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Failed attempts before the session is banned
    pub login_attempts: u32,
    /// Ban length in seconds
    pub login_ban_seconds: u64,
    pub login_log_file: PathBuf,
    /// JSON snapshot of the record store; in-memory only when unset
    pub database_path: Option<PathBuf>,
    /// Directory of custom controller descriptors (`*.json`)
    pub custom_functions_dir: Option<PathBuf>,
    pub daemon_url: String,
    /// User shell-command actions run as
    pub command_user: String,
    /// Skips dependency checks, like a test deployment
    pub testing: bool,
    /// Dependency ids known to be installed
    pub installed_dependencies: HashSet<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            login_attempts: LOGIN_ATTEMPTS,
            login_ban_seconds: LOGIN_BAN_SECONDS,
            login_log_file: PathBuf::from(DEFAULT_LOGIN_LOG_FILE),
            database_path: None,
            custom_functions_dir: None,
            daemon_url: DEFAULT_DAEMON_URL.to_string(),
            command_user: DEFAULT_COMMAND_USER.to_string(),
            testing: false,
            installed_dependencies: HashSet::new(),
        }
    }
}

impl AppConfig {
    /// Build configuration from the environment
    ///
    /// Railway-style `PORT` wins over `VERDANT_PORT`.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or_else(|| env_parse("VERDANT_PORT", defaults.port));

        let installed_dependencies = std::env::var("VERDANT_INSTALLED_DEPS")
            .map(|list| parse_list(&list))
            .unwrap_or_default();

        let config = Self {
            host: std::env::var("VERDANT_HOST").unwrap_or(defaults.host),
            port,
            login_attempts: env_parse("VERDANT_LOGIN_ATTEMPTS", defaults.login_attempts).max(1),
            login_ban_seconds: env_parse("VERDANT_LOGIN_BAN_SECONDS", defaults.login_ban_seconds),
            login_log_file: std::env::var("VERDANT_LOGIN_LOG")
                .map(PathBuf::from)
                .unwrap_or(defaults.login_log_file),
            database_path: std::env::var("VERDANT_DATABASE").ok().map(PathBuf::from),
            custom_functions_dir: std::env::var("VERDANT_CUSTOM_FUNCTIONS")
                .ok()
                .map(PathBuf::from),
            daemon_url: std::env::var("VERDANT_DAEMON_URL").unwrap_or(defaults.daemon_url),
            command_user: std::env::var("VERDANT_COMMAND_USER").unwrap_or(defaults.command_user),
            testing: env_parse("VERDANT_TESTING", false),
            installed_dependencies,
        };

        info!(
            host = %config.host,
            port = config.port,
            daemon = %config.daemon_url,
            persistent = config.database_path.is_some(),
            "Configuration loaded"
        );
        config
    }

    /// Socket address string for the listener
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parse an env var, falling back (with a warning) on bad values
fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, "Invalid configuration value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// Comma separated list into a set, skipping blanks
pub fn parse_list(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.login_attempts, 5);
        assert_eq!(config.login_ban_seconds, 600);
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert!(!config.testing);
    }

    #[test]
    fn test_parse_list() {
        let set = parse_list(" paho-mqtt, ,ffmpeg,");
        assert_eq!(set.len(), 2);
        assert!(set.contains("paho-mqtt"));
        assert!(set.contains("ffmpeg"));
    }
}
