//! Server configuration.
//!
//! Settings come from an optional YAML file, then environment variables,
//! then command-line flags, each layer overriding the previous one.
//!
//! ```yaml
//! semaphore_url: https://semaphore.example.com
//! api_token: "..."
//! request_timeout_secs: 30
//! log_level: debug
//! monitor:
//!   budget_secs: 60
//!   poll_interval_secs: 5
//! ```

use crate::error::{Error, Result};
use crate::paths;
use crate::tasks::MonitorSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the server URL.
pub const ENV_URL: &str = "SEMAPHORE_URL";

/// Environment variable holding the API token.
pub const ENV_TOKEN: &str = "SEMAPHORE_API_TOKEN";

/// Environment variable holding the log level.
pub const ENV_LOG_LEVEL: &str = "MCP_LOG_LEVEL";

/// Startup monitoring budgets, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MonitorConfig {
    /// Total time spent monitoring a launched task.
    pub budget_secs: u64,
    /// Pause between polls.
    pub poll_interval_secs: u64,
    /// Failed polls in a row before giving up.
    pub max_consecutive_errors: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { budget_secs: 30, poll_interval_secs: 3, max_consecutive_errors: 3 }
    }
}

impl From<&MonitorConfig> for MonitorSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            budget: Duration::from_secs(config.budget_secs),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            max_consecutive_errors: config.max_consecutive_errors,
        }
    }
}

/// Everything the server needs to start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the SemaphoreUI server, with or without `/api`.
    pub semaphore_url: String,
    /// API token sent as a bearer token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    /// Per-request timeout.
    pub request_timeout_secs: u64,
    /// Log filter directive, e.g. `info` or `semaphore_mcp=debug`.
    pub log_level: String,
    /// Log file; defaults to `~/.semaphore-mcp/mcp.log`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    /// Startup monitoring budgets.
    pub monitor: MonitorConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            semaphore_url: "http://localhost:3000".to_string(),
            api_token: None,
            request_timeout_secs: 30,
            log_level: "info".to_string(),
            log_file: None,
            monitor: MonitorConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load a YAML config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Load a config file if one is given, otherwise start from defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the given file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::load_from)
    }

    /// Override fields from environment variables read through `lookup`.
    ///
    /// Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if let Some(url) = read(ENV_URL) {
            self.semaphore_url = url;
        }
        if let Some(token) = read(ENV_TOKEN) {
            self.api_token = Some(token);
        }
        if let Some(level) = read(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
    }

    /// Override fields from the process environment.
    pub fn apply_process_env(&mut self) {
        self.apply_env(|name| std::env::var(name).ok());
    }

    /// Check the config is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a missing token, a non-HTTP URL, or a
    /// zero poll interval.
    pub fn validate(&self) -> Result<()> {
        if self.api_token.as_deref().map_or(true, |token| token.trim().is_empty()) {
            return Err(Error::Config(format!(
                "an API token is required; set {ENV_TOKEN} or pass --token"
            )));
        }
        let url = self.semaphore_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "semaphore_url must start with http:// or https://, got '{url}'"
            )));
        }
        if self.monitor.poll_interval_secs == 0 {
            return Err(Error::Config(
                "monitor.poll_interval_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Request timeout as a duration.
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Monitoring budgets for the task service.
    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings::from(&self.monitor)
    }

    /// The log file to write, falling back to the default location.
    pub fn log_path(&self) -> Option<PathBuf> {
        self.log_file.clone().or_else(paths::default_log_path)
    }

    /// The token, or an empty string when unset.
    pub fn token(&self) -> &str {
        self.api_token.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |name| map.get(name).cloned()
    }

    fn valid() -> ServerConfig {
        ServerConfig { api_token: Some("token".to_string()), ..ServerConfig::default() }
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.semaphore_url, "http://localhost:3000");
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.monitor_settings(), MonitorSettings::default());
    }

    #[test]
    fn test_load_partial_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "semaphore_url: https://ci.example.com\nmonitor:\n  budget_secs: 60\n",
        )
        .unwrap();

        let config = ServerConfig::load_from(&path).unwrap();

        assert_eq!(config.semaphore_url, "https://ci.example.com");
        assert_eq!(config.monitor.budget_secs, 60);
        assert_eq!(config.monitor.poll_interval_secs, 3);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_load_empty_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "\n").unwrap();
        assert_eq!(ServerConfig::load_from(&path).unwrap(), ServerConfig::default());
    }

    #[test]
    fn test_load_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = ServerConfig::load(Some(&dir.path().join("missing.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_load_invalid_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "monitor: [not, a, map]").unwrap();
        assert!(matches!(ServerConfig::load_from(&path), Err(Error::Yaml(_))));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = ServerConfig { semaphore_url: "http://file".to_string(), ..valid() };

        config.apply_env(env(&[
            (ENV_URL, "https://env.example.com"),
            (ENV_TOKEN, "env-token"),
            (ENV_LOG_LEVEL, ""),
        ]));

        assert_eq!(config.semaphore_url, "https://env.example.com");
        assert_eq!(config.token(), "env-token");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());

        let missing_token = ServerConfig::default();
        assert!(missing_token.validate().unwrap_err().to_string().contains(ENV_TOKEN));

        let bad_url = ServerConfig { semaphore_url: "ftp://host".to_string(), ..valid() };
        assert!(matches!(bad_url.validate(), Err(Error::Config(_))));

        let mut zero_interval = valid();
        zero_interval.monitor.poll_interval_secs = 0;
        assert!(zero_interval.validate().unwrap_err().to_string().contains("poll_interval_secs"));
    }

    #[test]
    fn test_explicit_log_file_wins() {
        let config = ServerConfig { log_file: Some(PathBuf::from("/tmp/x.log")), ..valid() };
        assert_eq!(config.log_path(), Some(PathBuf::from("/tmp/x.log")));
    }
}
