//! Locations of files the server keeps under the user's home directory.
//!
//! Everything lives in `~/.semaphore-mcp/`: the log file and an optional
//! config file picked up when no `--config` flag is given.

use std::path::PathBuf;

/// The base directory name for semaphore-mcp data.
const DATA_DIR_NAME: &str = ".semaphore-mcp";

/// Log file name inside the data directory.
pub const LOG_FILENAME: &str = "mcp.log";

/// Config file name inside the data directory.
pub const CONFIG_FILENAME: &str = "config.yaml";

/// Get the base data directory.
///
/// Returns `~/.semaphore-mcp/` or `None` if the home directory
/// cannot be determined.
#[must_use]
pub fn data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(DATA_DIR_NAME))
}

/// `~/.semaphore-mcp/mcp.log`.
#[must_use]
pub fn default_log_path() -> Option<PathBuf> {
    data_dir().map(|dir| dir.join(LOG_FILENAME))
}

/// `~/.semaphore-mcp/config.yaml`, only if it exists.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    data_dir().map(|dir| dir.join(CONFIG_FILENAME)).filter(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_dir_returns_home_based_path() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(data_dir().unwrap(), home.join(".semaphore-mcp"));
        }
    }

    #[test]
    fn test_default_log_path_is_inside_data_dir() {
        if let (Some(dir), Some(log)) = (data_dir(), default_log_path()) {
            assert_eq!(log.parent(), Some(dir.as_path()));
            assert!(log.ends_with(LOG_FILENAME));
        }
    }

    #[test]
    fn test_default_config_path_only_when_present() {
        if let Some(path) = default_config_path() {
            assert!(path.is_file());
        }
    }
}
