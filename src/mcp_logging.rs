//! File logging for the MCP server.
//!
//! stdout carries the MCP protocol, so logs go to a file instead
//! (`~/.semaphore-mcp/mcp.log` by default). The file is rotated to
//! `mcp.log.old` at startup once it grows past [`MAX_LOG_SIZE`].

use crate::error::{Error, Result};
use std::fs::{self, File, OpenOptions};
use std::panic;
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Maximum log file size before rotation (1MB).
pub const MAX_LOG_SIZE: u64 = 1_048_576;

/// Move the log aside if it is larger than [`MAX_LOG_SIZE`].
///
/// Returns whether a rotation happened.
pub fn rotate_if_needed(path: &Path) -> bool {
    let too_big = fs::metadata(path).map(|m| m.len() > MAX_LOG_SIZE).unwrap_or(false);
    too_big && fs::rename(path, path.with_extension("log.old")).is_ok()
}

/// Create the parent directory, rotate, and open the log for appending.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be created.
pub fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    rotate_if_needed(path);
    OpenOptions::new().create(true).append(true).open(path)
}

/// A plain-text subscriber writing to `file`, filtered by `level`.
///
/// # Errors
///
/// Returns [`Error::Config`] if `level` is not a valid filter directive.
pub fn file_subscriber(
    file: File,
    level: &str,
) -> Result<impl tracing::Subscriber + Send + Sync + 'static> {
    let filter = EnvFilter::try_new(level)
        .map_err(|e| Error::Config(format!("invalid log level '{level}': {e}")))?;
    Ok(tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .finish())
}

/// Initialize file logging for the process.
///
/// # Errors
///
/// Returns an error if the log file cannot be opened, the level is invalid,
/// or a global subscriber is already installed.
pub fn init(path: &Path, level: &str) -> Result<()> {
    let file = open_log_file(path)?;
    let subscriber = file_subscriber(file, level)?;
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::Config(format!("logging already initialized: {e}")))?;
    tracing::info!(path = %path.display(), version = crate::VERSION, "MCP server starting");
    Ok(())
}

/// Text of a panic payload.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

/// Format a panic location for logging.
fn format_panic_location(location: Option<&panic::Location<'_>>) -> String {
    location.map_or_else(
        || "unknown".to_string(),
        |loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()),
    )
}

/// Install a panic hook that logs panics before running the previous hook.
///
/// This should be called after `init()`.
pub fn install_panic_hook() {
    let original_hook = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        let location = format_panic_location(info.location());
        let message = panic_message(info.payload());
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(%location, %backtrace, "PANIC: {message}");
        original_hook(info);
    }));

    tracing::debug!("panic hook installed");
}

/// Log MCP server shutdown.
pub fn log_shutdown(exit_code: Option<i32>) {
    match exit_code {
        Some(code) => tracing::warn!(code, "SHUTDOWN: exit code {code}"),
        None => tracing::info!("SHUTDOWN: normal"),
    }
}

/// Logs the start of a tool call, and its duration and outcome when dropped.
///
/// ```ignore
/// let mut guard = ToolCallGuard::new("run_task");
/// if result.is_err() {
///     guard.mark_error();
/// }
/// ```
pub struct ToolCallGuard {
    tool_name: &'static str,
    start: Instant,
    success: bool,
}

impl ToolCallGuard {
    /// Create a new tool call guard and log the start.
    #[must_use]
    pub fn new(tool_name: &'static str) -> Self {
        tracing::info!(tool = tool_name, "TOOL_START");
        Self { tool_name, start: Instant::now(), success: true }
    }

    /// Mark the tool call as failed.
    pub fn mark_error(&mut self) {
        self.success = false;
    }
}

impl Drop for ToolCallGuard {
    fn drop(&mut self) {
        let duration_ms = u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX);
        if self.success {
            tracing::info!(tool = self.tool_name, duration_ms, "TOOL_END [OK]");
        } else {
            tracing::warn!(tool = self.tool_name, duration_ms, "TOOL_END [ERROR]");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn capture<F: FnOnce()>(level: &str, f: F) -> String {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("mcp.log");
        let file = open_log_file(&path).unwrap();
        let subscriber = file_subscriber(file, level).unwrap();
        tracing::subscriber::with_default(subscriber, f);
        fs::read_to_string(&path).unwrap()
    }

    #[test]
    fn test_open_log_file_creates_parent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("mcp.log");
        open_log_file(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_log_rotation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mcp.log");
        let size = usize::try_from(MAX_LOG_SIZE + 1).unwrap();
        fs::write(&path, "x".repeat(size)).unwrap();

        open_log_file(&path).unwrap();

        assert!(path.with_extension("log.old").exists());
        assert!(fs::metadata(&path).unwrap().len() < MAX_LOG_SIZE);
    }

    #[test]
    fn test_small_log_not_rotated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mcp.log");
        fs::write(&path, "existing\n").unwrap();

        assert!(!rotate_if_needed(&path));
        assert!(!path.with_extension("log.old").exists());
    }

    #[test]
    fn test_invalid_level_rejected() {
        let dir = TempDir::new().unwrap();
        let file = File::create(dir.path().join("mcp.log")).unwrap();
        assert!(matches!(file_subscriber(file, "semaphore_mcp=loud"), Err(Error::Config(_))));
    }

    #[test]
    fn test_tool_call_guard_logs_start_and_end() {
        let content = capture("info", || {
            let _guard = ToolCallGuard::new("list_tasks");
        });
        assert!(content.contains("TOOL_START"));
        assert!(content.contains("TOOL_END [OK]"));
        assert!(content.contains("tool=\"list_tasks\""));
        assert!(content.contains("duration_ms="));
    }

    #[test]
    fn test_tool_call_guard_logs_error() {
        let content = capture("info", || {
            let mut guard = ToolCallGuard::new("run_task");
            guard.mark_error();
        });
        assert!(content.contains("TOOL_END [ERROR]"));
        assert!(content.contains("WARN"));
    }

    #[test]
    fn test_level_filters_output() {
        let content = capture("warn", || {
            let _guard = ToolCallGuard::new("get_task");
        });
        assert!(content.is_empty());
    }

    #[test]
    fn test_log_shutdown() {
        let content = capture("info", || {
            log_shutdown(None);
            log_shutdown(Some(42));
        });
        assert!(content.contains("SHUTDOWN: normal"));
        assert!(content.contains("SHUTDOWN: exit code 42"));
    }

    #[test]
    fn test_panic_hook_logs_panics() {
        let content = capture("info", || {
            install_panic_hook();
            let _ = std::panic::catch_unwind(|| {
                panic!("test panic message");
            });
        });
        assert!(content.contains("PANIC: test panic message"));
        assert!(content.contains("location="));
    }

    #[test]
    fn test_format_panic_location_none() {
        assert_eq!(format_panic_location(None), "unknown");
    }

    #[test]
    fn test_panic_message_variants() {
        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");
        let other: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(other.as_ref()), "unknown panic payload");
    }
}
