//! Error types for `semaphore_mcp`.

use crate::gateway::GatewayError;

/// Errors surfaced by the tool layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A remote call failed while performing the named action.
    #[error("Error during {action}: {source}")]
    Gateway {
        /// What was being attempted, e.g. "listing tasks".
        action: String,
        /// The underlying gateway failure.
        #[source]
        source: GatewayError,
    },

    /// A caller-supplied argument was rejected before any remote call.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No project owns the given template.
    #[error("Could not determine project_id for template {0}. Please provide it explicitly.")]
    ProjectNotResolved(i64),

    /// The server configuration is unusable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON serialization error occurred.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A YAML parsing error occurred.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Whether this error was caused by the caller's input rather than the remote side.
    pub const fn is_caller_error(&self) -> bool {
        matches!(self, Self::InvalidArgument(_) | Self::ProjectNotResolved(_))
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Tags a gateway failure with the action that was being attempted.
pub trait ResultExt<T> {
    /// Convert a gateway error into [`Error::Gateway`] labelled by `action`.
    ///
    /// # Errors
    ///
    /// Returns the wrapped error if `self` is an error.
    fn during(self, action: impl FnOnce() -> String) -> Result<T>;
}

impl<T> ResultExt<T> for std::result::Result<T, GatewayError> {
    fn during(self, action: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|source| Error::Gateway { action: action(), source })
    }
}
