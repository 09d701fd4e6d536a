//! # `semaphore_mcp`
//!
//! An MCP server that lets agents drive a SemaphoreUI instance: launch and
//! follow tasks, query task history, diagnose failures, stop tasks in bulk,
//! and manage project resources.
//!
//! The [`gateway`] module talks to the REST API, [`tasks`] and [`resources`]
//! hold the operations, and [`mcp`] exposes them as tools.

pub mod config;
pub mod error;
pub mod gateway;
pub mod mcp;
pub mod mcp_logging;
pub mod paths;
pub mod resources;
pub mod tasks;
pub mod testing;

pub use error::{Error, Result};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_exists() {
        assert!(!VERSION.is_empty());
    }
}
