//! Task execution, monitoring, querying, failure analysis and bulk control.
//!
//! Every operation lives on [`TaskService`], which wraps a shared
//! [`Gateway`]. The service keeps no state of its own between calls: each
//! operation re-reads whatever it needs from the remote.
//!
//! # Example
//!
//! ```no_run
//! use semaphore_mcp::gateway::SemaphoreClient;
//! use semaphore_mcp::tasks::{RunTaskRequest, TaskService};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn demo() -> semaphore_mcp::error::Result<()> {
//! let client = SemaphoreClient::new("http://localhost:3000", "token", Duration::from_secs(30))
//!     .expect("client");
//! let service = TaskService::new(Arc::new(client), "http://localhost:3000");
//!
//! let mut request = RunTaskRequest::new(7);
//! request.follow = true;
//! let outcome = service.run_task(request).await?;
//! println!("{}", serde_json::to_string_pretty(&outcome)?);
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod bulk;
pub mod launch;
pub mod models;
pub mod monitor;
pub mod query;

pub use analysis::{BulkAnalysisOutcome, FailureAnalysisOutcome, ERROR_CATEGORY_RULES};
pub use bulk::{BulkStopOutcome, BulkStopRequest};
pub use launch::{RunTaskOutcome, RunTaskRequest, WebUrls};
pub use models::{InvalidStatus, Project, Task, TaskStatus, Template};
pub use monitor::{MonitorSettings, MonitoringResult, StatusUpdate, StopReason};
pub use query::{FilterRequest, FilterResult, LatestFailedTask, TaskListing, WaitingTasks};

use crate::error::{Result, ResultExt};
use crate::gateway::Gateway;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Task operations over a shared gateway.
#[derive(Clone)]
pub struct TaskService {
    gateway: Arc<dyn Gateway>,
    /// Web UI root used for deep links (base URL without `/api`).
    web_root: String,
    monitor: MonitorSettings,
    /// Cancelled when the server shuts down; monitors run on child tokens.
    shutdown: CancellationToken,
}

impl TaskService {
    /// Create a service for the server at `base_url`.
    pub fn new(gateway: Arc<dyn Gateway>, base_url: &str) -> Self {
        Self {
            gateway,
            web_root: web_root(base_url),
            monitor: MonitorSettings::default(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Use different startup monitoring budgets.
    #[must_use]
    pub const fn with_monitor_settings(mut self, monitor: MonitorSettings) -> Self {
        self.monitor = monitor;
        self
    }

    /// Tie monitoring to an externally owned shutdown token.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// The underlying gateway.
    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    /// The web UI root used for links.
    pub fn web_root(&self) -> &str {
        &self.web_root
    }

    /// The active monitoring settings.
    pub const fn monitor_settings(&self) -> MonitorSettings {
        self.monitor
    }

    /// Fetch one task.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote call fails.
    pub async fn get_task(&self, project_id: i64, task_id: i64) -> Result<Task> {
        self.gateway.get_task(project_id, task_id).await.during(|| "getting task".to_string())
    }

    /// Ask the remote to stop one task.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote call fails.
    pub async fn stop_task(&self, project_id: i64, task_id: i64) -> Result<Value> {
        let response = self
            .gateway
            .stop_task(project_id, task_id)
            .await
            .during(|| format!("stopping task {task_id}"))?;
        tracing::info!(project_id, task_id, "stop requested");
        if response.is_null() {
            Ok(json!({
                "message": format!("Stop requested for task {task_id}"),
                "project_id": project_id,
                "task_id": task_id,
            }))
        } else {
            Ok(response)
        }
    }

    /// Fetch the plain-text log of a task.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote call fails.
    pub async fn get_task_raw_output(&self, project_id: i64, task_id: i64) -> Result<String> {
        self.gateway
            .get_task_raw_output(project_id, task_id)
            .await
            .during(|| "getting raw output for task".to_string())
    }

    /// Fetch the structured output lines of a task.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote call fails.
    pub async fn get_task_output(&self, project_id: i64, task_id: i64) -> Result<Value> {
        self.gateway
            .get_task_output(project_id, task_id)
            .await
            .during(|| "getting output for task".to_string())
    }
}

/// Strip a trailing `/api` (and slashes) from a base URL.
pub fn web_root(base_url: &str) -> String {
    let trimmed = base_url.trim().trim_end_matches('/');
    trimmed.strip_suffix("/api").unwrap_or(trimmed).to_string()
}
