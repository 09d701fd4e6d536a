//! Two-phase bulk stop.
//!
//! A [`BulkStopRequest`] without `confirm` is a preview: it reads the
//! affected tasks and stops nothing. With `confirm` set, every listed task
//! gets one stop call, in order, and individual failures are recorded
//! without aborting the batch.
//!
//! Both phases target the same set, computed by [`BulkStopRequest::affected`].

use super::TaskService;
use serde::Serialize;

/// Input for [`TaskService::bulk_stop_tasks`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkStopRequest {
    /// Project owning the tasks.
    pub project_id: i64,
    /// Tasks to stop, in order.
    pub task_ids: Vec<i64>,
    /// Execute the stop instead of previewing it.
    pub confirm: bool,
}

impl BulkStopRequest {
    /// A preview request.
    pub const fn preview(project_id: i64, task_ids: Vec<i64>) -> Self {
        Self { project_id, task_ids, confirm: false }
    }

    /// A confirmed request.
    pub const fn confirmed(project_id: i64, task_ids: Vec<i64>) -> Self {
        Self { project_id, task_ids, confirm: true }
    }

    /// Task ids the operation targets. May be empty.
    pub fn affected(&self) -> &[i64] {
        &self.task_ids
    }
}

/// What a preview knows about one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskPreview {
    /// Task id.
    pub task_id: i64,
    /// Current status, when the task could be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Template, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<i64>,
    /// Why the task could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one stop call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopStatus {
    /// The remote accepted the stop.
    Success,
    /// The remote rejected it or could not be reached.
    Error,
}

/// Result of stopping one task.
#[derive(Debug, Clone, Serialize)]
pub struct StopResult {
    /// Task id.
    pub task_id: i64,
    /// Outcome.
    pub status: StopStatus,
    /// Failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Counts for an executed bulk stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StopSummary {
    /// Stop calls issued.
    pub total_tasks: usize,
    /// Calls that succeeded.
    pub succeeded: usize,
    /// Calls that failed.
    pub failed: usize,
}

/// Result of [`TaskService::bulk_stop_tasks`].
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BulkStopOutcome {
    /// Nothing was stopped.
    Preview {
        /// Always true.
        confirmation_required: bool,
        /// Number of tasks that would be stopped.
        tasks_to_stop: usize,
        /// Their ids.
        task_ids: Vec<i64>,
        /// Current state of each.
        task_details: Vec<TaskPreview>,
        /// How to proceed.
        message: String,
    },
    /// Every listed task got a stop call.
    Executed {
        /// Always true.
        bulk_operation_complete: bool,
        /// Counts.
        summary: StopSummary,
        /// Per-task outcomes, in request order.
        results: Vec<StopResult>,
        /// Human-readable summary.
        message: String,
    },
}

impl TaskService {
    /// Preview or execute a bulk stop.
    ///
    /// Remote failures are reported per task. An empty id list previews or
    /// stops nothing and reports zero counts.
    pub async fn bulk_stop_tasks(&self, request: &BulkStopRequest) -> BulkStopOutcome {
        let affected = request.affected();
        if request.confirm {
            self.execute_stop(request.project_id, affected).await
        } else {
            self.preview_stop(request.project_id, affected).await
        }
    }

    async fn preview_stop(&self, project_id: i64, task_ids: &[i64]) -> BulkStopOutcome {
        let mut task_details = Vec::with_capacity(task_ids.len());
        for &task_id in task_ids {
            let detail = match self.gateway.get_task(project_id, task_id).await {
                Ok(task) => TaskPreview {
                    task_id,
                    status: Some(task.status.to_string()),
                    template_id: task.template_id,
                    error: None,
                },
                Err(err) => TaskPreview {
                    task_id,
                    status: None,
                    template_id: None,
                    error: Some(err.to_string()),
                },
            };
            task_details.push(detail);
        }

        let count = task_ids.len();
        BulkStopOutcome::Preview {
            confirmation_required: true,
            tasks_to_stop: count,
            task_ids: task_ids.to_vec(),
            task_details,
            message: format!(
                "{count} tasks will be stopped. \
                 Call bulk_stop_tasks again with confirm=true to proceed."
            ),
        }
    }

    async fn execute_stop(&self, project_id: i64, task_ids: &[i64]) -> BulkStopOutcome {
        let mut results = Vec::with_capacity(task_ids.len());
        let mut succeeded = 0;
        let mut failed = 0;

        for &task_id in task_ids {
            match self.gateway.stop_task(project_id, task_id).await {
                Ok(_) => {
                    succeeded += 1;
                    results.push(StopResult { task_id, status: StopStatus::Success, error: None });
                }
                Err(err) => {
                    failed += 1;
                    tracing::warn!(project_id, task_id, error = %err, "bulk stop failed for task");
                    results.push(StopResult {
                        task_id,
                        status: StopStatus::Error,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        let total_tasks = task_ids.len();
        tracing::info!(project_id, total_tasks, succeeded, failed, "bulk stop complete");
        let message = if failed == 0 {
            format!("Stopped {succeeded} of {total_tasks} tasks")
        } else {
            format!("Stopped {succeeded} of {total_tasks} tasks ({failed} failed)")
        };

        BulkStopOutcome::Executed {
            bulk_operation_complete: true,
            summary: StopSummary { total_tasks, succeeded, failed },
            results,
            message,
        }
    }
}
