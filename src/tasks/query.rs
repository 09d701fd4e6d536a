//! Listing and filtering task history into bounded responses.

use super::models::{sort_newest_first, Task, TaskStatus};
use super::TaskService;
use crate::error::{Error, Result, ResultExt};
use serde::Serialize;
use std::collections::BTreeMap;

/// Default number of tasks returned by `list_tasks`.
pub const DEFAULT_LIST_LIMIT: usize = 5;

/// Default number of tasks returned by `filter_tasks`.
pub const DEFAULT_FILTER_LIMIT: usize = 50;

/// Cap used when collecting waiting tasks.
pub const WAITING_TASKS_LIMIT: usize = 100;

/// Message returned when a project has no failed tasks.
pub const NO_FAILED_TASKS: &str = "No failed tasks found for this project";

/// Message returned when a project has no waiting tasks.
pub const NO_WAITING_TASKS: &str = "No tasks in waiting state found";

/// Newest-first page of a project's tasks.
#[derive(Debug, Clone, Serialize)]
pub struct TaskListing {
    /// The page, newest first.
    pub tasks: Vec<Task>,
    /// Tasks the project has in total.
    pub total: usize,
    /// Tasks in this page.
    pub shown: usize,
    /// Human-readable summary.
    pub note: String,
}

/// Parameters for [`TaskService::filter_tasks`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRequest {
    /// Statuses or aliases to keep; empty keeps everything.
    pub statuses: Vec<String>,
    /// Maximum tasks returned.
    pub limit: usize,
    /// Try the cheaper "last tasks" endpoint first.
    pub use_last_tasks: bool,
}

impl Default for FilterRequest {
    fn default() -> Self {
        Self { statuses: Vec::new(), limit: DEFAULT_FILTER_LIMIT, use_last_tasks: true }
    }
}

impl FilterRequest {
    /// Filter on the given statuses with default limit and source.
    #[must_use]
    pub fn statuses<S: AsRef<str>>(statuses: &[S]) -> Self {
        Self {
            statuses: statuses.iter().map(|s| s.as_ref().to_string()).collect(),
            ..Self::default()
        }
    }

    /// Set the limit.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Choose the data source.
    #[must_use]
    pub const fn with_last_tasks(mut self, use_last_tasks: bool) -> Self {
        self.use_last_tasks = use_last_tasks;
        self
    }
}

/// Which endpoint a filter read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSource {
    /// The "last tasks" endpoint.
    LastTasks,
    /// The full task list.
    AllTasks,
}

/// Counts describing a filter run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterStatistics {
    /// Tasks retrieved from the remote.
    pub total_tasks: usize,
    /// Tasks returned (after the limit).
    pub filtered_tasks: usize,
    /// Tasks matching the filter before the limit.
    pub matching_tasks: usize,
    /// Status counts over every retrieved task.
    pub status_breakdown: BTreeMap<String, usize>,
    /// Endpoint the tasks came from.
    pub source: TaskSource,
}

/// Filtered, bounded task list.
#[derive(Debug, Clone, Serialize)]
pub struct FilterResult {
    /// Matching tasks, newest first, at most `limit`.
    pub tasks: Vec<Task>,
    /// Counts.
    pub statistics: FilterStatistics,
    /// Resolved statuses that were applied.
    pub applied_filters: Vec<String>,
    /// Human-readable summary.
    pub note: String,
}

/// Newest failed task, or a message when there is none.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum LatestFailedTask {
    /// The newest task in `error`.
    Found {
        /// The task.
        task: Task,
    },
    /// The project has no failed tasks.
    NotFound {
        /// Explanation.
        message: String,
    },
}

/// Suggested bulk stop calls for a set of tasks. Nothing is executed.
#[derive(Debug, Clone, Serialize)]
pub struct BulkGuidance {
    /// Whether there is anything to stop.
    pub available: bool,
    /// Ids a bulk stop would target.
    pub task_ids: Vec<i64>,
    /// Call that previews the stop.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    /// Call that performs the stop.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execute: Option<String>,
    /// Usage note.
    pub note: String,
}

impl BulkGuidance {
    fn for_tasks(project_id: i64, task_ids: Vec<i64>) -> Self {
        if task_ids.is_empty() {
            return Self {
                available: false,
                task_ids,
                preview: None,
                execute: None,
                note: "Nothing to stop.".to_string(),
            };
        }
        let ids = task_ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
        Self {
            available: true,
            preview: Some(format!("bulk_stop_tasks(project_id={project_id}, task_ids=[{ids}])")),
            execute: Some(format!(
                "bulk_stop_tasks(project_id={project_id}, task_ids=[{ids}], confirm=true)"
            )),
            task_ids,
            note: "Run the preview first; confirm=true stops every listed task.".to_string(),
        }
    }
}

/// Tasks waiting for a runner.
#[derive(Debug, Clone, Serialize)]
pub struct WaitingTasks {
    /// Waiting tasks, newest first.
    pub waiting_tasks: Vec<Task>,
    /// Number of waiting tasks returned.
    pub count: usize,
    /// Present when there are none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// How to stop them in bulk.
    pub bulk_operations: BulkGuidance,
}

/// Sort newest first and cut to `limit`, returning the page and the original count.
pub fn newest_first_page(mut tasks: Vec<Task>, limit: usize) -> (Vec<Task>, usize) {
    let total = tasks.len();
    sort_newest_first(&mut tasks);
    tasks.truncate(limit);
    (tasks, total)
}

/// Resolve status names and aliases, dropping duplicates.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] for an unknown status.
pub fn resolve_statuses<S: AsRef<str>>(inputs: &[S]) -> Result<Vec<TaskStatus>> {
    let mut resolved = Vec::new();
    for input in inputs {
        let status = TaskStatus::from_alias(input.as_ref())
            .map_err(|e| Error::InvalidArgument(e.to_string()))?;
        if !resolved.contains(&status) {
            resolved.push(status);
        }
    }
    Ok(resolved)
}

/// Filter retrieved tasks by status and bound the result.
pub fn apply_filter(
    tasks: Vec<Task>,
    statuses: &[TaskStatus],
    limit: usize,
    source: TaskSource,
) -> FilterResult {
    let total_tasks = tasks.len();
    let mut status_breakdown = BTreeMap::new();
    for task in &tasks {
        *status_breakdown.entry(task.status.to_string()).or_insert(0) += 1;
    }

    let matching: Vec<Task> = tasks
        .into_iter()
        .filter(|task| statuses.is_empty() || statuses.contains(&task.status))
        .collect();
    let (tasks, matching_tasks) = newest_first_page(matching, limit);
    let filtered_tasks = tasks.len();

    let applied_filters: Vec<String> = statuses.iter().map(ToString::to_string).collect();
    let note = if applied_filters.is_empty() {
        format!("Showing {filtered_tasks} of {total_tasks} tasks (no status filter, newest first)")
    } else {
        format!(
            "Showing {filtered_tasks} of {matching_tasks} tasks with status [{}] \
             out of {total_tasks} retrieved (newest first)",
            applied_filters.join(", ")
        )
    };

    FilterResult {
        tasks,
        statistics: FilterStatistics {
            total_tasks,
            filtered_tasks,
            matching_tasks,
            status_breakdown,
            source,
        },
        applied_filters,
        note,
    }
}

impl TaskService {
    /// List the newest tasks of a project.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote call fails.
    pub async fn list_tasks(&self, project_id: i64, limit: usize) -> Result<TaskListing> {
        if limit > DEFAULT_LIST_LIMIT {
            tracing::warn!(project_id, limit, "large task listing requested");
        }
        let tasks =
            self.gateway.list_tasks(project_id).await.during(|| "listing tasks".to_string())?;
        let (tasks, total) = newest_first_page(tasks, limit);
        let shown = tasks.len();
        Ok(TaskListing {
            tasks,
            total,
            shown,
            note: format!("Showing {shown} of {total} tasks (sorted by newest first)"),
        })
    }

    /// Filter a project's tasks by status.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown status, or if the tasks cannot be read.
    pub async fn filter_tasks(
        &self,
        project_id: i64,
        request: &FilterRequest,
    ) -> Result<FilterResult> {
        let statuses = resolve_statuses(&request.statuses)?;
        let (tasks, source) = self.fetch_for_filter(project_id, request.use_last_tasks).await?;
        let result = apply_filter(tasks, &statuses, request.limit, source);
        tracing::debug!(
            project_id,
            total = result.statistics.total_tasks,
            returned = result.statistics.filtered_tasks,
            "filtered tasks"
        );
        Ok(result)
    }

    async fn fetch_for_filter(
        &self,
        project_id: i64,
        use_last_tasks: bool,
    ) -> Result<(Vec<Task>, TaskSource)> {
        if use_last_tasks {
            match self.gateway.get_last_tasks(project_id).await {
                Ok(tasks) => return Ok((tasks, TaskSource::LastTasks)),
                Err(err) => tracing::warn!(
                    project_id,
                    error = %err,
                    "last tasks endpoint failed, using the full list"
                ),
            }
        }
        let tasks =
            self.gateway.list_tasks(project_id).await.during(|| "filtering tasks".to_string())?;
        Ok((tasks, TaskSource::AllTasks))
    }

    /// The newest task in `error`.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote call fails. No failed tasks is not an error.
    pub async fn get_latest_failed_task(&self, project_id: i64) -> Result<LatestFailedTask> {
        let tasks = self
            .gateway
            .list_tasks(project_id)
            .await
            .during(|| "getting the latest failed task".to_string())?;
        let failed: Vec<Task> =
            tasks.into_iter().filter(|task| task.status == TaskStatus::Error).collect();
        let (mut newest, _) = newest_first_page(failed, 1);
        Ok(newest.pop().map_or_else(
            || LatestFailedTask::NotFound { message: NO_FAILED_TASKS.to_string() },
            |task| LatestFailedTask::Found { task },
        ))
    }

    /// Tasks in `waiting`, with guidance for stopping them in bulk.
    ///
    /// # Errors
    ///
    /// Returns an error if the tasks cannot be read.
    pub async fn get_waiting_tasks(&self, project_id: i64) -> Result<WaitingTasks> {
        let request = FilterRequest::statuses(&["waiting"]).with_limit(WAITING_TASKS_LIMIT);
        let filtered = self.filter_tasks(project_id, &request).await?;
        let task_ids: Vec<i64> = filtered.tasks.iter().map(|task| task.id).collect();
        Ok(WaitingTasks {
            count: filtered.tasks.len(),
            message: filtered.tasks.is_empty().then(|| NO_WAITING_TASKS.to_string()),
            waiting_tasks: filtered.tasks,
            bulk_operations: BulkGuidance::for_tasks(project_id, task_ids),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayError;
    use crate::testing::MockGateway;
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::Arc;

    fn service(gateway: MockGateway) -> (TaskService, Arc<MockGateway>) {
        let gateway = Arc::new(gateway);
        (TaskService::new(gateway.clone(), "http://semaphore.local"), gateway)
    }

    fn task(id: i64, status: TaskStatus, day: u32) -> Task {
        Task::new(id, status).with_created(&format!("2024-01-{day:02}T10:00:00Z"))
    }

    fn five_tasks() -> Vec<Task> {
        vec![
            task(1, TaskStatus::Success, 1),
            task(2, TaskStatus::Error, 2),
            task(3, TaskStatus::Success, 3),
            task(4, TaskStatus::Waiting, 4),
            task(5, TaskStatus::Running, 5),
        ]
    }

    #[tokio::test]
    async fn test_list_tasks_newest_first_with_limit() {
        let (service, _) = service(MockGateway::new().with_tasks(1, five_tasks()));

        let listing = service.list_tasks(1, 3).await.unwrap();

        let ids: Vec<i64> = listing.tasks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![5, 4, 3]);
        assert_eq!(listing.total, 5);
        assert_eq!(listing.shown, 3);
        assert_eq!(listing.note, "Showing 3 of 5 tasks (sorted by newest first)");
    }

    #[tokio::test]
    async fn test_list_tasks_error() {
        let (service, _) = service(
            MockGateway::new().fail_list_tasks(GatewayError::Connection("down".to_string())),
        );
        let err = service.list_tasks(1, DEFAULT_LIST_LIMIT).await.unwrap_err();
        assert!(err.to_string().contains("Error during listing tasks"));
    }

    #[tokio::test]
    async fn test_filter_tasks_by_alias() {
        let (service, gateway) = service(MockGateway::new().with_tasks(1, five_tasks()));

        let result = service
            .filter_tasks(1, &FilterRequest::statuses(&["successful"]).with_limit(10))
            .await
            .unwrap();

        assert_eq!(result.tasks.len(), 2);
        assert_eq!(result.statistics.filtered_tasks, 2);
        assert_eq!(result.statistics.total_tasks, 5);
        assert_eq!(result.statistics.source, TaskSource::LastTasks);
        assert_eq!(result.applied_filters, vec!["success".to_string()]);
        assert_eq!(result.statistics.status_breakdown.get("success"), Some(&2));
        assert_eq!(gateway.calls("get_last_tasks"), 1);
        assert_eq!(gateway.calls("list_tasks"), 0);
    }

    #[tokio::test]
    async fn test_filter_tasks_full_list_when_requested() {
        let (service, gateway) = service(MockGateway::new().with_tasks(1, five_tasks()));

        let request = FilterRequest::statuses(&["failed", "error"]).with_last_tasks(false);
        let result = service.filter_tasks(1, &request).await.unwrap();

        assert_eq!(result.tasks.len(), 1);
        assert_eq!(result.applied_filters, vec!["error".to_string()]);
        assert_eq!(result.statistics.source, TaskSource::AllTasks);
        assert_eq!(gateway.calls("get_last_tasks"), 0);
    }

    #[tokio::test]
    async fn test_filter_tasks_falls_back_when_last_tasks_fail() {
        let (service, gateway) = service(
            MockGateway::new()
                .with_tasks(1, five_tasks())
                .fail_last_tasks(GatewayError::not_found("no such endpoint")),
        );

        let result = service.filter_tasks(1, &FilterRequest::default()).await.unwrap();

        assert_eq!(result.statistics.source, TaskSource::AllTasks);
        assert_eq!(result.tasks.len(), 5);
        assert_eq!(gateway.calls("list_tasks"), 1);
    }

    #[tokio::test]
    async fn test_filter_tasks_rejects_unknown_status() {
        let (service, gateway) = service(MockGateway::new().with_tasks(1, five_tasks()));
        let err =
            service.filter_tasks(1, &FilterRequest::statuses(&["exploded"])).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(gateway.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_filter_tasks_empty_project() {
        let (service, _) = service(MockGateway::new());
        let result =
            service.filter_tasks(1, &FilterRequest::statuses(&["error"])).await.unwrap();
        assert!(result.tasks.is_empty());
        assert_eq!(result.statistics.total_tasks, 0);
        assert_eq!(result.statistics.filtered_tasks, 0);
        assert!(result.statistics.status_breakdown.is_empty());
    }

    #[tokio::test]
    async fn test_latest_failed_task() {
        let mut tasks = five_tasks();
        tasks.push(task(6, TaskStatus::Error, 6));
        let (service, _) = service(MockGateway::new().with_tasks(1, tasks));

        let LatestFailedTask::Found { task } = service.get_latest_failed_task(1).await.unwrap()
        else {
            panic!("expected a failed task");
        };
        assert_eq!(task.id, 6);
    }

    #[tokio::test]
    async fn test_latest_failed_task_none() {
        let tasks = vec![task(1, TaskStatus::Success, 1), task(2, TaskStatus::Success, 2)];
        let (service, _) = service(MockGateway::new().with_tasks(1, tasks));

        let result = service.get_latest_failed_task(1).await.unwrap();

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value, json!({"message": "No failed tasks found for this project"}));
        assert!(value.get("task").is_none());
    }

    #[tokio::test]
    async fn test_waiting_tasks() {
        let mut tasks = five_tasks();
        tasks.push(task(7, TaskStatus::Waiting, 7));
        let (service, _) = service(MockGateway::new().with_tasks(1, tasks));

        let waiting = service.get_waiting_tasks(1).await.unwrap();

        assert_eq!(waiting.count, 2);
        assert!(waiting.message.is_none());
        assert_eq!(waiting.bulk_operations.task_ids, vec![7, 4]);
        assert!(waiting.bulk_operations.execute.unwrap().contains("confirm=true"));
    }

    #[tokio::test]
    async fn test_waiting_tasks_empty() {
        let (service, _) =
            service(MockGateway::new().with_tasks(1, vec![task(1, TaskStatus::Success, 1)]));

        let waiting = service.get_waiting_tasks(1).await.unwrap();

        assert!(waiting.waiting_tasks.is_empty());
        assert_eq!(waiting.count, 0);
        assert_eq!(waiting.message.as_deref(), Some(NO_WAITING_TASKS));
        assert!(!waiting.bulk_operations.available);
    }

    fn arb_status() -> impl Strategy<Value = TaskStatus> {
        prop_oneof![
            Just(TaskStatus::Waiting),
            Just(TaskStatus::Running),
            Just(TaskStatus::Success),
            Just(TaskStatus::Error),
            Just(TaskStatus::Stopped),
        ]
    }

    fn arb_tasks() -> impl Strategy<Value = Vec<Task>> {
        prop::collection::vec((arb_status(), 0i64..2_000_000_000), 0..40).prop_map(|entries| {
            entries
                .into_iter()
                .enumerate()
                .map(|(i, (status, secs))| {
                    let created = chrono::DateTime::from_timestamp(secs, 0)
                        .map(|dt| dt.to_rfc3339())
                        .unwrap_or_default();
                    Task::new(i64::try_from(i).unwrap(), status).with_created(&created)
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_page_is_bounded_and_sorted(tasks in arb_tasks(), limit in 0usize..50) {
            let count = tasks.len();
            let (page, total) = newest_first_page(tasks, limit);
            prop_assert_eq!(total, count);
            prop_assert_eq!(page.len(), limit.min(count));
            for pair in page.windows(2) {
                prop_assert!(pair[0].created_at() >= pair[1].created_at());
            }
        }

        #[test]
        fn prop_filter_respects_limit(
            tasks in arb_tasks(),
            statuses in prop::collection::vec(arb_status(), 0..3),
            limit in 0usize..50,
        ) {
            let result = apply_filter(tasks, &statuses, limit, TaskSource::AllTasks);
            let stats = &result.statistics;
            prop_assert!(result.tasks.len() <= limit);
            prop_assert_eq!(stats.filtered_tasks, result.tasks.len());
            prop_assert!(stats.total_tasks >= stats.filtered_tasks);
            prop_assert!(stats.matching_tasks >= stats.filtered_tasks);
            prop_assert_eq!(stats.status_breakdown.values().sum::<usize>(), stats.total_tasks);
            for task in &result.tasks {
                prop_assert!(statuses.is_empty() || statuses.contains(&task.status));
            }
        }
    }
}
