//! Bounded startup monitoring of a freshly launched task.
//!
//! The remote has no push channel, so monitoring polls `get_task` on a fixed
//! interval until one of these happens: a terminal status is observed, the
//! wall-clock budget runs out, too many consecutive polls fail, or the caller
//! cancels. A 404 right after launch is common while the remote catches up,
//! so a not-found answer first falls back to scanning the project task list
//! before it counts as a failed poll.

use super::models::TaskStatus;
use super::TaskService;
use crate::gateway::GatewayError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Budgets for startup monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Total wall-clock time spent monitoring.
    pub budget: Duration,
    /// Pause between polls.
    pub poll_interval: Duration,
    /// Failed polls in a row before giving up.
    pub max_consecutive_errors: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            budget: Duration::from_secs(30),
            poll_interval: Duration::from_secs(3),
            max_consecutive_errors: 3,
        }
    }
}

/// One poll observation.
#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate {
    /// Observed status, or `poll_failed`.
    pub status: String,
    /// Wall-clock time of the observation.
    pub timestamp: DateTime<Utc>,
    /// Seconds since monitoring started.
    pub elapsed_seconds: f64,
    /// How the status was obtained, or the poll error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Why monitoring ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A terminal status was observed.
    Terminal,
    /// The wall-clock budget ran out.
    BudgetExhausted,
    /// Too many polls failed in a row.
    ErrorBudgetExhausted,
    /// The caller cancelled.
    Cancelled,
}

/// Outcome of a monitoring run.
#[derive(Debug, Clone, Serialize)]
pub struct MonitoringResult {
    /// True iff a terminal status was observed within the budget.
    pub completed: bool,
    /// Last observed status, or `unknown`.
    pub final_status: String,
    /// Time spent monitoring, rounded to 0.1 s.
    pub duration_seconds: f64,
    /// Polls attempted.
    pub total_polls: u32,
    /// Failed polls in a row at the end of the run.
    pub consecutive_errors: u32,
    /// Why monitoring ended.
    pub stop_reason: StopReason,
    /// One entry per poll, in order.
    pub status_updates: Vec<StatusUpdate>,
    /// Human-readable outcome.
    pub summary: String,
}

const POLL_FAILED: &str = "poll_failed";

enum MonitorState {
    Polling,
    FallingBack(GatewayError),
    ErrorAccumulating(GatewayError),
    Sleeping,
    Terminal,
    Stopped(StopReason),
}

struct Progress {
    started: Instant,
    polls: u32,
    consecutive_errors: u32,
    last_status: Option<TaskStatus>,
    updates: Vec<StatusUpdate>,
}

impl Progress {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            polls: 0,
            consecutive_errors: 0,
            last_status: None,
            updates: Vec::new(),
        }
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn push(&mut self, status: String, message: Option<String>) {
        let elapsed_seconds = round_tenths(self.elapsed());
        self.updates.push(StatusUpdate { status, timestamp: Utc::now(), elapsed_seconds, message });
    }

    fn observe(&mut self, status: TaskStatus, message: Option<String>) -> MonitorState {
        self.consecutive_errors = 0;
        self.push(status.to_string(), message);
        let terminal = status.is_terminal();
        self.last_status = Some(status);
        if terminal {
            MonitorState::Terminal
        } else {
            MonitorState::Sleeping
        }
    }

    fn record_error(&mut self, err: &GatewayError) {
        self.consecutive_errors += 1;
        self.push(POLL_FAILED.to_string(), Some(err.to_string()));
    }

    fn finish(self, reason: StopReason, settings: MonitorSettings) -> MonitoringResult {
        let final_status =
            self.last_status.as_ref().map_or_else(|| "unknown".to_string(), ToString::to_string);
        let duration_seconds = round_tenths(self.elapsed());
        let summary = match reason {
            StopReason::Terminal => {
                format!("Task finished in {duration_seconds:.1}s with status: {final_status}")
            }
            StopReason::BudgetExhausted => format!(
                "Task still running after the {}s monitoring window (last status: {final_status}). \
                 Use get_task to keep checking.",
                settings.budget.as_secs()
            ),
            StopReason::ErrorBudgetExhausted => format!(
                "Monitoring stopped after {} consecutive polling errors \
                 (last status: {final_status})",
                self.consecutive_errors
            ),
            StopReason::Cancelled => format!(
                "Monitoring cancelled after {duration_seconds:.1}s (last status: {final_status})"
            ),
        };

        MonitoringResult {
            completed: reason == StopReason::Terminal,
            final_status,
            duration_seconds,
            total_polls: self.polls,
            consecutive_errors: self.consecutive_errors,
            stop_reason: reason,
            status_updates: self.updates,
            summary,
        }
    }
}

fn round_tenths(duration: Duration) -> f64 {
    (duration.as_secs_f64() * 10.0).round() / 10.0
}

/// Run one gateway call, giving up at `deadline` or when `cancel` fires.
async fn within_budget<F: Future>(
    call: F,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<F::Output, StopReason> {
    tokio::select! {
        () = cancel.cancelled() => Err(StopReason::Cancelled),
        outcome = tokio::time::timeout_at(deadline, call) => {
            outcome.map_err(|_| StopReason::BudgetExhausted)
        }
    }
}

impl TaskService {
    /// Poll a task until it finishes or a budget runs out.
    ///
    /// Never fails: gateway errors are absorbed into the error budget and
    /// reported through the returned [`MonitoringResult`].
    pub async fn monitor_task_startup(
        &self,
        project_id: i64,
        task_id: i64,
        cancel: &CancellationToken,
    ) -> MonitoringResult {
        let settings = self.monitor;
        let mut progress = Progress::new();
        let deadline = progress.started + settings.budget;
        let mut state = MonitorState::Polling;

        let reason = loop {
            state = match state {
                MonitorState::Polling => {
                    if cancel.is_cancelled() {
                        MonitorState::Stopped(StopReason::Cancelled)
                    } else if progress.elapsed() >= settings.budget {
                        MonitorState::Stopped(StopReason::BudgetExhausted)
                    } else {
                        progress.polls += 1;
                        let poll = self.gateway.get_task(project_id, task_id);
                        match within_budget(poll, deadline, cancel).await {
                            Err(reason) => MonitorState::Stopped(reason),
                            Ok(Ok(task)) => progress.observe(task.status, None),
                            Ok(Err(err)) if err.is_not_found() => MonitorState::FallingBack(err),
                            Ok(Err(err)) => MonitorState::ErrorAccumulating(err),
                        }
                    }
                }
                MonitorState::FallingBack(err) => {
                    let listing = self.gateway.list_tasks(project_id);
                    match within_budget(listing, deadline, cancel).await {
                        Err(reason) => MonitorState::Stopped(reason),
                        Ok(Ok(tasks)) => match tasks.into_iter().find(|t| t.id == task_id) {
                            Some(task) => {
                                progress.observe(task.status, Some("via task list".to_string()))
                            }
                            None => MonitorState::ErrorAccumulating(err),
                        },
                        Ok(Err(list_err)) => {
                            tracing::debug!(
                                task_id,
                                error = %list_err,
                                "fallback task list failed"
                            );
                            MonitorState::ErrorAccumulating(err)
                        }
                    }
                }
                MonitorState::ErrorAccumulating(err) => {
                    tracing::debug!(task_id, error = %err, "monitoring poll failed");
                    progress.record_error(&err);
                    if progress.consecutive_errors >= settings.max_consecutive_errors {
                        MonitorState::Stopped(StopReason::ErrorBudgetExhausted)
                    } else {
                        MonitorState::Sleeping
                    }
                }
                MonitorState::Sleeping => {
                    let remaining = settings.budget.saturating_sub(progress.elapsed());
                    if remaining.is_zero() {
                        MonitorState::Stopped(StopReason::BudgetExhausted)
                    } else {
                        let pause = settings.poll_interval.min(remaining);
                        tokio::select! {
                            () = cancel.cancelled() => MonitorState::Stopped(StopReason::Cancelled),
                            () = tokio::time::sleep(pause) => MonitorState::Polling,
                        }
                    }
                }
                MonitorState::Terminal => break StopReason::Terminal,
                MonitorState::Stopped(reason) => break reason,
            };
        };

        let result = progress.finish(reason, settings);
        tracing::info!(
            project_id,
            task_id,
            polls = result.total_polls,
            final_status = %result.final_status,
            stop_reason = ?result.stop_reason,
            "startup monitoring finished"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::models::Task;
    use crate::testing::MockGateway;
    use std::sync::Arc;

    fn service(gateway: MockGateway) -> (TaskService, Arc<MockGateway>) {
        let gateway = Arc::new(gateway);
        (TaskService::new(gateway.clone(), "http://semaphore.local"), gateway)
    }

    fn running(id: i64) -> Task {
        Task::new(id, TaskStatus::Running)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_second_poll() {
        let (service, gateway) = service(
            MockGateway::new()
                .script_get_task(vec![Ok(running(7)), Ok(Task::new(7, TaskStatus::Success))]),
        );

        let result = service.monitor_task_startup(1, 7, &CancellationToken::new()).await;

        assert!(result.completed);
        assert_eq!(result.final_status, "success");
        assert_eq!(result.total_polls, 2);
        assert_eq!(result.stop_reason, StopReason::Terminal);
        assert_eq!(result.status_updates.len(), 2);
        assert!(result.summary.contains("Task finished"));
        assert_eq!(gateway.calls("get_task"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_terminal_status() {
        let (service, _) = service(
            MockGateway::new().script_get_task(vec![Ok(Task::new(7, TaskStatus::Success))]),
        );
        let result = service.monitor_task_startup(1, 7, &CancellationToken::new()).await;
        assert!(result.completed);
        assert_eq!(result.total_polls, 1);
        assert_eq!(result.duration_seconds, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_running_exhausts_budget() {
        let (service, _) = service(MockGateway::new().with_tasks(1, vec![running(7)]));

        let result = service.monitor_task_startup(1, 7, &CancellationToken::new()).await;

        assert!(!result.completed);
        assert_eq!(result.final_status, "running");
        assert_eq!(result.stop_reason, StopReason::BudgetExhausted);
        assert!(result.summary.contains("still running"));
        // Polls at 0, 3, ..., 27 seconds.
        assert_eq!(result.total_polls, 10);
        assert!(result.duration_seconds <= 30.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_falls_back_to_task_list() {
        let (service, gateway) = service(
            MockGateway::new()
                .with_tasks(1, vec![Task::new(7, TaskStatus::Success)])
                .script_get_task(vec![Err(GatewayError::not_found("Task not found"))]),
        );

        let result = service.monitor_task_startup(1, 7, &CancellationToken::new()).await;

        assert!(result.completed);
        assert_eq!(result.consecutive_errors, 0);
        assert_eq!(result.status_updates[0].message.as_deref(), Some("via task list"));
        assert_eq!(gateway.calls("list_tasks"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_not_found_stops_on_error_budget() {
        let (service, _) = service(
            MockGateway::new().fail_get_task(GatewayError::not_found("Task not found")),
        );

        let result = service.monitor_task_startup(1, 7, &CancellationToken::new()).await;

        assert!(!result.completed);
        assert_eq!(result.consecutive_errors, 3);
        assert_eq!(result.total_polls, 3);
        assert_eq!(result.final_status, "unknown");
        assert_eq!(result.stop_reason, StopReason::ErrorBudgetExhausted);
        assert!(result
            .status_updates
            .iter()
            .all(|u| u.message.as_deref().is_some_and(|m| m.contains("HTTP error"))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_errors_are_absorbed_then_recovered() {
        let (service, _) = service(MockGateway::new().script_get_task(vec![
            Err(GatewayError::Connection("Connection refused".to_string())),
            Ok(running(7)),
            Ok(Task::new(7, TaskStatus::Error)),
        ]));

        let result = service.monitor_task_startup(1, 7, &CancellationToken::new()).await;

        assert!(result.completed);
        assert_eq!(result.final_status, "error");
        assert_eq!(result.consecutive_errors, 0);
        assert_eq!(result.status_updates[0].status, POLL_FAILED);
        assert!(result.status_updates[0].message.as_deref().unwrap().contains("Connection"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start() {
        let (service, gateway) = service(MockGateway::new().with_tasks(1, vec![running(7)]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = service.monitor_task_startup(1, 7, &cancel).await;

        assert!(!result.completed);
        assert_eq!(result.stop_reason, StopReason::Cancelled);
        assert_eq!(gateway.calls("get_task"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_while_sleeping() {
        let (service, _) = service(MockGateway::new().with_tasks(1, vec![running(7)]));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(4)).await;
            trigger.cancel();
        });

        let result = service.monitor_task_startup(1, 7, &cancel).await;

        assert!(!result.completed);
        assert_eq!(result.stop_reason, StopReason::Cancelled);
        assert_eq!(result.total_polls, 2);
        assert!(result.summary.contains("cancelled"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_terminal_answer_after_budget_is_not_completion() {
        let (service, _) = service(
            MockGateway::new()
                .with_latency(Duration::from_secs(20))
                .script_get_task(vec![Ok(running(7)), Ok(Task::new(7, TaskStatus::Success))]),
        );

        let result = service.monitor_task_startup(1, 7, &CancellationToken::new()).await;

        assert!(!result.completed);
        assert_eq!(result.stop_reason, StopReason::BudgetExhausted);
        assert_eq!(result.final_status, "running");
        assert_eq!(result.total_polls, 2);
        assert!(result.duration_seconds <= 30.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fallback_listing_is_bounded_by_budget() {
        let settings =
            MonitorSettings { budget: Duration::from_secs(10), ..MonitorSettings::default() };
        let (service, gateway) = service(
            MockGateway::new()
                .with_latency(Duration::from_secs(6))
                .with_tasks(1, vec![Task::new(7, TaskStatus::Success)])
                .fail_get_task(GatewayError::not_found("Task not found")),
        );
        let service = service.with_monitor_settings(settings);

        let result = service.monitor_task_startup(1, 7, &CancellationToken::new()).await;

        assert!(!result.completed);
        assert_eq!(result.stop_reason, StopReason::BudgetExhausted);
        assert_eq!(gateway.calls("list_tasks"), 1);
        assert!(result.duration_seconds <= 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_during_gateway_call() {
        let (service, _) = service(
            MockGateway::new()
                .with_latency(Duration::from_secs(20))
                .with_tasks(1, vec![running(7)]),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result = service.monitor_task_startup(1, 7, &cancel).await;

        assert!(!result.completed);
        assert_eq!(result.stop_reason, StopReason::Cancelled);
        assert_eq!(result.total_polls, 1);
        assert!(result.status_updates.is_empty());
        assert!(result.duration_seconds < 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_settings_are_respected() {
        let settings = MonitorSettings {
            budget: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            max_consecutive_errors: 1,
        };
        let (service, _) = service(
            MockGateway::new().fail_get_task(GatewayError::Connection("reset".to_string())),
        );
        let service = service.with_monitor_settings(settings);

        let result = service.monitor_task_startup(1, 7, &CancellationToken::new()).await;

        assert_eq!(result.total_polls, 1);
        assert_eq!(result.stop_reason, StopReason::ErrorBudgetExhausted);
    }
}
