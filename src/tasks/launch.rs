//! Launching tasks, with optional startup monitoring.

use super::models::Task;
use super::monitor::{MonitoringResult, StopReason};
use super::TaskService;
use crate::error::{Error, Result, ResultExt};
use crate::gateway::{GatewayError, NewTask};
use serde::Serialize;
use serde_json::{Map, Value};

const ENVIRONMENT_HINT: &str = "The 400 Bad Request might be related to unsupported environment \
     variables or malformed environment data. Retry without `environment` to confirm.";

/// Parameters accepted by [`TaskService::run_task`].
#[derive(Debug, Clone, Default)]
pub struct RunTaskRequest {
    /// Template to run.
    pub template_id: i64,
    /// Owning project; looked up from the template when absent or not
    /// positive.
    pub project_id: Option<i64>,
    /// Extra environment variables.
    pub environment: Option<Map<String, Value>>,
    /// Host limit pattern.
    pub limit: Option<String>,
    /// Run in check mode.
    pub dry_run: Option<bool>,
    /// Show diffs.
    pub diff: Option<bool>,
    /// Verbose output.
    pub debug: Option<bool>,
    /// Playbook override.
    pub playbook: Option<String>,
    /// Git branch override.
    pub git_branch: Option<String>,
    /// History message.
    pub message: Option<String>,
    /// Extra CLI arguments (JSON-encoded list).
    pub arguments: Option<String>,
    /// Inventory override.
    pub inventory_id: Option<i64>,
    /// Monitor the task right after launch.
    pub follow: bool,
}

impl RunTaskRequest {
    /// A request that runs `template_id` with remote defaults.
    #[must_use]
    pub fn new(template_id: i64) -> Self {
        Self { template_id, ..Self::default() }
    }

    fn to_new_task(&self) -> NewTask {
        NewTask {
            template_id: self.template_id,
            environment: self.environment.clone(),
            limit: self.limit.clone(),
            dry_run: self.dry_run,
            diff: self.diff,
            debug: self.debug,
            playbook: self.playbook.clone(),
            git_branch: self.git_branch.clone(),
            message: self.message.clone(),
            arguments: self.arguments.clone(),
            inventory_id: self.inventory_id,
        }
    }
}

/// Links into the web UI for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebUrls {
    /// The task's detail view.
    pub task_detail: String,
    /// The project's task history.
    pub project_tasks: String,
}

impl WebUrls {
    /// Build links from the web root.
    pub fn build(web_root: &str, project_id: i64, task_id: i64) -> Self {
        let project_tasks = format!("{web_root}/project/{project_id}/history");
        Self { task_detail: format!("{project_tasks}?t={task_id}"), project_tasks }
    }
}

/// Monitoring section of a launch result.
#[derive(Debug, Clone, Serialize)]
pub struct MonitoringSection {
    /// Whether startup monitoring ran.
    pub enabled: bool,
    /// The monitoring outcome, when it ran.
    #[serde(flatten)]
    pub result: Option<MonitoringResult>,
    /// How to monitor manually, when it did not run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// A successfully launched task.
#[derive(Debug, Clone, Serialize)]
pub struct LaunchedTask {
    /// The task as returned by the remote.
    pub task: Task,
    /// Web UI links.
    pub web_urls: WebUrls,
    /// Human-readable outcome.
    pub message: String,
    /// Suggested follow-up tool calls.
    pub next_steps: Vec<String>,
    /// Startup monitoring outcome.
    pub monitoring: MonitoringSection,
}

/// A launch rejected by the remote.
#[derive(Debug, Clone, Serialize)]
pub struct LaunchFailure {
    /// Description of the failure.
    pub error: String,
    /// Always `http_error`.
    pub error_type: &'static str,
    /// HTTP status code from the remote.
    pub status_code: u16,
    /// Template that was launched.
    pub template_id: i64,
    /// Project it was launched in.
    pub project_id: i64,
    /// Likely cause, when the status code suggests one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// Result of [`TaskService::run_task`].
///
/// HTTP rejections are returned rather than raised so a multi-step caller
/// can inspect them and carry on.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RunTaskOutcome {
    /// The task was created.
    Launched(Box<LaunchedTask>),
    /// The remote refused to create the task.
    Rejected(LaunchFailure),
}

fn launch_hint(status: u16, has_environment: bool) -> Option<String> {
    let hint = match status {
        400 if has_environment => ENVIRONMENT_HINT,
        400 => {
            "The remote rejected the task parameters; \
             check the optional fields against the template."
        }
        401 | 403 => "Check that the API token is valid and has access to this project.",
        404 => "Template or project not found; verify the ids with list_templates.",
        _ => return None,
    };
    Some(hint.to_string())
}

fn next_steps(project_id: i64, task_id: i64) -> Vec<String> {
    vec![
        format!("Check status: get_task(project_id={project_id}, task_id={task_id})"),
        format!("Read the log: get_task_raw_output(project_id={project_id}, task_id={task_id})"),
        format!("If it fails: analyze_task_failure(project_id={project_id}, task_id={task_id})"),
        format!("Cancel it: stop_task(project_id={project_id}, task_id={task_id})"),
    ]
}

fn follow_message(task_id: i64, result: &MonitoringResult, urls: &WebUrls) -> String {
    let seconds = result.duration_seconds;
    match result.stop_reason {
        StopReason::Terminal if result.final_status == "success" => {
            format!("Task #{task_id} completed successfully in {seconds:.1}s")
        }
        StopReason::Terminal if result.final_status == "error" => format!(
            "Task #{task_id} failed after {seconds:.1}s. Use analyze_task_failure for diagnostics."
        ),
        StopReason::Terminal => {
            format!(
                "Task #{task_id} finished with status '{}' after {seconds:.1}s",
                result.final_status
            )
        }
        StopReason::ErrorBudgetExhausted => {
            format!("Task #{task_id} was started but monitoring failed: {}", result.summary)
        }
        StopReason::BudgetExhausted | StopReason::Cancelled => format!(
            "Task #{task_id} is still {} after {seconds:.1}s. Follow it at {}",
            result.final_status, urls.task_detail
        ),
    }
}

impl TaskService {
    /// Launch a task, optionally waiting a bounded time for it to settle.
    ///
    /// # Errors
    ///
    /// Returns an error if the project cannot be resolved or the remote is
    /// unreachable. HTTP rejections come back as [`RunTaskOutcome::Rejected`].
    pub async fn run_task(&self, request: RunTaskRequest) -> Result<RunTaskOutcome> {
        let template_id = request.template_id;
        let project_id = match request.project_id.filter(|&id| id > 0) {
            Some(id) => id,
            None => self.resolve_project(template_id).await?,
        };

        tracing::info!(project_id, template_id, follow = request.follow, "launching task");
        let task = match self.gateway.create_task(project_id, &request.to_new_task()).await {
            Ok(task) => task,
            Err(err @ GatewayError::Http { status, .. }) => {
                tracing::warn!(project_id, template_id, error = %err, "task launch rejected");
                return Ok(RunTaskOutcome::Rejected(LaunchFailure {
                    error: format!("HTTP error while running task: {err}"),
                    error_type: "http_error",
                    status_code: status,
                    template_id,
                    project_id,
                    hint: launch_hint(status, request.environment.is_some()),
                }));
            }
            Err(source) => {
                return Err(Error::Gateway {
                    action: format!("running task for template {template_id}"),
                    source,
                })
            }
        };

        let task_id = task.id;
        let web_urls = WebUrls::build(&self.web_root, project_id, task_id);
        let (message, monitoring) = if request.follow {
            let cancel = self.shutdown.child_token();
            let result = self.monitor_task_startup(project_id, task_id, &cancel).await;
            let message = follow_message(task_id, &result, &web_urls);
            (message, MonitoringSection { enabled: true, result: Some(result), hint: None })
        } else {
            let message = format!(
                "Task #{task_id} started from template {template_id}. View it at {}",
                web_urls.task_detail
            );
            let hint = format!(
                "Startup monitoring is off; pass follow=true or poll \
                 get_task(project_id={project_id}, task_id={task_id})"
            );
            (message, MonitoringSection { enabled: false, result: None, hint: Some(hint) })
        };

        Ok(RunTaskOutcome::Launched(Box::new(LaunchedTask {
            task,
            web_urls,
            message,
            next_steps: next_steps(project_id, task_id),
            monitoring,
        })))
    }

    /// Find the project that owns a template by scanning every project.
    async fn resolve_project(&self, template_id: i64) -> Result<i64> {
        let projects = self
            .gateway
            .list_projects()
            .await
            .during(|| format!("looking up the project of template {template_id}"))?;

        for project in &projects {
            match self.gateway.list_templates(project.id).await {
                Ok(templates) if templates.iter().any(|t| t.id == template_id) => {
                    tracing::debug!(template_id, project_id = project.id, "resolved project");
                    return Ok(project.id);
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(
                    project_id = project.id,
                    error = %err,
                    "could not list templates while resolving project"
                ),
            }
        }
        Err(Error::ProjectNotResolved(template_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::models::TaskStatus;
    use crate::testing::MockGateway;
    use serde_json::json;
    use std::sync::Arc;

    fn service(gateway: MockGateway) -> (TaskService, Arc<MockGateway>) {
        let gateway = Arc::new(gateway);
        (TaskService::new(gateway.clone(), "http://semaphore.local/api"), gateway)
    }

    fn launched(outcome: RunTaskOutcome) -> LaunchedTask {
        match outcome {
            RunTaskOutcome::Launched(task) => *task,
            RunTaskOutcome::Rejected(failure) => panic!("unexpected rejection: {failure:?}"),
        }
    }

    #[test]
    fn test_web_urls() {
        let urls = WebUrls::build("http://semaphore.local", 2, 15);
        assert_eq!(urls.project_tasks, "http://semaphore.local/project/2/history");
        assert_eq!(urls.task_detail, "http://semaphore.local/project/2/history?t=15");
    }

    #[tokio::test]
    async fn test_run_task_without_follow() {
        let (service, gateway) = service(MockGateway::new());
        let mut request = RunTaskRequest::new(4);
        request.project_id = Some(1);

        let result = launched(service.run_task(request).await.unwrap());

        assert!(result.message.contains(&format!("#{}", result.task.id)));
        assert!(!result.monitoring.enabled);
        assert!(result.monitoring.result.is_none());
        assert_eq!(result.next_steps.len(), 4);
        assert_eq!(gateway.calls("get_task"), 0);

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["monitoring"]["enabled"], json!(false));
        assert!(value["web_urls"]["task_detail"]
            .as_str()
            .unwrap()
            .starts_with("http://semaphore.local/project/1/history?t="));
    }

    #[tokio::test]
    async fn test_run_task_forwards_optional_fields() {
        let (service, gateway) = service(MockGateway::new());
        let mut env = Map::new();
        env.insert("TARGET".to_string(), json!("blue"));
        let request = RunTaskRequest {
            template_id: 4,
            project_id: Some(1),
            environment: Some(env.clone()),
            dry_run: Some(true),
            git_branch: Some("release".to_string()),
            ..RunTaskRequest::default()
        };

        service.run_task(request).await.unwrap();

        let (project_id, sent) = gateway.created_tasks().remove(0);
        assert_eq!(project_id, 1);
        assert_eq!(sent.environment, Some(env));
        assert_eq!(sent.dry_run, Some(true));
        assert_eq!(sent.git_branch.as_deref(), Some("release"));
        assert_eq!(sent.limit, None);
    }

    #[tokio::test]
    async fn test_run_task_resolves_project_from_templates() {
        let (service, gateway) = service(
            MockGateway::new()
                .with_project(1, "Alpha")
                .with_project(2, "Beta")
                .with_template(1, 10, "Build")
                .with_template(2, 20, "Deploy"),
        );

        let result = launched(service.run_task(RunTaskRequest::new(20)).await.unwrap());

        assert_eq!(result.task.project_id, Some(2));
        assert_eq!(gateway.created_tasks()[0].0, 2);
    }

    #[tokio::test]
    async fn test_run_task_zero_project_id_is_resolved() {
        let (service, gateway) = service(
            MockGateway::new()
                .with_project(1, "Alpha")
                .with_project(2, "Beta")
                .with_template(2, 20, "Deploy"),
        );
        let mut request = RunTaskRequest::new(20);
        request.project_id = Some(0);

        let result = launched(service.run_task(request).await.unwrap());

        assert_eq!(result.task.project_id, Some(2));
        assert_eq!(gateway.created_tasks()[0].0, 2);
        assert!(result.web_urls.task_detail.contains("/project/2/"));
    }

    #[tokio::test]
    async fn test_run_task_unresolvable_project_raises() {
        let (service, gateway) =
            service(MockGateway::new().with_project(1, "Alpha").with_template(1, 10, "Build"));

        let err = service.run_task(RunTaskRequest::new(99)).await.unwrap_err();

        assert!(matches!(err, Error::ProjectNotResolved(99)));
        assert!(err.to_string().contains("Could not determine project_id"));
        assert_eq!(gateway.calls("create_task"), 0);
    }

    #[tokio::test]
    async fn test_run_task_http_error_is_returned_not_raised() {
        let (service, _) = service(MockGateway::new().fail_create_task(GatewayError::Http {
            status: 400,
            message: "Bad Request".to_string(),
        }));
        let mut env = Map::new();
        env.insert("X".to_string(), json!("1"));
        let request = RunTaskRequest {
            template_id: 4,
            project_id: Some(1),
            environment: Some(env),
            ..RunTaskRequest::default()
        };

        let outcome = service.run_task(request).await.unwrap();

        let RunTaskOutcome::Rejected(failure) = outcome else {
            panic!("expected a rejection");
        };
        assert!(failure.error.contains("HTTP error while running task"));
        assert_eq!(failure.error_type, "http_error");
        assert_eq!(failure.status_code, 400);
        assert!(failure.hint.unwrap().contains("environment"));
    }

    #[tokio::test]
    async fn test_run_task_connection_error_raises() {
        let (service, _) = service(
            MockGateway::new().fail_create_task(GatewayError::Connection("refused".to_string())),
        );
        let mut request = RunTaskRequest::new(4);
        request.project_id = Some(1);

        let err = service.run_task(request).await.unwrap_err();

        assert!(err.to_string().starts_with("Error during running task for template 4"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_task_with_follow_embeds_monitoring() {
        let (service, _) = service(
            MockGateway::new().script_get_task(vec![Ok(Task::new(1000, TaskStatus::Success))]),
        );
        let request = RunTaskRequest {
            template_id: 4,
            project_id: Some(1),
            follow: true,
            ..RunTaskRequest::default()
        };

        let result = launched(service.run_task(request).await.unwrap());

        assert!(result.message.contains("completed successfully"));
        let monitoring = result.monitoring.result.unwrap();
        assert!(monitoring.completed);
        assert_eq!(monitoring.final_status, "success");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_task_follow_reports_still_running() {
        let (service, _) = service(MockGateway::new());
        let request = RunTaskRequest {
            template_id: 4,
            project_id: Some(1),
            follow: true,
            ..RunTaskRequest::default()
        };

        // The mock keeps the created task in `waiting`.
        let result = launched(service.run_task(request).await.unwrap());

        assert!(result.message.contains("is still waiting"));
        assert!(!result.monitoring.result.unwrap().completed);
    }

    #[test]
    fn test_launch_hints() {
        assert_eq!(launch_hint(400, true).as_deref(), Some(ENVIRONMENT_HINT));
        assert!(launch_hint(400, false).unwrap().contains("parameters"));
        assert!(launch_hint(403, false).unwrap().contains("token"));
        assert!(launch_hint(404, false).unwrap().contains("list_templates"));
        assert_eq!(launch_hint(500, true), None);
    }
}
