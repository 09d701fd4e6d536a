//! MCP server exposing SemaphoreUI operations as tools.
//!
//! Each tool validates its input, delegates to [`TaskService`] or
//! [`ResourceService`], and returns pretty-printed JSON. Caller mistakes map
//! to `invalid_params`; everything else maps to `internal_error` carrying the
//! action-scoped message.

// The rmcp `#[tool(aggr)]` macro requires ownership of input structs,
// making pass-by-value necessary for all tool handler functions.
#![allow(clippy::needless_pass_by_value)]

use crate::error::Error;
use crate::gateway::{Gateway, ResourceKind};
use crate::mcp_logging::ToolCallGuard;
use crate::resources::{
    AccessKeyType, NewAccessKey, NewRepository, RepositoryUpdate, ResourceService,
};
use crate::tasks::analysis::DEFAULT_BULK_ANALYSIS_LIMIT;
use crate::tasks::query::{DEFAULT_FILTER_LIMIT, DEFAULT_LIST_LIMIT};
use crate::tasks::{BulkStopRequest, FilterRequest, RunTaskRequest, TaskService};
use rmcp::model::{
    CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo,
};
use rmcp::tool;
use rmcp::Error as McpError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Instructions for the MCP server, shown to agents using this server.
const INSTRUCTIONS: &str = r"SemaphoreUI automation server. Use these tools to inspect projects and templates, launch tasks, follow them, and diagnose failures.

## Running tasks

`run_task` needs only a `template_id`; the project is looked up when omitted. Pass `follow: true` to watch the task for a short time after launch. Monitoring is bounded, so a long task will still be running when the call returns; use `get_task` afterwards.

## Keeping responses small

Task histories can be large. `list_tasks` returns 5 tasks by default and `filter_tasks` 50. Prefer `filter_tasks` with a status (`error`, `running`, `waiting`...) over listing everything.

## When something fails

1. `get_latest_failed_task` finds the newest failure.
2. `analyze_task_failure` bundles the task, its template, its project and the raw log.
3. `bulk_analyze_failures` looks for templates and error patterns shared by recent failures.

## Stopping tasks

`bulk_stop_tasks` is two-phase. Call it without `confirm` to see what would be stopped, then again with `confirm: true`. `get_waiting_tasks` lists queued tasks and prints both calls.
";

/// MCP server for SemaphoreUI.
#[derive(Clone)]
pub struct SemaphoreServer {
    tasks: TaskService,
    resources: ResourceService,
}

impl SemaphoreServer {
    /// Create a server over `gateway` for the SemaphoreUI at `base_url`.
    pub fn new(gateway: Arc<dyn Gateway>, base_url: &str) -> Self {
        Self {
            resources: ResourceService::new(Arc::clone(&gateway)),
            tasks: TaskService::new(gateway, base_url),
        }
    }

    /// Create a server from already configured services.
    pub const fn from_services(tasks: TaskService, resources: ResourceService) -> Self {
        Self { tasks, resources }
    }

    /// The task service behind the task tools.
    pub const fn tasks(&self) -> &TaskService {
        &self.tasks
    }
}

/// Map a crate error to the MCP error the client sees.
pub fn to_mcp_error(err: &Error) -> McpError {
    if err.is_caller_error() {
        McpError::invalid_params(err.to_string(), None)
    } else {
        McpError::internal_error(err.to_string(), None)
    }
}

/// Serialize a tool result, logging and marking failures on the guard.
fn respond<T: Serialize>(
    mut guard: ToolCallGuard,
    result: crate::error::Result<T>,
) -> Result<CallToolResult, McpError> {
    let rendered = result.and_then(|value| Ok(serde_json::to_string_pretty(&value)?));
    match rendered {
        Ok(json) => Ok(CallToolResult::success(vec![Content::text(json)])),
        Err(err) => {
            guard.mark_error();
            tracing::error!(error = %err, "tool call failed");
            Err(to_mcp_error(&err))
        }
    }
}

// Input types

/// Input for tools addressing a project.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ProjectInput {
    /// Project ID.
    pub project_id: i64,
}

/// Input for creating a project.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateProjectInput {
    /// Project fields as a JSON object, e.g. {"name": "Infra"}.
    pub data: Value,
}

/// Input for updating a project.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateProjectInput {
    /// Project ID.
    pub project_id: i64,
    /// Fields to store, as a JSON object.
    pub data: Value,
}

/// Input for tools addressing a template.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct TemplateInput {
    /// Project ID.
    pub project_id: i64,
    /// Template ID.
    pub template_id: i64,
}

/// Input for creating a project-scoped resource from a JSON object.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateResourceInput {
    /// Project ID.
    pub project_id: i64,
    /// Resource fields as a JSON object.
    pub data: Value,
}

/// Input for updating a template.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateTemplateInput {
    /// Project ID.
    pub project_id: i64,
    /// Template ID.
    pub template_id: i64,
    /// Template fields as a JSON object.
    pub data: Value,
}

/// Input for launching a task.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RunTaskInput {
    /// Template to run.
    pub template_id: i64,
    /// Project ID (optional, looked up from the template when omitted or 0).
    pub project_id: Option<i64>,
    /// Extra environment variables for this run.
    pub environment: Option<Map<String, Value>>,
    /// Limit the run to these hosts (Ansible --limit).
    pub limit: Option<String>,
    /// Run in check mode.
    pub dry_run: Option<bool>,
    /// Show changes (Ansible --diff).
    pub diff: Option<bool>,
    /// Verbose output.
    pub debug: Option<bool>,
    /// Playbook override.
    pub playbook: Option<String>,
    /// Git branch override.
    pub git_branch: Option<String>,
    /// Message shown in the task history.
    pub message: Option<String>,
    /// Extra CLI arguments as a JSON-encoded list.
    pub arguments: Option<String>,
    /// Inventory override.
    pub inventory_id: Option<i64>,
    /// Watch the task for a short time after launch (default false).
    #[serde(default)]
    pub follow: bool,
}

impl From<RunTaskInput> for RunTaskRequest {
    fn from(input: RunTaskInput) -> Self {
        Self {
            template_id: input.template_id,
            project_id: input.project_id,
            environment: input.environment,
            limit: input.limit,
            dry_run: input.dry_run,
            diff: input.diff,
            debug: input.debug,
            playbook: input.playbook,
            git_branch: input.git_branch,
            message: input.message,
            arguments: input.arguments,
            inventory_id: input.inventory_id,
            follow: input.follow,
        }
    }
}

/// Input for tools addressing one task.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct TaskInput {
    /// Project ID.
    pub project_id: i64,
    /// Task ID.
    pub task_id: i64,
}

/// Input for listing tasks.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListTasksInput {
    /// Project ID.
    pub project_id: i64,
    /// Maximum number of tasks to return (optional, default 5).
    pub limit: Option<usize>,
}

/// Input for filtering tasks.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct FilterTasksInput {
    /// Project ID.
    pub project_id: i64,
    /// Statuses to keep, e.g. ["error", "running"]. Aliases such as "failed" or "queued" work too.
    #[serde(default)]
    pub status: Vec<String>,
    /// Maximum number of tasks to return (optional, default 50).
    pub limit: Option<usize>,
    /// Read from the faster recent-tasks endpoint first (optional, default true).
    pub use_last_tasks: Option<bool>,
}

/// Input for stopping tasks in bulk.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct BulkStopInput {
    /// Project ID.
    pub project_id: i64,
    /// Tasks to stop.
    pub task_ids: Vec<i64>,
    /// Actually stop the tasks; without it the call only previews (default false).
    #[serde(default)]
    pub confirm: bool,
}

/// Input for analyzing recent failures.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct BulkAnalyzeInput {
    /// Project ID.
    pub project_id: i64,
    /// Number of recent failures to analyze (optional, default 5).
    pub limit: Option<usize>,
}

/// Input for tools addressing an environment.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct EnvironmentInput {
    /// Project ID.
    pub project_id: i64,
    /// Environment ID.
    pub environment_id: i64,
}

/// Input for updating an environment.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateEnvironmentInput {
    /// Project ID.
    pub project_id: i64,
    /// Environment ID.
    pub environment_id: i64,
    /// Environment fields as a JSON object.
    pub data: Value,
}

/// Input for tools addressing an inventory.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct InventoryInput {
    /// Project ID.
    pub project_id: i64,
    /// Inventory ID.
    pub inventory_id: i64,
}

/// Input for updating an inventory.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateInventoryInput {
    /// Project ID.
    pub project_id: i64,
    /// Inventory ID.
    pub inventory_id: i64,
    /// Inventory fields as a JSON object.
    pub data: Value,
}

/// Input for tools addressing a repository.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RepositoryInput {
    /// Project ID.
    pub project_id: i64,
    /// Repository ID.
    pub repository_id: i64,
}

/// Input for creating a repository.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateRepositoryInput {
    /// Project ID.
    pub project_id: i64,
    /// Repository name.
    pub name: String,
    /// Clone URL.
    pub git_url: String,
    /// Branch (optional, default "main").
    pub git_branch: Option<String>,
    /// Access key used to clone.
    pub ssh_key_id: i64,
}

/// Input for updating a repository. Omitted fields keep their value.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateRepositoryInput {
    /// Project ID.
    pub project_id: i64,
    /// Repository ID.
    pub repository_id: i64,
    /// New name.
    pub name: Option<String>,
    /// New clone URL.
    pub git_url: Option<String>,
    /// New branch.
    pub git_branch: Option<String>,
    /// New access key.
    pub ssh_key_id: Option<i64>,
}

/// Input for creating an access key.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateAccessKeyInput {
    /// Project ID.
    pub project_id: i64,
    /// Key name.
    pub name: String,
    /// One of "none", "ssh" or "login_password".
    pub key_type: String,
    /// Login (ssh, login_password).
    pub login: Option<String>,
    /// Password (login_password).
    pub password: Option<String>,
    /// Private key (ssh).
    pub private_key: Option<String>,
}

// Tool implementations
// Note: rmcp macros require pass-by-value for input parameters

#[tool(tool_box)]
impl SemaphoreServer {
    // Projects

    #[tool(description = "List all projects")]
    async fn list_projects(&self) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("list_projects");
        respond(guard, self.resources.list_projects().await)
    }

    #[tool(description = "Get a project by its ID")]
    async fn get_project(
        &self,
        #[tool(aggr)] input: ProjectInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("get_project");
        respond(guard, self.resources.get_project(input.project_id).await)
    }

    #[tool(description = "Create a project from a JSON object of project fields")]
    async fn create_project(
        &self,
        #[tool(aggr)] input: CreateProjectInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("create_project");
        respond(guard, self.resources.create_project(input.data).await)
    }

    #[tool(description = "Update a project with a JSON object of project fields")]
    async fn update_project(
        &self,
        #[tool(aggr)] input: UpdateProjectInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("update_project");
        respond(guard, self.resources.update_project(input.project_id, input.data).await)
    }

    #[tool(description = "Delete a project by its ID")]
    async fn delete_project(
        &self,
        #[tool(aggr)] input: ProjectInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("delete_project");
        respond(guard, self.resources.delete_project(input.project_id).await)
    }

    // Templates

    #[tool(description = "List the templates of a project")]
    async fn list_templates(
        &self,
        #[tool(aggr)] input: ProjectInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("list_templates");
        respond(guard, self.resources.list_templates(input.project_id).await)
    }

    #[tool(description = "Get a template by its ID")]
    async fn get_template(
        &self,
        #[tool(aggr)] input: TemplateInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("get_template");
        respond(guard, self.resources.get_template(input.project_id, input.template_id).await)
    }

    #[tool(description = "Create a template from a JSON object of template fields")]
    async fn create_template(
        &self,
        #[tool(aggr)] input: CreateResourceInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("create_template");
        respond(guard, self.resources.create_template(input.project_id, input.data).await)
    }

    #[tool(description = "Update a template with a JSON object of template fields")]
    async fn update_template(
        &self,
        #[tool(aggr)] input: UpdateTemplateInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("update_template");
        respond(
            guard,
            self.resources.update_template(input.project_id, input.template_id, input.data).await,
        )
    }

    #[tool(description = "Delete a template by its ID")]
    async fn delete_template(
        &self,
        #[tool(aggr)] input: TemplateInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("delete_template");
        respond(guard, self.resources.delete_template(input.project_id, input.template_id).await)
    }

    #[tool(description = "Stop every running task of a template")]
    async fn stop_all_template_tasks(
        &self,
        #[tool(aggr)] input: TemplateInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("stop_all_template_tasks");
        respond(
            guard,
            self.resources.stop_all_template_tasks(input.project_id, input.template_id).await,
        )
    }

    // Tasks

    #[tool(
        description = "Run a task from a template. \
                       Set follow=true to monitor the first seconds of the run"
    )]
    async fn run_task(
        &self,
        #[tool(aggr)] input: RunTaskInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("run_task");
        respond(guard, self.tasks.run_task(input.into()).await)
    }

    #[tool(description = "Get a task by its ID")]
    async fn get_task(&self, #[tool(aggr)] input: TaskInput) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("get_task");
        respond(guard, self.tasks.get_task(input.project_id, input.task_id).await)
    }

    #[tool(description = "List the newest tasks of a project (default 5)")]
    async fn list_tasks(
        &self,
        #[tool(aggr)] input: ListTasksInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("list_tasks");
        let limit = input.limit.unwrap_or(DEFAULT_LIST_LIMIT);
        respond(guard, self.tasks.list_tasks(input.project_id, limit).await)
    }

    #[tool(
        description = "Filter a project's tasks by status, newest first, with counts per status"
    )]
    async fn filter_tasks(
        &self,
        #[tool(aggr)] input: FilterTasksInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("filter_tasks");
        let request = FilterRequest::statuses(&input.status)
            .with_limit(input.limit.unwrap_or(DEFAULT_FILTER_LIMIT))
            .with_last_tasks(input.use_last_tasks.unwrap_or(true));
        respond(guard, self.tasks.filter_tasks(input.project_id, &request).await)
    }

    #[tool(description = "Stop a running task")]
    async fn stop_task(&self, #[tool(aggr)] input: TaskInput) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("stop_task");
        respond(guard, self.tasks.stop_task(input.project_id, input.task_id).await)
    }

    #[tool(
        description = "Stop several tasks. \
                       Without confirm=true this only previews what would be stopped"
    )]
    async fn bulk_stop_tasks(
        &self,
        #[tool(aggr)] input: BulkStopInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("bulk_stop_tasks");
        let request = BulkStopRequest {
            project_id: input.project_id,
            task_ids: input.task_ids,
            confirm: input.confirm,
        };
        respond(guard, Ok(self.tasks.bulk_stop_tasks(&request).await))
    }

    #[tool(description = "List tasks waiting to run, with the calls to stop them in bulk")]
    async fn get_waiting_tasks(
        &self,
        #[tool(aggr)] input: ProjectInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("get_waiting_tasks");
        respond(guard, self.tasks.get_waiting_tasks(input.project_id).await)
    }

    #[tool(description = "Get the plain-text log of a task")]
    async fn get_task_raw_output(
        &self,
        #[tool(aggr)] input: TaskInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("get_task_raw_output");
        let result = self
            .tasks
            .get_task_raw_output(input.project_id, input.task_id)
            .await
            .map(|output| {
                json!({
                    "project_id": input.project_id,
                    "task_id": input.task_id,
                    "output": output,
                })
            });
        respond(guard, result)
    }

    #[tool(description = "Get the structured output lines of a task")]
    async fn get_task_output(
        &self,
        #[tool(aggr)] input: TaskInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("get_task_output");
        respond(guard, self.tasks.get_task_output(input.project_id, input.task_id).await)
    }

    #[tool(description = "Get the most recent failed task of a project")]
    async fn get_latest_failed_task(
        &self,
        #[tool(aggr)] input: ProjectInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("get_latest_failed_task");
        respond(guard, self.tasks.get_latest_failed_task(input.project_id).await)
    }

    #[tool(
        description = "Collect the task, template, project and log of a failed task for diagnosis"
    )]
    async fn analyze_task_failure(
        &self,
        #[tool(aggr)] input: TaskInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("analyze_task_failure");
        respond(guard, self.tasks.analyze_task_failure(input.project_id, input.task_id).await)
    }

    #[tool(description = "Look for templates and error patterns shared by recent failures")]
    async fn bulk_analyze_failures(
        &self,
        #[tool(aggr)] input: BulkAnalyzeInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("bulk_analyze_failures");
        let limit = input.limit.unwrap_or(DEFAULT_BULK_ANALYSIS_LIMIT);
        respond(guard, self.tasks.bulk_analyze_failures(input.project_id, limit).await)
    }

    // Environments

    #[tool(description = "List the environments of a project")]
    async fn list_environments(
        &self,
        #[tool(aggr)] input: ProjectInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("list_environments");
        respond(guard, self.resources.list(ResourceKind::Environment, input.project_id).await)
    }

    #[tool(description = "Get an environment by its ID")]
    async fn get_environment(
        &self,
        #[tool(aggr)] input: EnvironmentInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("get_environment");
        respond(
            guard,
            self.resources
                .get(ResourceKind::Environment, input.project_id, input.environment_id)
                .await,
        )
    }

    #[tool(description = "Create an environment from a JSON object of environment fields")]
    async fn create_environment(
        &self,
        #[tool(aggr)] input: CreateResourceInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("create_environment");
        respond(
            guard,
            self.resources.create(ResourceKind::Environment, input.project_id, input.data).await,
        )
    }

    #[tool(description = "Update an environment with a JSON object of environment fields")]
    async fn update_environment(
        &self,
        #[tool(aggr)] input: UpdateEnvironmentInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("update_environment");
        respond(
            guard,
            self.resources
                .update(
                    ResourceKind::Environment,
                    input.project_id,
                    input.environment_id,
                    input.data,
                )
                .await,
        )
    }

    #[tool(description = "Delete an environment by its ID")]
    async fn delete_environment(
        &self,
        #[tool(aggr)] input: EnvironmentInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("delete_environment");
        respond(
            guard,
            self.resources
                .delete(ResourceKind::Environment, input.project_id, input.environment_id)
                .await,
        )
    }

    // Inventory

    #[tool(description = "List the inventories of a project")]
    async fn list_inventory(
        &self,
        #[tool(aggr)] input: ProjectInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("list_inventory");
        respond(guard, self.resources.list(ResourceKind::Inventory, input.project_id).await)
    }

    #[tool(description = "Get an inventory by its ID")]
    async fn get_inventory(
        &self,
        #[tool(aggr)] input: InventoryInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("get_inventory");
        respond(
            guard,
            self.resources.get(ResourceKind::Inventory, input.project_id, input.inventory_id).await,
        )
    }

    #[tool(description = "Create an inventory from a JSON object of inventory fields")]
    async fn create_inventory(
        &self,
        #[tool(aggr)] input: CreateResourceInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("create_inventory");
        respond(
            guard,
            self.resources.create(ResourceKind::Inventory, input.project_id, input.data).await,
        )
    }

    #[tool(description = "Update an inventory with a JSON object of inventory fields")]
    async fn update_inventory(
        &self,
        #[tool(aggr)] input: UpdateInventoryInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("update_inventory");
        respond(
            guard,
            self.resources
                .update(ResourceKind::Inventory, input.project_id, input.inventory_id, input.data)
                .await,
        )
    }

    #[tool(description = "Delete an inventory by its ID")]
    async fn delete_inventory(
        &self,
        #[tool(aggr)] input: InventoryInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("delete_inventory");
        respond(
            guard,
            self.resources
                .delete(ResourceKind::Inventory, input.project_id, input.inventory_id)
                .await,
        )
    }

    // Repositories

    #[tool(description = "List the repositories of a project")]
    async fn list_repositories(
        &self,
        #[tool(aggr)] input: ProjectInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("list_repositories");
        respond(guard, self.resources.list(ResourceKind::Repository, input.project_id).await)
    }

    #[tool(description = "Get a repository by its ID")]
    async fn get_repository(
        &self,
        #[tool(aggr)] input: RepositoryInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("get_repository");
        respond(
            guard,
            self.resources
                .get(ResourceKind::Repository, input.project_id, input.repository_id)
                .await,
        )
    }

    #[tool(description = "Create a repository (git_branch defaults to main)")]
    async fn create_repository(
        &self,
        #[tool(aggr)] input: CreateRepositoryInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("create_repository");
        let repository = NewRepository {
            name: input.name,
            git_url: input.git_url,
            git_branch: input.git_branch,
            ssh_key_id: input.ssh_key_id,
        };
        respond(guard, self.resources.create_repository(input.project_id, &repository).await)
    }

    #[tool(description = "Update some fields of a repository; omitted fields keep their value")]
    async fn update_repository(
        &self,
        #[tool(aggr)] input: UpdateRepositoryInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("update_repository");
        let update = RepositoryUpdate {
            name: input.name,
            git_url: input.git_url,
            git_branch: input.git_branch,
            ssh_key_id: input.ssh_key_id,
        };
        respond(
            guard,
            self.resources.update_repository(input.project_id, input.repository_id, &update).await,
        )
    }

    #[tool(description = "Delete a repository by its ID")]
    async fn delete_repository(
        &self,
        #[tool(aggr)] input: RepositoryInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("delete_repository");
        respond(
            guard,
            self.resources
                .delete(ResourceKind::Repository, input.project_id, input.repository_id)
                .await,
        )
    }

    // Access keys

    #[tool(description = "List the access keys of a project")]
    async fn list_access_keys(
        &self,
        #[tool(aggr)] input: ProjectInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("list_access_keys");
        respond(guard, self.resources.list_access_keys(input.project_id).await)
    }

    #[tool(
        description = "Create an access key of type none, ssh (needs private_key) \
                       or login_password (needs login and password)"
    )]
    async fn create_access_key(
        &self,
        #[tool(aggr)] input: CreateAccessKeyInput,
    ) -> Result<CallToolResult, McpError> {
        let guard = ToolCallGuard::new("create_access_key");
        let result = match AccessKeyType::parse(&input.key_type) {
            Ok(key_type) => {
                let key = NewAccessKey {
                    name: input.name,
                    key_type,
                    login: input.login,
                    password: input.password,
                    private_key: input.private_key,
                };
                self.resources.create_access_key(input.project_id, &key).await
            }
            Err(err) => Err(err),
        };
        respond(guard, result)
    }
}

#[rmcp::tool(tool_box)]
impl rmcp::ServerHandler for SemaphoreServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "semaphore-mcp".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            instructions: Some(INSTRUCTIONS.to_string()),
        }
    }
}
