//! Access to the SemaphoreUI REST API.
//!
//! [`Gateway`] is the seam every tool operation goes through. The production
//! implementation is [`SemaphoreClient`]; tests use
//! [`crate::testing::MockGateway`].

mod client;

pub use client::{SemaphoreClient, USER_AGENT};

use crate::tasks::models::{Project, Task, Template};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

/// Failures reported by a gateway call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The remote answered with a non-success HTTP status.
    #[error("HTTP error {status}: {message}")]
    Http {
        /// Numeric HTTP status code.
        status: u16,
        /// Message extracted from the response body.
        message: String,
    },

    /// The request never got a response (refused, DNS, timeout).
    #[error("Connection error: {0}")]
    Connection(String),

    /// The response body could not be decoded.
    #[error("Failed to parse response: {0}")]
    Parse(String),
}

impl GatewayError {
    /// The HTTP status code, if the remote answered at all.
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the remote reported the resource as missing.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Http { status: 404, .. })
    }

    /// Shorthand for a 404 with the given message.
    #[must_use]
    pub fn not_found(message: &str) -> Self {
        Self::Http { status: 404, message: message.to_string() }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Parse(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Http { status: status.as_u16(), message: err.to_string() }
        } else {
            Self::Connection(err.to_string())
        }
    }
}

/// Result of a gateway call.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Project-scoped resources handled as opaque JSON documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Task templates.
    Template,
    /// Environment variable sets.
    Environment,
    /// Host inventories.
    Inventory,
    /// Git repositories.
    Repository,
    /// Credentials.
    AccessKey,
}

impl ResourceKind {
    /// Path segment under `/project/{id}/`.
    pub const fn path_segment(self) -> &'static str {
        match self {
            Self::Template => "templates",
            Self::Environment => "environment",
            Self::Inventory => "inventory",
            Self::Repository => "repositories",
            Self::AccessKey => "keys",
        }
    }

    /// Key used when returning a list of this resource.
    pub const fn collection_key(self) -> &'static str {
        match self {
            Self::Template => "templates",
            Self::Environment => "environments",
            Self::Inventory => "inventory",
            Self::Repository => "repositories",
            Self::AccessKey => "access_keys",
        }
    }

    /// Singular label used in action-scoped error messages.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Template => "template",
            Self::Environment => "environment",
            Self::Inventory => "inventory",
            Self::Repository => "repository",
            Self::AccessKey => "access key",
        }
    }
}

/// Parameters for launching a task.
///
/// Every field other than `template_id` is optional; absent fields are left
/// out of the request so the remote applies its defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NewTask {
    /// Template to run.
    pub template_id: i64,
    /// Extra environment variables, sent JSON-encoded.
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "encode_environment")]
    pub environment: Option<Map<String, Value>>,
    /// Host limit pattern.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<String>,
    /// Run in check mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    /// Show diffs of changed files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<bool>,
    /// Verbose runner output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,
    /// Playbook override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playbook: Option<String>,
    /// Git branch override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    /// Message shown in the task history.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Extra CLI arguments (JSON-encoded list).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    /// Inventory override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inventory_id: Option<i64>,
}

#[allow(clippy::ref_option)] // serde passes the field by reference
fn encode_environment<S>(
    environment: &Option<Map<String, Value>>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match environment {
        Some(env) => {
            let encoded = serde_json::to_string(env).map_err(serde::ser::Error::custom)?;
            serializer.serialize_str(&encoded)
        }
        None => serializer.serialize_none(),
    }
}

/// Operations on the remote automation platform.
///
/// List calls always return a single canonical `Vec`, whatever envelope the
/// remote used.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// List all projects visible to the token.
    async fn list_projects(&self) -> GatewayResult<Vec<Project>>;

    /// Fetch one project as raw JSON.
    async fn get_project(&self, project_id: i64) -> GatewayResult<Value>;

    /// Create a project.
    async fn create_project(&self, body: &Value) -> GatewayResult<Value>;

    /// Replace a project's settings.
    async fn update_project(&self, project_id: i64, body: &Value) -> GatewayResult<Value>;

    /// Delete a project.
    async fn delete_project(&self, project_id: i64) -> GatewayResult<()>;

    /// List templates of a project.
    async fn list_templates(&self, project_id: i64) -> GatewayResult<Vec<Template>>;

    /// Fetch one template.
    async fn get_template(&self, project_id: i64, template_id: i64) -> GatewayResult<Template>;

    /// Stop every running task of a template.
    async fn stop_all_template_tasks(
        &self,
        project_id: i64,
        template_id: i64,
    ) -> GatewayResult<Value>;

    /// Launch a task.
    async fn create_task(&self, project_id: i64, task: &NewTask) -> GatewayResult<Task>;

    /// Fetch one task.
    async fn get_task(&self, project_id: i64, task_id: i64) -> GatewayResult<Task>;

    /// List every task of a project.
    async fn list_tasks(&self, project_id: i64) -> GatewayResult<Vec<Task>>;

    /// List the most recent tasks of a project (cheaper, may be incomplete).
    async fn get_last_tasks(&self, project_id: i64) -> GatewayResult<Vec<Task>>;

    /// Request that a task stop.
    async fn stop_task(&self, project_id: i64, task_id: i64) -> GatewayResult<Value>;

    /// Fetch structured output lines of a task.
    async fn get_task_output(&self, project_id: i64, task_id: i64) -> GatewayResult<Value>;

    /// Fetch the plain-text log of a task.
    async fn get_task_raw_output(&self, project_id: i64, task_id: i64) -> GatewayResult<String>;

    /// List resources of one kind.
    async fn list_resources(&self, kind: ResourceKind, project_id: i64)
        -> GatewayResult<Vec<Value>>;

    /// Fetch one resource.
    async fn get_resource(&self, kind: ResourceKind, project_id: i64, id: i64)
        -> GatewayResult<Value>;

    /// Create a resource.
    async fn create_resource(
        &self,
        kind: ResourceKind,
        project_id: i64,
        body: &Value,
    ) -> GatewayResult<Value>;

    /// Replace a resource.
    async fn update_resource(
        &self,
        kind: ResourceKind,
        project_id: i64,
        id: i64,
        body: &Value,
    ) -> GatewayResult<Value>;

    /// Delete a resource.
    async fn delete_resource(&self, kind: ResourceKind, project_id: i64, id: i64)
        -> GatewayResult<()>;
}
