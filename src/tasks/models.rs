//! Remote data types read through the gateway.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Reverse;

/// Status of a task run on the remote platform.
///
/// Transient states the remote reports but this crate does not reason about
/// (`starting`, `stopping`, ...) are kept verbatim in [`TaskStatus::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskStatus {
    /// Queued, not yet picked up by a runner.
    Waiting,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Success,
    /// Finished with a failure.
    Error,
    /// Stopped by a user.
    Stopped,
    /// Any other remote status string.
    Other(String),
}

/// Status strings the remote platform emits besides the core five.
const TRANSIENT_STATUSES: &[&str] =
    &["starting", "stopping", "confirmed", "rejected", "waiting_confirmation"];

impl TaskStatus {
    /// Get the remote string representation of the status.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
            Self::Stopped => "stopped",
            Self::Other(s) => s,
        }
    }

    /// Whether the task will not change state any further.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Stopped)
    }

    /// Resolve a literal status or a human alias such as `successful` or `failed`.
    ///
    /// # Errors
    ///
    /// Returns an error if the input names no known status.
    pub fn from_alias(input: &str) -> Result<Self, InvalidStatus> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "waiting" | "queued" | "pending" => Ok(Self::Waiting),
            "running" | "in_progress" => Ok(Self::Running),
            "success" | "successful" | "succeeded" | "passed" => Ok(Self::Success),
            "error" | "failed" | "failure" => Ok(Self::Error),
            "stopped" | "cancelled" | "canceled" => Ok(Self::Stopped),
            other if TRANSIENT_STATUSES.contains(&other) => Ok(Self::Other(normalized)),
            _ => Err(InvalidStatus(input.to_string())),
        }
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Other("unknown".to_string())
    }
}

impl From<String> for TaskStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "waiting" => Self::Waiting,
            "running" => Self::Running,
            "success" => Self::Success,
            "error" => Self::Error,
            "stopped" => Self::Stopped,
            _ => Self::Other(value),
        }
    }
}

impl From<TaskStatus> for String {
    fn from(value: TaskStatus) -> Self {
        match value {
            TaskStatus::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error when a status filter names no known status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidStatus(pub String);

impl std::fmt::Display for InvalidStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid status: '{}' (use one of: waiting, running, success, error, stopped, \
             or an alias like successful, failed)",
            self.0
        )
    }
}

impl std::error::Error for InvalidStatus {}

/// One execution of a template.
///
/// Fields this crate does not interpret are kept in `extra` so they reach the
/// caller unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task id, unique within its project.
    pub id: i64,
    /// Owning project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<i64>,
    /// Current status.
    #[serde(default)]
    pub status: TaskStatus,
    /// Creation timestamp as reported by the remote.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    /// Template this task runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<i64>,
    /// When the runner started the task.
    #[serde(default, alias = "started", skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    /// When the task finished.
    #[serde(default, alias = "ended", skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    /// Free-form message attached at launch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Extra environment passed at launch (object or JSON-encoded string).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Value>,
    /// Remaining remote fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Task {
    /// Create a task with only an id and status set.
    #[must_use]
    pub fn new(id: i64, status: TaskStatus) -> Self {
        Self {
            id,
            project_id: None,
            status,
            created: None,
            template_id: None,
            start: None,
            end: None,
            message: None,
            environment: None,
            extra: Map::new(),
        }
    }

    /// Set the creation timestamp.
    #[must_use]
    pub fn with_created(mut self, created: &str) -> Self {
        self.created = Some(created.to_string());
        self
    }

    /// Set the template id.
    #[must_use]
    pub const fn with_template(mut self, template_id: i64) -> Self {
        self.template_id = Some(template_id);
        self
    }

    /// Set the project id.
    #[must_use]
    pub const fn with_project(mut self, project_id: i64) -> Self {
        self.project_id = Some(project_id);
        self
    }

    /// The creation timestamp, if it parses.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created.as_deref().and_then(parse_timestamp)
    }
}

/// Parse a remote timestamp in any of the formats the platform has used.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Sort tasks newest first by creation time.
///
/// Parseable timestamps come before unparseable ones; the latter fall back to
/// raw string order. The sort is stable, so ties keep their input order.
pub fn sort_newest_first(tasks: &mut [Task]) {
    tasks.sort_by_cached_key(|task| {
        let parsed = task.created_at();
        (parsed.is_none(), Reverse(parsed), Reverse(task.created.clone()))
    });
}

/// A job definition on the remote platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    /// Template id.
    pub id: i64,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Owning project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<i64>,
    /// Playbook path inside the repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playbook: Option<String>,
    /// Human description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Default CLI arguments (JSON-encoded list).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    /// Remaining remote fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Template {
    /// Create a template with an id and a name.
    #[must_use]
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            project_id: None,
            playbook: None,
            description: None,
            arguments: None,
            extra: Map::new(),
        }
    }
}

/// A project on the remote platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Project id.
    pub id: i64,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Remaining remote fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Project {
    /// Create a project with an id and a name.
    #[must_use]
    pub fn new(id: i64, name: &str) -> Self {
        Self { id, name: name.to_string(), extra: Map::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_round_trips_through_strings() {
        let status: TaskStatus = serde_json::from_value(json!("error")).unwrap();
        assert_eq!(status, TaskStatus::Error);
        let other: TaskStatus = serde_json::from_value(json!("starting")).unwrap();
        assert_eq!(other, TaskStatus::Other("starting".to_string()));
        assert_eq!(serde_json::to_value(&other).unwrap(), json!("starting"));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Success.is_terminal());
        assert!(TaskStatus::Error.is_terminal());
        assert!(TaskStatus::Stopped.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Waiting.is_terminal());
        assert!(!TaskStatus::Other("starting".to_string()).is_terminal());
    }

    #[test]
    fn test_from_alias() {
        assert_eq!(TaskStatus::from_alias("successful").unwrap(), TaskStatus::Success);
        assert_eq!(TaskStatus::from_alias("Failed").unwrap(), TaskStatus::Error);
        assert_eq!(TaskStatus::from_alias("error").unwrap(), TaskStatus::Error);
        assert_eq!(TaskStatus::from_alias(" queued ").unwrap(), TaskStatus::Waiting);
        assert_eq!(TaskStatus::from_alias("canceled").unwrap(), TaskStatus::Stopped);
        assert_eq!(
            TaskStatus::from_alias("starting").unwrap(),
            TaskStatus::Other("starting".to_string())
        );
    }

    #[test]
    fn test_from_alias_rejects_unknown() {
        let err = TaskStatus::from_alias("exploded").unwrap_err();
        assert!(err.to_string().contains("'exploded'"));
    }

    #[test]
    fn test_task_keeps_unknown_fields() {
        let task: Task = serde_json::from_value(json!({
            "id": 7,
            "status": "running",
            "created": "2024-01-01T10:00:00Z",
            "user_id": 3,
        }))
        .unwrap();
        assert_eq!(task.id, 7);
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.extra.get("user_id"), Some(&json!(3)));

        let back = serde_json::to_value(&task).unwrap();
        assert_eq!(back["user_id"], json!(3));
        assert!(back.get("message").is_none());
    }

    #[test]
    fn test_task_without_status_defaults_to_unknown() {
        let task: Task = serde_json::from_value(json!({"id": 1})).unwrap();
        assert_eq!(task.status.as_str(), "unknown");
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp("2024-03-01T12:00:00Z").is_some());
        assert!(parse_timestamp("2024-03-01T12:00:00.123456Z").is_some());
        assert!(parse_timestamp("2024-03-01T12:00:00+02:00").is_some());
        assert!(parse_timestamp("2024-03-01T12:00:00").is_some());
        assert!(parse_timestamp("2024-03-01 12:00:00").is_some());
        assert!(parse_timestamp("2024-03-01").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_sort_uses_parsed_time_not_string_order() {
        // Lexicographic order would put the +02:00 value first.
        let mut tasks = vec![
            Task::new(1, TaskStatus::Success).with_created("2024-03-01T13:30:00+02:00"),
            Task::new(2, TaskStatus::Success).with_created("2024-03-01T12:00:00Z"),
        ];
        sort_newest_first(&mut tasks);
        assert_eq!(tasks[0].id, 2);
    }

    #[test]
    fn test_sort_is_stable_and_puts_unparseable_last() {
        let mut tasks = vec![
            Task::new(1, TaskStatus::Success),
            Task::new(2, TaskStatus::Success).with_created("2024-01-01T00:00:00Z"),
            Task::new(3, TaskStatus::Success).with_created("2024-01-02T00:00:00Z"),
            Task::new(4, TaskStatus::Success).with_created("2024-01-01T00:00:00Z"),
        ];
        sort_newest_first(&mut tasks);
        let ids: Vec<i64> = tasks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![3, 2, 4, 1]);
    }
}
