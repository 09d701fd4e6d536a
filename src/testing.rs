//! Testing utilities and mock implementations.
//!
//! These types are provided for use in tests. They may appear unused in
//! the library itself but are consumed by unit and integration tests.

#![allow(dead_code)]

use crate::gateway::{Gateway, GatewayError, GatewayResult, NewTask, ResourceKind};
use crate::tasks::models::{Project, Task, TaskStatus, Template};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Timestamp given to tasks created through the mock.
pub const MOCK_CREATED_AT: &str = "2024-06-01T12:00:00Z";

/// First id handed out by [`MockGateway::create_task`].
const FIRST_TASK_ID: i64 = 1000;

/// An in-memory gateway for testing.
///
/// Holds projects, templates and tasks keyed by project, replays scripted
/// `get_task` responses, and counts every call by operation name.
#[derive(Debug, Default)]
pub struct MockGateway {
    state: Mutex<MockState>,
}

#[derive(Debug, Default)]
struct MockState {
    projects: Vec<Project>,
    templates: HashMap<i64, Vec<Template>>,
    tasks: HashMap<i64, Vec<Task>>,
    last_tasks: HashMap<i64, Vec<Task>>,
    raw_outputs: HashMap<i64, String>,
    outputs: HashMap<i64, Value>,
    resources: HashMap<(ResourceKind, i64), Vec<Value>>,
    task_script: VecDeque<GatewayResult<Task>>,
    get_task_error: Option<GatewayError>,
    create_task_error: Option<GatewayError>,
    list_tasks_error: Option<GatewayError>,
    last_tasks_error: Option<GatewayError>,
    list_projects_error: Option<GatewayError>,
    resources_error: Option<GatewayError>,
    latency: Option<Duration>,
    failing_templates: HashSet<i64>,
    failing_stops: HashSet<i64>,
    created_tasks: Vec<(i64, NewTask)>,
    stopped_tasks: Vec<i64>,
    calls: HashMap<&'static str, usize>,
    next_task_id: Option<i64>,
}

impl MockGateway {
    /// Create an empty mock gateway.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, operation: &'static str) -> MutexGuard<'_, MockState> {
        let mut state = self.state();
        *state.calls.entry(operation).or_insert(0) += 1;
        state
    }

    /// Count a call, then wait out the configured latency.
    async fn record_slow(&self, operation: &'static str) {
        let latency = self.record(operation).latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn resources_error(&self) -> GatewayResult<()> {
        self.state().resources_error.clone().map_or(Ok(()), Err)
    }

    /// Add a project.
    #[must_use]
    pub fn with_project(self, id: i64, name: &str) -> Self {
        self.state().projects.push(Project::new(id, name));
        self
    }

    /// Add a template to a project.
    #[must_use]
    pub fn with_template(self, project_id: i64, id: i64, name: &str) -> Self {
        let mut template = Template::new(id, name);
        template.project_id = Some(project_id);
        self.state().templates.entry(project_id).or_default().push(template);
        self
    }

    /// Set the full task list of a project.
    #[must_use]
    pub fn with_tasks(self, project_id: i64, tasks: Vec<Task>) -> Self {
        self.state().tasks.insert(project_id, tasks);
        self
    }

    /// Set what the "last tasks" endpoint returns for a project.
    #[must_use]
    pub fn with_last_tasks(self, project_id: i64, tasks: Vec<Task>) -> Self {
        self.state().last_tasks.insert(project_id, tasks);
        self
    }

    /// Set the raw log of a task.
    #[must_use]
    pub fn with_raw_output(self, task_id: i64, output: &str) -> Self {
        self.state().raw_outputs.insert(task_id, output.to_string());
        self
    }

    /// Set the structured output of a task.
    #[must_use]
    pub fn with_output(self, task_id: i64, output: Value) -> Self {
        self.state().outputs.insert(task_id, output);
        self
    }

    /// Seed resources of one kind for a project.
    #[must_use]
    pub fn with_resources(self, kind: ResourceKind, project_id: i64, items: Vec<Value>) -> Self {
        self.state().resources.insert((kind, project_id), items);
        self
    }

    /// Queue responses returned by successive `get_task` calls.
    ///
    /// Once the script runs out, `get_task` falls back to the stored tasks.
    #[must_use]
    pub fn script_get_task(self, responses: Vec<GatewayResult<Task>>) -> Self {
        self.state().task_script.extend(responses);
        self
    }

    /// Make every unscripted `get_task` call fail.
    #[must_use]
    pub fn fail_get_task(self, error: GatewayError) -> Self {
        self.state().get_task_error = Some(error);
        self
    }

    /// Make `create_task` fail.
    #[must_use]
    pub fn fail_create_task(self, error: GatewayError) -> Self {
        self.state().create_task_error = Some(error);
        self
    }

    /// Make `list_tasks` fail.
    #[must_use]
    pub fn fail_list_tasks(self, error: GatewayError) -> Self {
        self.state().list_tasks_error = Some(error);
        self
    }

    /// Make `get_last_tasks` fail.
    #[must_use]
    pub fn fail_last_tasks(self, error: GatewayError) -> Self {
        self.state().last_tasks_error = Some(error);
        self
    }

    /// Make `get_template` fail for one template.
    #[must_use]
    pub fn fail_template(self, template_id: i64) -> Self {
        self.state().failing_templates.insert(template_id);
        self
    }

    /// Make `list_projects` fail.
    #[must_use]
    pub fn fail_list_projects(self, error: GatewayError) -> Self {
        self.state().list_projects_error = Some(error);
        self
    }

    /// Make every project-scoped resource operation fail.
    #[must_use]
    pub fn fail_resources(self, error: GatewayError) -> Self {
        self.state().resources_error = Some(error);
        self
    }

    /// Delay every `get_task` and `list_tasks` answer.
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state().latency = Some(latency);
        self
    }

    /// Make `stop_task` fail for one task.
    #[must_use]
    pub fn fail_stop(self, task_id: i64) -> Self {
        self.state().failing_stops.insert(task_id);
        self
    }

    /// Number of calls made to one operation.
    pub fn calls(&self, operation: &str) -> usize {
        self.state().calls.get(operation).copied().unwrap_or(0)
    }

    /// Number of calls made to any operation.
    pub fn total_calls(&self) -> usize {
        self.state().calls.values().sum()
    }

    /// Launch requests received, with their project id.
    pub fn created_tasks(&self) -> Vec<(i64, NewTask)> {
        self.state().created_tasks.clone()
    }

    /// Ids passed to `stop_task`, in call order.
    pub fn stopped_tasks(&self) -> Vec<i64> {
        self.state().stopped_tasks.clone()
    }
}

fn find_resource(items: &[Value], id: i64) -> Option<usize> {
    items.iter().position(|item| item.get("id").and_then(Value::as_i64) == Some(id))
}

#[async_trait]
impl Gateway for MockGateway {
    async fn list_projects(&self) -> GatewayResult<Vec<Project>> {
        let state = self.record("list_projects");
        match &state.list_projects_error {
            Some(err) => Err(err.clone()),
            None => Ok(state.projects.clone()),
        }
    }

    async fn get_project(&self, project_id: i64) -> GatewayResult<Value> {
        let state = self.record("get_project");
        state
            .projects
            .iter()
            .find(|p| p.id == project_id)
            .map(|p| json!({"id": p.id, "name": p.name}))
            .ok_or_else(|| GatewayError::not_found("Project not found"))
    }

    async fn create_project(&self, body: &Value) -> GatewayResult<Value> {
        let mut state = self.record("create_project");
        let id = i64::try_from(state.projects.len()).unwrap_or(0) + 1;
        let name = body.get("name").and_then(Value::as_str).unwrap_or_default();
        state.projects.push(Project::new(id, name));
        let mut created = body.clone();
        created["id"] = json!(id);
        Ok(created)
    }

    async fn update_project(&self, project_id: i64, _body: &Value) -> GatewayResult<Value> {
        let state = self.record("update_project");
        if state.projects.iter().any(|p| p.id == project_id) {
            Ok(Value::Null)
        } else {
            Err(GatewayError::not_found("Project not found"))
        }
    }

    async fn delete_project(&self, project_id: i64) -> GatewayResult<()> {
        let mut state = self.record("delete_project");
        let before = state.projects.len();
        state.projects.retain(|p| p.id != project_id);
        if state.projects.len() == before {
            Err(GatewayError::not_found("Project not found"))
        } else {
            Ok(())
        }
    }

    async fn list_templates(&self, project_id: i64) -> GatewayResult<Vec<Template>> {
        Ok(self.record("list_templates").templates.get(&project_id).cloned().unwrap_or_default())
    }

    async fn get_template(&self, project_id: i64, template_id: i64) -> GatewayResult<Template> {
        let state = self.record("get_template");
        if state.failing_templates.contains(&template_id) {
            return Err(GatewayError::Http {
                status: 500,
                message: "template lookup failed".to_string(),
            });
        }
        state
            .templates
            .get(&project_id)
            .and_then(|templates| templates.iter().find(|t| t.id == template_id))
            .cloned()
            .ok_or_else(|| GatewayError::not_found("Template not found"))
    }

    async fn stop_all_template_tasks(
        &self,
        _project_id: i64,
        _template_id: i64,
    ) -> GatewayResult<Value> {
        let _state = self.record("stop_all_template_tasks");
        Ok(Value::Null)
    }

    async fn create_task(&self, project_id: i64, task: &NewTask) -> GatewayResult<Task> {
        let mut state = self.record("create_task");
        if let Some(err) = &state.create_task_error {
            return Err(err.clone());
        }
        let id = state.next_task_id.unwrap_or(FIRST_TASK_ID);
        state.next_task_id = Some(id + 1);
        let created = Task::new(id, TaskStatus::Waiting)
            .with_project(project_id)
            .with_template(task.template_id)
            .with_created(MOCK_CREATED_AT);
        state.tasks.entry(project_id).or_default().push(created.clone());
        state.created_tasks.push((project_id, task.clone()));
        Ok(created)
    }

    async fn get_task(&self, project_id: i64, task_id: i64) -> GatewayResult<Task> {
        self.record_slow("get_task").await;
        let mut state = self.state();
        if let Some(scripted) = state.task_script.pop_front() {
            return scripted;
        }
        if let Some(err) = &state.get_task_error {
            return Err(err.clone());
        }
        state
            .tasks
            .get(&project_id)
            .and_then(|tasks| tasks.iter().find(|t| t.id == task_id))
            .cloned()
            .ok_or_else(|| GatewayError::not_found("Task not found"))
    }

    async fn list_tasks(&self, project_id: i64) -> GatewayResult<Vec<Task>> {
        self.record_slow("list_tasks").await;
        let state = self.state();
        if let Some(err) = &state.list_tasks_error {
            return Err(err.clone());
        }
        Ok(state.tasks.get(&project_id).cloned().unwrap_or_default())
    }

    async fn get_last_tasks(&self, project_id: i64) -> GatewayResult<Vec<Task>> {
        let state = self.record("get_last_tasks");
        if let Some(err) = &state.last_tasks_error {
            return Err(err.clone());
        }
        Ok(state
            .last_tasks
            .get(&project_id)
            .or_else(|| state.tasks.get(&project_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn stop_task(&self, _project_id: i64, task_id: i64) -> GatewayResult<Value> {
        let mut state = self.record("stop_task");
        state.stopped_tasks.push(task_id);
        if state.failing_stops.contains(&task_id) {
            return Err(GatewayError::Http {
                status: 400,
                message: "Task is not running".to_string(),
            });
        }
        Ok(Value::Null)
    }

    async fn get_task_output(&self, _project_id: i64, task_id: i64) -> GatewayResult<Value> {
        let state = self.record("get_task_output");
        Ok(state.outputs.get(&task_id).cloned().unwrap_or_else(|| json!([])))
    }

    async fn get_task_raw_output(&self, _project_id: i64, task_id: i64) -> GatewayResult<String> {
        let state = self.record("get_task_raw_output");
        state
            .raw_outputs
            .get(&task_id)
            .cloned()
            .ok_or_else(|| GatewayError::not_found("Output not found"))
    }

    async fn list_resources(
        &self,
        kind: ResourceKind,
        project_id: i64,
    ) -> GatewayResult<Vec<Value>> {
        self.resources_error()?;
        let state = self.record("list_resources");
        Ok(state.resources.get(&(kind, project_id)).cloned().unwrap_or_default())
    }

    async fn get_resource(
        &self,
        kind: ResourceKind,
        project_id: i64,
        id: i64,
    ) -> GatewayResult<Value> {
        self.resources_error()?;
        let state = self.record("get_resource");
        state
            .resources
            .get(&(kind, project_id))
            .and_then(|items| find_resource(items, id).map(|index| items[index].clone()))
            .ok_or_else(|| GatewayError::not_found("Resource not found"))
    }

    async fn create_resource(
        &self,
        kind: ResourceKind,
        project_id: i64,
        body: &Value,
    ) -> GatewayResult<Value> {
        self.resources_error()?;
        let mut state = self.record("create_resource");
        let items = state.resources.entry((kind, project_id)).or_default();
        let id = i64::try_from(items.len()).unwrap_or(0) + 1;
        let mut created = body.clone();
        created["id"] = json!(id);
        items.push(created.clone());
        Ok(created)
    }

    async fn update_resource(
        &self,
        kind: ResourceKind,
        project_id: i64,
        id: i64,
        body: &Value,
    ) -> GatewayResult<Value> {
        self.resources_error()?;
        let mut state = self.record("update_resource");
        let items = state.resources.entry((kind, project_id)).or_default();
        let index =
            find_resource(items, id).ok_or_else(|| GatewayError::not_found("Resource not found"))?;
        items[index] = body.clone();
        Ok(Value::Null)
    }

    async fn delete_resource(
        &self,
        kind: ResourceKind,
        project_id: i64,
        id: i64,
    ) -> GatewayResult<()> {
        self.resources_error()?;
        let mut state = self.record("delete_resource");
        let items = state.resources.entry((kind, project_id)).or_default();
        let index =
            find_resource(items, id).ok_or_else(|| GatewayError::not_found("Resource not found"))?;
        items.remove(index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_counts_calls() {
        let gateway = MockGateway::new().with_project(1, "Alpha");
        gateway.list_projects().await.unwrap();
        gateway.list_projects().await.unwrap();
        assert_eq!(gateway.calls("list_projects"), 2);
        assert_eq!(gateway.calls("get_task"), 0);
        assert_eq!(gateway.total_calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_get_task_script_then_fallback() {
        let gateway = MockGateway::new()
            .with_tasks(1, vec![Task::new(5, TaskStatus::Success)])
            .script_get_task(vec![Err(GatewayError::not_found("Task not found"))]);

        assert!(gateway.get_task(1, 5).await.unwrap_err().is_not_found());
        assert_eq!(gateway.get_task(1, 5).await.unwrap().status, TaskStatus::Success);
    }

    #[tokio::test]
    async fn test_mock_created_task_is_retrievable() {
        let gateway = MockGateway::new();
        let new_task = NewTask { template_id: 9, ..NewTask::default() };
        let created = gateway.create_task(3, &new_task).await.unwrap();
        assert_eq!(created.id, FIRST_TASK_ID);
        let fetched = gateway.get_task(3, created.id).await.unwrap();
        assert_eq!(fetched.template_id, Some(9));
        assert_eq!(gateway.created_tasks().len(), 1);
    }

    #[tokio::test]
    async fn test_mock_stop_failures_are_recorded() {
        let gateway = MockGateway::new().fail_stop(2);
        assert!(gateway.stop_task(1, 1).await.is_ok());
        assert!(gateway.stop_task(1, 2).await.is_err());
        assert_eq!(gateway.stopped_tasks(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_mock_resource_crud() {
        let gateway = MockGateway::new();
        let created = gateway
            .create_resource(ResourceKind::Environment, 1, &json!({"name": "prod"}))
            .await
            .unwrap();
        assert_eq!(created["id"], json!(1));
        let fetched = gateway.get_resource(ResourceKind::Environment, 1, 1).await.unwrap();
        assert_eq!(fetched["name"], json!("prod"));
        gateway.delete_resource(ResourceKind::Environment, 1, 1).await.unwrap();
        assert!(gateway.get_resource(ResourceKind::Environment, 1, 1).await.is_err());
    }
}
