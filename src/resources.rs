//! Passthrough CRUD over projects, templates and project-scoped resources.
//!
//! Bodies are free-form JSON objects forwarded to the remote. The service
//! checks that they are objects, fills in `project_id` (and `id` on update)
//! when missing, and labels every failure with the action that was being
//! attempted.

use crate::error::{Error, Result, ResultExt};
use crate::gateway::{Gateway, ResourceKind};
use crate::tasks::models::Template;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Branch used when a repository is created without one.
pub const DEFAULT_GIT_BRANCH: &str = "main";

/// Credential kinds accepted by `create_access_key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKeyType {
    /// No credentials, e.g. for public repositories.
    None,
    /// SSH private key.
    Ssh,
    /// Login and password.
    LoginPassword,
}

impl AccessKeyType {
    /// Parse the remote's type name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for any other name.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim() {
            "none" => Ok(Self::None),
            "ssh" => Ok(Self::Ssh),
            "login_password" => Ok(Self::LoginPassword),
            other => Err(Error::InvalidArgument(format!(
                "unknown key_type '{other}', expected one of: none, ssh, login_password"
            ))),
        }
    }

    /// The remote's type name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Ssh => "ssh",
            Self::LoginPassword => "login_password",
        }
    }
}

/// A new access key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccessKey {
    /// Display name.
    pub name: String,
    /// Credential kind.
    pub key_type: AccessKeyType,
    /// Login for `ssh` and `login_password`.
    pub login: Option<String>,
    /// Password for `login_password`.
    pub password: Option<String>,
    /// Private key for `ssh`.
    pub private_key: Option<String>,
}

impl NewAccessKey {
    /// Request body for the remote, after checking the fields the type needs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when a required credential is missing.
    pub fn to_body(&self, project_id: i64) -> Result<Value> {
        let mut body = json!({
            "name": self.name,
            "type": self.key_type.as_str(),
            "project_id": project_id,
        });
        match self.key_type {
            AccessKeyType::None => {}
            AccessKeyType::Ssh => {
                let private_key = self.private_key.as_deref().ok_or_else(|| {
                    Error::InvalidArgument("private_key is required for ssh keys".to_string())
                })?;
                body["ssh"] = json!({
                    "login": self.login.clone().unwrap_or_default(),
                    "private_key": private_key,
                });
            }
            AccessKeyType::LoginPassword => {
                let (Some(login), Some(password)) = (&self.login, &self.password) else {
                    return Err(Error::InvalidArgument(
                        "login and password are required for login_password keys".to_string(),
                    ));
                };
                body["login_password"] = json!({ "login": login, "password": password });
            }
        }
        Ok(body)
    }
}

/// A new repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRepository {
    /// Display name.
    pub name: String,
    /// Clone URL.
    pub git_url: String,
    /// Branch, `main` when absent.
    pub git_branch: Option<String>,
    /// Access key used to clone.
    pub ssh_key_id: i64,
}

/// Fields to change on a repository; absent fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryUpdate {
    /// New name.
    pub name: Option<String>,
    /// New clone URL.
    pub git_url: Option<String>,
    /// New branch.
    pub git_branch: Option<String>,
    /// New access key.
    pub ssh_key_id: Option<i64>,
}

impl RepositoryUpdate {
    fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.git_url.is_none()
            && self.git_branch.is_none()
            && self.ssh_key_id.is_none()
    }

    fn apply(&self, body: &mut Map<String, Value>) {
        if let Some(name) = &self.name {
            body.insert("name".to_string(), json!(name));
        }
        if let Some(git_url) = &self.git_url {
            body.insert("git_url".to_string(), json!(git_url));
        }
        if let Some(git_branch) = &self.git_branch {
            body.insert("git_branch".to_string(), json!(git_branch));
        }
        if let Some(ssh_key_id) = self.ssh_key_id {
            body.insert("ssh_key_id".to_string(), json!(ssh_key_id));
        }
    }
}

/// Wrap a list as `{<key>: [...], "count": n}`.
fn wrap_list<T: Serialize>(key: &str, items: &[T]) -> Result<Value> {
    let mut wrapped = Map::new();
    wrapped.insert(key.to_string(), serde_json::to_value(items)?);
    wrapped.insert("count".to_string(), json!(items.len()));
    Ok(Value::Object(wrapped))
}

/// Require a JSON object body.
fn object_body(body: Value, label: &str) -> Result<Map<String, Value>> {
    match body {
        Value::Object(map) => Ok(map),
        other => Err(Error::InvalidArgument(format!(
            "{label} data must be a JSON object, got {}",
            json_type(&other)
        ))),
    }
}

const fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// `"<label> '<name>'"` when the body carries a name.
fn describe(label: &str, body: &Map<String, Value>) -> String {
    match body.get("name").and_then(Value::as_str) {
        Some(name) => format!("{label} '{name}'"),
        None => label.to_string(),
    }
}

/// Replace an empty remote reply with a confirmation message.
fn or_message(response: Value, message: String) -> Value {
    if response.is_null() {
        json!({ "message": message })
    } else {
        response
    }
}

fn plural(kind: ResourceKind) -> String {
    kind.collection_key().replace('_', " ")
}

/// CRUD operations over a shared gateway.
#[derive(Clone)]
pub struct ResourceService {
    gateway: Arc<dyn Gateway>,
}

impl ResourceService {
    /// Create a service.
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self { gateway }
    }

    // Projects

    /// All projects, wrapped with a count.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote call fails.
    pub async fn list_projects(&self) -> Result<Value> {
        let projects =
            self.gateway.list_projects().await.during(|| "listing projects".to_string())?;
        wrap_list("projects", &projects)
    }

    /// One project.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote call fails.
    pub async fn get_project(&self, project_id: i64) -> Result<Value> {
        self.gateway
            .get_project(project_id)
            .await
            .during(|| format!("getting project {project_id}"))
    }

    /// Create a project.
    ///
    /// # Errors
    ///
    /// Returns an error for a non-object body or if the remote call fails.
    pub async fn create_project(&self, body: Value) -> Result<Value> {
        let body = object_body(body, "project")?;
        let action = format!("creating {}", describe("project", &body));
        let created = self
            .gateway
            .create_project(&Value::Object(body))
            .await
            .during(|| action)?;
        tracing::info!(project_id = created.get("id").and_then(serde_json::Value::as_i64), "project created");
        Ok(created)
    }

    /// Update a project.
    ///
    /// # Errors
    ///
    /// Returns an error for a non-object body or if the remote call fails.
    pub async fn update_project(&self, project_id: i64, body: Value) -> Result<Value> {
        let mut body = object_body(body, "project")?;
        body.entry("id").or_insert(json!(project_id));
        let response = self
            .gateway
            .update_project(project_id, &Value::Object(body))
            .await
            .during(|| format!("updating project {project_id}"))?;
        Ok(or_message(response, format!("Project {project_id} updated")))
    }

    /// Delete a project.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote call fails.
    pub async fn delete_project(&self, project_id: i64) -> Result<Value> {
        self.gateway
            .delete_project(project_id)
            .await
            .during(|| format!("deleting project {project_id}"))?;
        tracing::info!(project_id, "project deleted");
        Ok(json!({ "message": format!("Project {project_id} deleted") }))
    }

    // Templates

    /// Templates of a project, wrapped with a count.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote call fails.
    pub async fn list_templates(&self, project_id: i64) -> Result<Value> {
        let templates = self
            .gateway
            .list_templates(project_id)
            .await
            .during(|| "listing templates".to_string())?;
        wrap_list("templates", &templates)
    }

    /// One template.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote call fails.
    pub async fn get_template(&self, project_id: i64, template_id: i64) -> Result<Template> {
        self.gateway
            .get_template(project_id, template_id)
            .await
            .during(|| format!("getting template {template_id}"))
    }

    /// Create a template.
    ///
    /// # Errors
    ///
    /// Returns an error for a non-object body or if the remote call fails.
    pub async fn create_template(&self, project_id: i64, body: Value) -> Result<Value> {
        self.create(ResourceKind::Template, project_id, body).await
    }

    /// Update a template.
    ///
    /// # Errors
    ///
    /// Returns an error for a non-object body or if the remote call fails.
    pub async fn update_template(
        &self,
        project_id: i64,
        template_id: i64,
        body: Value,
    ) -> Result<Value> {
        self.update(ResourceKind::Template, project_id, template_id, body).await
    }

    /// Delete a template.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote call fails.
    pub async fn delete_template(&self, project_id: i64, template_id: i64) -> Result<Value> {
        self.delete(ResourceKind::Template, project_id, template_id).await
    }

    /// Stop every running task of a template.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote call fails.
    pub async fn stop_all_template_tasks(
        &self,
        project_id: i64,
        template_id: i64,
    ) -> Result<Value> {
        let response = self
            .gateway
            .stop_all_template_tasks(project_id, template_id)
            .await
            .during(|| format!("stopping all tasks of template {template_id}"))?;
        tracing::info!(project_id, template_id, "stop requested for all template tasks");
        Ok(or_message(response, format!("Stop requested for all tasks of template {template_id}")))
    }

    // Generic project resources

    /// Resources of one kind, wrapped with a count under the kind's collection key.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote call fails.
    pub async fn list(&self, kind: ResourceKind, project_id: i64) -> Result<Value> {
        let items = self
            .gateway
            .list_resources(kind, project_id)
            .await
            .during(|| format!("listing {}", plural(kind)))?;
        wrap_list(kind.collection_key(), &items)
    }

    /// One resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote call fails.
    pub async fn get(&self, kind: ResourceKind, project_id: i64, id: i64) -> Result<Value> {
        self.gateway
            .get_resource(kind, project_id, id)
            .await
            .during(|| format!("getting {} {id}", kind.label()))
    }

    /// Create a resource from a JSON object body.
    ///
    /// # Errors
    ///
    /// Returns an error for a non-object body or if the remote call fails.
    pub async fn create(&self, kind: ResourceKind, project_id: i64, body: Value) -> Result<Value> {
        let mut body = object_body(body, kind.label())?;
        body.entry("project_id").or_insert(json!(project_id));
        let action = format!("creating {}", describe(kind.label(), &body));
        let created = self
            .gateway
            .create_resource(kind, project_id, &Value::Object(body))
            .await
            .during(|| action)?;
        tracing::info!(
            project_id,
            kind = kind.label(),
            id = created.get("id").and_then(serde_json::Value::as_i64),
            "resource created"
        );
        Ok(created)
    }

    /// Update a resource from a JSON object body.
    ///
    /// # Errors
    ///
    /// Returns an error for a non-object body or if the remote call fails.
    pub async fn update(
        &self,
        kind: ResourceKind,
        project_id: i64,
        id: i64,
        body: Value,
    ) -> Result<Value> {
        let mut body = object_body(body, kind.label())?;
        body.entry("project_id").or_insert(json!(project_id));
        body.entry("id").or_insert(json!(id));
        let response = self
            .gateway
            .update_resource(kind, project_id, id, &Value::Object(body))
            .await
            .during(|| format!("updating {} {id}", kind.label()))?;
        Ok(or_message(response, format!("Updated {} {id}", kind.label())))
    }

    /// Delete a resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote call fails.
    pub async fn delete(&self, kind: ResourceKind, project_id: i64, id: i64) -> Result<Value> {
        self.gateway
            .delete_resource(kind, project_id, id)
            .await
            .during(|| format!("deleting {} {id}", kind.label()))?;
        tracing::info!(project_id, kind = kind.label(), id, "resource deleted");
        Ok(json!({ "message": format!("Deleted {} {id}", kind.label()) }))
    }

    // Repositories

    /// Create a repository.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote call fails.
    pub async fn create_repository(
        &self,
        project_id: i64,
        repository: &NewRepository,
    ) -> Result<Value> {
        let body = json!({
            "name": repository.name,
            "project_id": project_id,
            "git_url": repository.git_url,
            "git_branch": repository.git_branch.as_deref().unwrap_or(DEFAULT_GIT_BRANCH),
            "ssh_key_id": repository.ssh_key_id,
        });
        self.create(ResourceKind::Repository, project_id, body).await
    }

    /// Change some fields of a repository.
    ///
    /// The current repository is read first so the remote receives a
    /// complete document.
    ///
    /// # Errors
    ///
    /// Returns an error when no field is given or if a remote call fails.
    pub async fn update_repository(
        &self,
        project_id: i64,
        repository_id: i64,
        update: &RepositoryUpdate,
    ) -> Result<Value> {
        if update.is_empty() {
            return Err(Error::InvalidArgument(
                "at least one of name, git_url, git_branch or ssh_key_id is required".to_string(),
            ));
        }
        let current = self.get(ResourceKind::Repository, project_id, repository_id).await?;
        let mut body = match current {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        update.apply(&mut body);
        self.update(ResourceKind::Repository, project_id, repository_id, Value::Object(body)).await
    }

    // Access keys

    /// Access keys of a project.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote call fails.
    pub async fn list_access_keys(&self, project_id: i64) -> Result<Value> {
        self.list(ResourceKind::AccessKey, project_id).await
    }

    /// Create an access key.
    ///
    /// # Errors
    ///
    /// Returns an error when a credential the key type needs is missing, or if
    /// the remote call fails.
    pub async fn create_access_key(&self, project_id: i64, key: &NewAccessKey) -> Result<Value> {
        let body = key.to_body(project_id)?;
        self.create(ResourceKind::AccessKey, project_id, body).await
    }
}
