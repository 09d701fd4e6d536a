//! HTTP implementation of [`Gateway`] for SemaphoreUI.

use super::{Gateway, GatewayError, GatewayResult, NewTask, ResourceKind};
use crate::tasks::models::{Project, Task, Template};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;

/// User agent for API requests.
pub const USER_AGENT: &str = concat!("semaphore-mcp/", env!("CARGO_PKG_VERSION"));

/// Longest error body echoed back in an error message.
const MAX_ERROR_BODY: usize = 500;

/// Authenticated client for the SemaphoreUI v2 REST API.
#[derive(Debug, Clone)]
pub struct SemaphoreClient {
    http: Client,
    /// Base URL ending in `/api`.
    api_url: String,
    token: String,
}

impl SemaphoreClient {
    /// Create a client for the server at `base_url`.
    ///
    /// `base_url` may point at the web root or at `/api`; both work.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str, token: impl Into<String>, timeout: Duration) -> GatewayResult<Self> {
        let http = Client::builder().timeout(timeout).user_agent(USER_AGENT).build()?;
        Ok(Self { http, api_url: normalize_api_url(base_url), token: token.into() })
    }

    /// The normalized API URL.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    /// Send a request and return the body of a successful response.
    async fn execute<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> GatewayResult<String>
    where
        B: Serialize + ?Sized + Sync,
    {
        tracing::debug!(%method, path, "semaphore request");
        let mut request = self
            .http
            .request(method, self.url(path))
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if status.is_success() {
            Ok(text)
        } else {
            tracing::debug!(status = status.as_u16(), path, "semaphore request failed");
            Err(GatewayError::Http {
                status: status.as_u16(),
                message: error_message(status, &text),
            })
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> GatewayResult<T> {
        let text = self.execute::<Value>(Method::GET, path, None).await?;
        serde_json::from_str(&text).map_err(|e| GatewayError::Parse(e.to_string()))
    }

    async fn get_list<T: DeserializeOwned>(&self, path: &str, key: &str) -> GatewayResult<Vec<T>> {
        let value: Value = self.get_json(path).await?;
        decode_list(value, key)
    }

    /// Send a JSON body; an empty success response becomes `Value::Null`.
    async fn send_json<B>(&self, method: Method, path: &str, body: &B) -> GatewayResult<Value>
    where
        B: Serialize + ?Sized + Sync,
    {
        let text = self.execute(method, path, Some(body)).await?;
        parse_optional_json(&text)
    }

    async fn delete(&self, path: &str) -> GatewayResult<()> {
        self.execute::<Value>(Method::DELETE, path, None).await.map(|_| ())
    }
}

/// Make sure the base URL ends in `/api`, without a trailing slash.
pub(crate) fn normalize_api_url(base_url: &str) -> String {
    let trimmed = base_url.trim().trim_end_matches('/');
    if trimmed.ends_with("/api") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/api")
    }
}

fn parse_optional_json(text: &str) -> GatewayResult<Value> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(text).map_err(|e| GatewayError::Parse(e.to_string()))
}

/// Turn either a bare array or an object wrapping the array under `key` into a `Vec`.
///
/// Entries that do not decode are skipped.
pub(crate) fn decode_list<T: DeserializeOwned>(value: Value, key: &str) -> GatewayResult<Vec<T>> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove(key) {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(GatewayError::Parse(format!(
                    "expected a list or an object with a '{key}' list"
                )))
            }
        },
        Value::Null => Vec::new(),
        _ => return Err(GatewayError::Parse(format!("expected a list of {key}"))),
    };

    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                tracing::warn!(collection = key, error = %e, "skipping undecodable entry");
                None
            }
        })
        .collect())
}

/// Pull a readable message out of an error response body.
fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        for key in ["error", "message"] {
            if let Some(Value::String(message)) = map.get(key) {
                return message.clone();
            }
        }
    }
    let body = body.trim();
    if body.is_empty() {
        return status.canonical_reason().unwrap_or("Unknown error").to_string();
    }
    if body.chars().count() > MAX_ERROR_BODY {
        let truncated: String = body.chars().take(MAX_ERROR_BODY).collect();
        format!("{truncated}...")
    } else {
        body.to_string()
    }
}

#[async_trait]
impl Gateway for SemaphoreClient {
    async fn list_projects(&self) -> GatewayResult<Vec<Project>> {
        self.get_list("/projects", "projects").await
    }

    async fn get_project(&self, project_id: i64) -> GatewayResult<Value> {
        self.get_json(&format!("/project/{project_id}")).await
    }

    async fn create_project(&self, body: &Value) -> GatewayResult<Value> {
        self.send_json(Method::POST, "/projects", body).await
    }

    async fn update_project(&self, project_id: i64, body: &Value) -> GatewayResult<Value> {
        self.send_json(Method::PUT, &format!("/project/{project_id}"), body).await
    }

    async fn delete_project(&self, project_id: i64) -> GatewayResult<()> {
        self.delete(&format!("/project/{project_id}")).await
    }

    async fn list_templates(&self, project_id: i64) -> GatewayResult<Vec<Template>> {
        self.get_list(&format!("/project/{project_id}/templates"), "templates").await
    }

    async fn get_template(&self, project_id: i64, template_id: i64) -> GatewayResult<Template> {
        self.get_json(&format!("/project/{project_id}/templates/{template_id}")).await
    }

    async fn stop_all_template_tasks(
        &self,
        project_id: i64,
        template_id: i64,
    ) -> GatewayResult<Value> {
        let path = format!("/project/{project_id}/templates/{template_id}/stop_all_tasks");
        self.send_json(Method::POST, &path, &json!({})).await
    }

    async fn create_task(&self, project_id: i64, task: &NewTask) -> GatewayResult<Task> {
        let created =
            self.send_json(Method::POST, &format!("/project/{project_id}/tasks"), task).await?;
        serde_json::from_value(created).map_err(|e| GatewayError::Parse(e.to_string()))
    }

    async fn get_task(&self, project_id: i64, task_id: i64) -> GatewayResult<Task> {
        self.get_json(&format!("/project/{project_id}/tasks/{task_id}")).await
    }

    async fn list_tasks(&self, project_id: i64) -> GatewayResult<Vec<Task>> {
        self.get_list(&format!("/project/{project_id}/tasks"), "tasks").await
    }

    async fn get_last_tasks(&self, project_id: i64) -> GatewayResult<Vec<Task>> {
        self.get_list(&format!("/project/{project_id}/tasks/last"), "tasks").await
    }

    async fn stop_task(&self, project_id: i64, task_id: i64) -> GatewayResult<Value> {
        let path = format!("/project/{project_id}/tasks/{task_id}/stop");
        self.send_json(Method::POST, &path, &json!({"force": false})).await
    }

    async fn get_task_output(&self, project_id: i64, task_id: i64) -> GatewayResult<Value> {
        self.get_json(&format!("/project/{project_id}/tasks/{task_id}/output")).await
    }

    async fn get_task_raw_output(&self, project_id: i64, task_id: i64) -> GatewayResult<String> {
        let path = format!("/project/{project_id}/tasks/{task_id}/raw_output");
        self.execute::<Value>(Method::GET, &path, None).await
    }

    async fn list_resources(
        &self,
        kind: ResourceKind,
        project_id: i64,
    ) -> GatewayResult<Vec<Value>> {
        let path = format!("/project/{project_id}/{}", kind.path_segment());
        self.get_list(&path, kind.path_segment()).await
    }

    async fn get_resource(
        &self,
        kind: ResourceKind,
        project_id: i64,
        id: i64,
    ) -> GatewayResult<Value> {
        self.get_json(&format!("/project/{project_id}/{}/{id}", kind.path_segment())).await
    }

    async fn create_resource(
        &self,
        kind: ResourceKind,
        project_id: i64,
        body: &Value,
    ) -> GatewayResult<Value> {
        let path = format!("/project/{project_id}/{}", kind.path_segment());
        self.send_json(Method::POST, &path, body).await
    }

    async fn update_resource(
        &self,
        kind: ResourceKind,
        project_id: i64,
        id: i64,
        body: &Value,
    ) -> GatewayResult<Value> {
        let path = format!("/project/{project_id}/{}/{id}", kind.path_segment());
        self.send_json(Method::PUT, &path, body).await
    }

    async fn delete_resource(
        &self,
        kind: ResourceKind,
        project_id: i64,
        id: i64,
    ) -> GatewayResult<()> {
        self.delete(&format!("/project/{project_id}/{}/{id}", kind.path_segment())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_api_url() {
        assert_eq!(normalize_api_url("http://localhost:3000"), "http://localhost:3000/api");
        assert_eq!(normalize_api_url("http://localhost:3000/"), "http://localhost:3000/api");
        assert_eq!(normalize_api_url("http://localhost:3000/api/"), "http://localhost:3000/api");
        assert_eq!(normalize_api_url("https://ci.example.com/api"), "https://ci.example.com/api");
    }

    #[test]
    fn test_client_uses_normalized_url() {
        let client =
            SemaphoreClient::new("http://localhost:3000/", "token", Duration::from_secs(5))
                .unwrap();
        assert_eq!(client.api_url(), "http://localhost:3000/api");
        assert_eq!(client.url("/projects"), "http://localhost:3000/api/projects");
    }

    #[test]
    fn test_decode_list_accepts_bare_array() {
        let tasks: Vec<Task> =
            decode_list(json!([{"id": 1, "status": "success"}, {"id": 2}]), "tasks").unwrap();
        assert_eq!(tasks.len(), 2);
    }

    #[test]
    fn test_decode_list_accepts_wrapper_object() {
        let tasks: Vec<Task> =
            decode_list(json!({"tasks": [{"id": 1, "status": "error"}], "total": 1}), "tasks")
                .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, 1);
    }

    #[test]
    fn test_decode_list_skips_bad_entries() {
        let tasks: Vec<Task> =
            decode_list(json!([{"id": 1}, "garbage", {"no_id": true}]), "tasks").unwrap();
        assert_eq!(tasks.len(), 1);
    }

    #[test]
    fn test_decode_list_rejects_other_shapes() {
        let result: GatewayResult<Vec<Task>> = decode_list(json!({"items": []}), "tasks");
        assert!(matches!(result, Err(GatewayError::Parse(_))));
        let result: GatewayResult<Vec<Task>> = decode_list(json!(42), "tasks");
        assert!(matches!(result, Err(GatewayError::Parse(_))));
    }

    #[test]
    fn test_decode_list_null_is_empty() {
        let tasks: Vec<Task> = decode_list(Value::Null, "tasks").unwrap();
        assert!(tasks.is_empty());
    }

    #[test]
    fn test_error_message_prefers_api_field() {
        let msg = error_message(StatusCode::BAD_REQUEST, r#"{"error": "Invalid environment"}"#);
        assert_eq!(msg, "Invalid environment");
        let msg = error_message(StatusCode::BAD_REQUEST, r#"{"message": "nope"}"#);
        assert_eq!(msg, "nope");
    }

    #[test]
    fn test_error_message_falls_back_to_reason_or_body() {
        assert_eq!(error_message(StatusCode::NOT_FOUND, ""), "Not Found");
        assert_eq!(error_message(StatusCode::BAD_GATEWAY, "upstream down"), "upstream down");
        let long = "x".repeat(MAX_ERROR_BODY + 20);
        let msg = error_message(StatusCode::INTERNAL_SERVER_ERROR, &long);
        assert!(msg.ends_with("..."));
        assert_eq!(msg.len(), MAX_ERROR_BODY + 3);
    }

    #[test]
    fn test_parse_optional_json() {
        assert_eq!(parse_optional_json("").unwrap(), Value::Null);
        assert_eq!(parse_optional_json("{\"id\": 3}").unwrap(), json!({"id": 3}));
        assert!(parse_optional_json("not json").is_err());
    }
}
