use std::path::Path;
use std::time::Duration;

use reqwest::blocking::multipart::Form;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::errors::BackendError;
use crate::session::BackendSession;
use crate::types::{NewTask, Task, TaskStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskFilter {
    ThreadId(String),
    Status(TaskStatus),
}

impl TaskFilter {
    fn query_pair(&self) -> (&'static str, &str) {
        match self {
            TaskFilter::ThreadId(thread_id) => ("thread_id", thread_id.as_str()),
            TaskFilter::Status(status) => ("status", status.as_str()),
        }
    }

    fn matches(&self, task: &Task) -> bool {
        match self {
            TaskFilter::ThreadId(thread_id) => task.thread_id == *thread_id,
            TaskFilter::Status(status) => task.status == *status,
        }
    }
}

/// Operations the scheduler needs from the task backend.
pub trait TaskStore {
    /// Logs in with the configured credentials and returns the issued token.
    fn authenticate(&self) -> Result<String, BackendError>;

    /// Drops the current token and logs in again.
    fn reauthenticate(&self) -> Result<String, BackendError>;

    fn create_task(&self, task: &NewTask, body_path: &Path) -> Result<Task, BackendError>;

    /// Replaces the stored body of an existing task.
    fn update_task_body(&self, task_id: i64, body_path: &Path) -> Result<Task, BackendError>;

    fn query_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, BackendError>;

    fn mark_reminder_sent(&self, task_id: i64) -> Result<Task, BackendError>;

    /// Exact thread match. The backend filter is trusted only as a prefilter.
    fn find_task_by_thread(&self, thread_id: &str) -> Result<Option<Task>, BackendError> {
        let filter = TaskFilter::ThreadId(thread_id.to_string());
        Ok(self
            .query_tasks(&filter)?
            .into_iter()
            .find(|task| filter.matches(task)))
    }

    fn open_tasks(&self) -> Result<Vec<Task>, BackendError> {
        let filter = TaskFilter::Status(TaskStatus::Open);
        let mut tasks = self.query_tasks(&filter)?;
        tasks.retain(|task| filter.matches(task));
        Ok(tasks)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[allow(dead_code)]
    #[serde(default)]
    token_type: Option<String>,
}

/// REST client for the task backend.
#[derive(Debug, Clone)]
pub struct HttpTaskStore {
    client: Client,
    base_url: String,
    session: BackendSession,
}

impl HttpTaskStore {
    pub fn new(
        base_url: impl Into<String>,
        session: BackendSession,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
        })
    }

    pub fn session(&self) -> &BackendSession {
        &self.session
    }

    /// Unauthenticated liveness probe.
    pub fn health_check(&self) -> Result<(), BackendError> {
        let response = self.client.get(self.endpoint("/api")).send()?;
        check_status(response).map(|_| ())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn current_token(&self) -> Result<String, BackendError> {
        match self.session.access_token() {
            Some(token) => Ok(token),
            None => self.authenticate(),
        }
    }

    /// Sends a bearer-authenticated request, logging in again once on 401.
    fn send_authorized<F>(&self, build: F) -> Result<Response, BackendError>
    where
        F: Fn(&Client, &str) -> Result<RequestBuilder, BackendError>,
    {
        let token = self.current_token()?;
        let response = build(&self.client, &token)?.send()?;
        match check_status(response) {
            Err(err) if err.is_unauthorized() => {
                info!("backend rejected session token, re-authenticating");
                let token = self.reauthenticate()?;
                let response = build(&self.client, &token)?.send()?;
                check_status(response)
            }
            result => result,
        }
    }
}

impl TaskStore for HttpTaskStore {
    fn authenticate(&self) -> Result<String, BackendError> {
        let credentials = self.session.credentials();
        debug!("logging in to task backend as {}", credentials.username);
        let response = self
            .client
            .post(self.endpoint("/token/"))
            .form(&[
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .send()?;
        let response = check_status(response)?;
        let payload: TokenResponse = response.json()?;
        let token = payload
            .access_token
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| BackendError::Auth("login response has no access_token".to_string()))?;
        self.session.store_token(token.clone());
        info!("authenticated with task backend");
        Ok(token)
    }

    fn reauthenticate(&self) -> Result<String, BackendError> {
        self.session.clear();
        self.authenticate()
    }

    fn create_task(&self, task: &NewTask, body_path: &Path) -> Result<Task, BackendError> {
        let url = self.endpoint("/api/tasks/");
        let response = self.send_authorized(|client, token| {
            let form = Form::new()
                .text("creator_name", task.creator_name.clone())
                .text("assigner_name", task.assignee_name.clone())
                .text("subject", task.subject.clone())
                .text("criticality", task.criticality.as_str())
                .text("status", task.status.as_str())
                .text("thread_id", task.thread_id.clone())
                .file("html_file", body_path)?;
            Ok(client.post(&url).bearer_auth(token).multipart(form))
        })?;
        let created: Task = response.json()?;
        info!(
            "created task {} for thread {} assigned to {}",
            created.id, created.thread_id, created.assignee_name
        );
        Ok(created)
    }

    fn update_task_body(&self, task_id: i64, body_path: &Path) -> Result<Task, BackendError> {
        let url = self.endpoint(&format!("/api/tasks/{}", task_id));
        let response = self.send_authorized(|client, token| {
            let form = Form::new().file("html_file", body_path)?;
            Ok(client.put(&url).bearer_auth(token).multipart(form))
        })?;
        let updated: Task = response.json()?;
        info!("updated body of task {}", updated.id);
        Ok(updated)
    }

    fn query_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, BackendError> {
        let url = self.endpoint("/api/tasks/");
        let (key, value) = filter.query_pair();
        let response = self.send_authorized(|client, token| {
            Ok(client.get(&url).bearer_auth(token).query(&[(key, value)]))
        })?;
        let tasks: Vec<Task> = response.json()?;
        debug!("backend returned {} task(s) for {}={}", tasks.len(), key, value);
        Ok(tasks)
    }

    fn mark_reminder_sent(&self, task_id: i64) -> Result<Task, BackendError> {
        let url = self.endpoint(&format!("/api/tasks/{}/remindersent", task_id));
        let response =
            self.send_authorized(|client, token| Ok(client.post(&url).bearer_auth(token)))?;
        let task: Task = response.json()?;
        Ok(task)
    }
}

fn check_status(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    warn!("task backend returned {}: {}", status, body);
    Err(BackendError::Status {
        status: status.as_u16(),
        body,
    })
}
