use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::error::{ClientError, extract_detail};
use crate::task::{LoginRequest, NewTask, RegisterRequest, Task, TaskUpdate, User};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// The task service as seen by the controller.
#[async_trait]
pub trait TaskApi: Send + Sync {
    async fn list_tasks(&self, user_id: i64) -> Result<Vec<Task>, ClientError>;

    async fn create_task(&self, user_id: i64, task: &NewTask) -> Result<Task, ClientError>;

    async fn update_task(
        &self,
        user_id: i64,
        task_id: i64,
        update: &TaskUpdate,
    ) -> Result<Task, ClientError>;

    async fn delete_task(&self, user_id: i64, task_id: i64) -> Result<(), ClientError>;

    async fn login(&self, request: &LoginRequest) -> Result<User, ClientError>;

    async fn register(&self, request: &RegisterRequest) -> Result<User, ClientError>;
}

#[derive(Debug, Clone)]
pub struct HttpTaskApi {
    client: Client,
    base_url: String,
}

impl HttpTaskApi {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed building HTTP client for task service")?;

        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let base_url = cfg
            .get("api.url")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let timeout_secs = cfg
            .get_parsed::<u64>("api.timeout")?
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        debug!(base_url = %base_url, timeout_secs, "configured task service client");
        Self::new(&base_url, Duration::from_secs(timeout_secs))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl TaskApi for HttpTaskApi {
    #[instrument(skip(self))]
    async fn list_tasks(&self, user_id: i64) -> Result<Vec<Task>, ClientError> {
        let request = self.client.get(self.url(&format!("/tasks/user/{user_id}")));
        let tasks: Vec<Task> = send_json(request).await?;
        debug!(count = tasks.len(), "fetched tasks");
        Ok(tasks)
    }

    #[instrument(skip(self, task), fields(title_len = task.title.len(), status = %task.status))]
    async fn create_task(&self, user_id: i64, task: &NewTask) -> Result<Task, ClientError> {
        let request = self
            .client
            .post(self.url(&format!("/tasks/?user_id={user_id}")))
            .json(task);
        send_json(request).await
    }

    #[instrument(skip(self, update))]
    async fn update_task(
        &self,
        user_id: i64,
        task_id: i64,
        update: &TaskUpdate,
    ) -> Result<Task, ClientError> {
        let request = self
            .client
            .put(self.url(&format!("/tasks/{task_id}?user_id={user_id}")))
            .json(update);
        send_json(request).await
    }

    #[instrument(skip(self))]
    async fn delete_task(&self, user_id: i64, task_id: i64) -> Result<(), ClientError> {
        let request = self
            .client
            .delete(self.url(&format!("/tasks/{task_id}?user_id={user_id}")));
        send(request).await?;
        Ok(())
    }

    #[instrument(skip(self, request))]
    async fn login(&self, request: &LoginRequest) -> Result<User, ClientError> {
        send_json(self.client.post(self.url("/login")).json(request)).await
    }

    #[instrument(skip(self, request))]
    async fn register(&self, request: &RegisterRequest) -> Result<User, ClientError> {
        send_json(self.client.post(self.url("/register")).json(request)).await
    }
}

async fn send(request: RequestBuilder) -> Result<Response, ClientError> {
    let response = request.send().await.map_err(|err| {
        warn!(error = %err, "request to task service failed");
        ClientError::Network(err)
    })?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    // Best effort: the body only feeds the detail message.
    let body = response.text().await.unwrap_or_default();
    let detail = extract_detail(&body);
    warn!(status = status.as_u16(), detail = ?detail, "task service rejected request");
    Err(ClientError::Http {
        status: status.as_u16(),
        detail,
    })
}

async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ClientError> {
    let response = send(request).await?;
    response.json::<T>().await.map_err(|err| {
        warn!(error = %err, "task service sent an unreadable body");
        ClientError::Network(err)
    })
}
