//! HTTP client for the control-plane platform
//!
//! Six operations back the agent's control loop. Only `register` is fatal to
//! the caller; everything else returns an error the control loops log and
//! absorb. "No task available" (204) is an expected outcome, kept distinct
//! from transport failures.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use chrono::Utc;
use reqwest::multipart;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, info};

use foreman_core::identity::{AgentIdentity, AgentStatus};
use foreman_core::system::{self, ResourceUsage};
use foreman_core::task::{Task, TaskStatus};

use crate::error::{Result, RunnerError};

const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_TIMEOUT: Duration = Duration::from_secs(5);
const STATUS_TIMEOUT: Duration = Duration::from_secs(10);
const LOG_TIMEOUT: Duration = Duration::from_secs(5);
/// Report archives can be large; give uploads five minutes.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Which child stream a forwarded log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

impl std::fmt::Display for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize)]
struct RegisterRequest {
    agent_id: String,
    os_info: String,
    agent_version: String,
    cpu_usage: f32,
    memory_usage: f32,
    disk_usage: f32,
}

#[derive(Serialize)]
struct HeartbeatRequest {
    agent_id: String,
    status: AgentStatus,
    resources: ResourceUsage,
    agent_version: String,
    os_info: String,
}

#[derive(Serialize)]
struct StatusRequest {
    status: TaskStatus,
    message: String,
}

#[derive(Serialize)]
struct LogRequest {
    #[serde(rename = "type")]
    log_type: LogStream,
    content: String,
    timestamp: String,
}

/// HTTP client for the six platform operations.
pub struct PlatformClient {
    client: Client,
    base_url: String,
    identity: AgentIdentity,
}

impl PlatformClient {
    pub fn new(platform_url: &str, identity: AgentIdentity) -> Self {
        let client = Client::builder()
            .user_agent(format!("ForemanAgent/{}", identity.version))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: platform_url.trim_end_matches('/').to_string(),
            identity,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.identity.id
    }

    /// Announce the agent to the platform. The server treats this as an
    /// idempotent upsert, so re-registering an existing id is safe.
    pub async fn register(&self) -> Result<()> {
        let url = format!("{}/api/agents/register/", self.base_url);
        let usage = sample_resources().await;
        let payload = RegisterRequest {
            agent_id: self.identity.id.clone(),
            os_info: system::os_info(),
            agent_version: self.identity.version.clone(),
            cpu_usage: usage.cpu_usage,
            memory_usage: usage.memory_usage,
            disk_usage: usage.disk_usage,
        };

        let response = self
            .client
            .post(&url)
            .timeout(REGISTER_TIMEOUT)
            .json(&payload)
            .send()
            .await?;
        check(response).await?;

        info!("Agent {} registered with the platform", self.identity.id);
        Ok(())
    }

    /// Push current status plus a fresh resource snapshot.
    pub async fn send_heartbeat(&self, status: AgentStatus) -> Result<()> {
        let url = format!("{}/api/agents/heartbeat/", self.base_url);
        let payload = HeartbeatRequest {
            agent_id: self.identity.id.clone(),
            status,
            resources: sample_resources().await,
            agent_version: self.identity.version.clone(),
            os_info: system::os_info(),
        };

        let response = self
            .client
            .post(&url)
            .timeout(HEARTBEAT_TIMEOUT)
            .json(&payload)
            .send()
            .await?;
        check(response).await?;

        debug!("Heartbeat sent");
        Ok(())
    }

    /// Ask for the next task. `Ok(None)` means the queue is empty, which is
    /// a distinct outcome from any transport or server failure.
    pub async fn poll_task(&self) -> Result<Option<Task>> {
        let url = format!("{}/api/tasks/poll/", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(POLL_TIMEOUT)
            .query(&[("agent_id", self.identity.id.as_str())])
            .send()
            .await?;

        if response.status() == StatusCode::NO_CONTENT {
            debug!("No pending tasks");
            return Ok(None);
        }

        let response = check(response).await?;
        let task: Task = response.json().await?;
        info!("New task received: {} ({})", task.name, task.id);
        Ok(Some(task))
    }

    /// Report a state transition for a task.
    pub async fn update_task_status(
        &self,
        task_id: String,
        status: TaskStatus,
        message: String,
    ) -> Result<()> {
        let url = format!("{}/api/tasks/{}/status/", self.base_url, task_id);
        let payload = StatusRequest { status, message };

        let response = self
            .client
            .post(&url)
            .timeout(STATUS_TIMEOUT)
            .json(&payload)
            .send()
            .await?;
        check(response).await?;

        info!("Updated status for task {} to {}", task_id, status);
        Ok(())
    }

    /// Forward one line of script output.
    pub async fn send_task_log(
        &self,
        task_id: String,
        stream: LogStream,
        content: String,
    ) -> Result<()> {
        let url = format!("{}/api/tasks/{}/log/", self.base_url, task_id);
        let payload = LogRequest {
            log_type: stream,
            content,
            timestamp: Utc::now().to_rfc3339(),
        };

        let response = self
            .client
            .post(&url)
            .timeout(LOG_TIMEOUT)
            .json(&payload)
            .send()
            .await?;
        check(response).await?;

        debug!("Log sent for task {}", task_id);
        Ok(())
    }

    /// Upload the packaged report plus any loose attachments.
    pub async fn upload_report(
        &self,
        task_id: String,
        report_path: PathBuf,
        attachments: Vec<PathBuf>,
    ) -> Result<()> {
        let url = format!(
            "{}/api/reports/agent-reports/tasks/{}/report/",
            self.base_url, task_id
        );

        let mut form = multipart::Form::new().part("report", file_part(&report_path).await?);
        for attachment in &attachments {
            form = form.part("attachments", file_part(attachment).await?);
        }

        let response = self
            .client
            .post(&url)
            .timeout(UPLOAD_TIMEOUT)
            .multipart(form)
            .send()
            .await?;
        check(response).await?;

        info!("Report for task {} uploaded", task_id);
        Ok(())
    }
}

/// Object-safe view of the platform operations, so components can run
/// against stub platforms in tests.
pub trait PlatformApi: Send + Sync {
    fn register(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    fn send_heartbeat(
        &self,
        status: AgentStatus,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    fn poll_task(&self) -> Pin<Box<dyn Future<Output = Result<Option<Task>>> + Send + '_>>;

    fn update_task_status(
        &self,
        task_id: String,
        status: TaskStatus,
        message: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    fn send_task_log(
        &self,
        task_id: String,
        stream: LogStream,
        content: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    fn upload_report(
        &self,
        task_id: String,
        report_path: PathBuf,
        attachments: Vec<PathBuf>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

impl PlatformApi for PlatformClient {
    fn register(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.register())
    }

    fn send_heartbeat(
        &self,
        status: AgentStatus,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.send_heartbeat(status))
    }

    fn poll_task(&self) -> Pin<Box<dyn Future<Output = Result<Option<Task>>> + Send + '_>> {
        Box::pin(self.poll_task())
    }

    fn update_task_status(
        &self,
        task_id: String,
        status: TaskStatus,
        message: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.update_task_status(task_id, status, message))
    }

    fn send_task_log(
        &self,
        task_id: String,
        stream: LogStream,
        content: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.send_task_log(task_id, stream, content))
    }

    fn upload_report(
        &self,
        task_id: String,
        report_path: PathBuf,
        attachments: Vec<PathBuf>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.upload_report(task_id, report_path, attachments))
    }
}

/// Map non-2xx responses to a typed platform error.
async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let message = response.text().await.unwrap_or_default();
        Err(RunnerError::platform(status.as_u16(), message))
    }
}

async fn file_part(path: &Path) -> Result<multipart::Part> {
    let bytes = tokio::fs::read(path).await?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment".to_string());
    Ok(multipart::Part::bytes(bytes).file_name(file_name))
}

/// Resource sampling blocks briefly; keep it off the runtime threads.
async fn sample_resources() -> ResourceUsage {
    tokio::task::spawn_blocking(system::resource_usage)
        .await
        .unwrap_or_default()
}
