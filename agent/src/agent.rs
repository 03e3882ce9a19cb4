//! Agent orchestrator
//!
//! Owns the heartbeat and poll loops and drives one task at a time through
//! workspace allocation, checkout, execution, reporting and the final
//! status update. Exactly one task runs per agent: the poll loop executes
//! it inline and stays busy until it finishes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use foreman_core::config::Config;
use foreman_core::identity::{AgentIdentity, AgentStatus};
use foreman_core::task::{Task, TaskStatus};
use git_manager::GitManager;
use task_runner::{
    CommandExecutor, PlatformApi, PlatformClient, ReportProcessor, WorkspaceManager,
};

/// The long-running agent process: registration, heartbeats, polling and
/// task execution.
pub struct Agent {
    inner: Arc<AgentInner>,
    shutdown: CancellationToken,
    heartbeat_handle: Option<JoinHandle<()>>,
    poll_handle: Option<JoinHandle<()>>,
}

struct AgentInner {
    config: Config,
    client: Arc<dyn PlatformApi>,
    workspace_manager: WorkspaceManager,
    executor: CommandExecutor,
    report_processor: ReportProcessor,
    git_manager: GitManager,
    status: RwLock<AgentStatus>,
}

impl Agent {
    /// Build an agent talking to the platform named in `config`.
    pub fn new(config: Config) -> Self {
        let identity = AgentIdentity::from_config(&config, env!("CARGO_PKG_VERSION"));
        let client: Arc<dyn PlatformApi> =
            Arc::new(PlatformClient::new(&config.platform.url, identity));
        Self::with_client(config, client)
    }

    /// Build an agent against an arbitrary platform implementation.
    pub fn with_client(config: Config, client: Arc<dyn PlatformApi>) -> Self {
        let inner = AgentInner {
            workspace_manager: WorkspaceManager::new(config.agent.workspace.clone()),
            executor: CommandExecutor::new(Arc::clone(&client)),
            report_processor: ReportProcessor::new(Arc::clone(&client)),
            git_manager: GitManager::new(config.git.token()),
            status: RwLock::new(AgentStatus::Idle),
            client,
            config,
        };

        Self {
            inner: Arc::new(inner),
            shutdown: CancellationToken::new(),
            heartbeat_handle: None,
            poll_handle: None,
        }
    }

    /// Register with the platform and start the heartbeat and poll loops.
    ///
    /// Registration failure is fatal: the loops never start and the error is
    /// returned to the caller.
    pub async fn start(&mut self) -> task_runner::Result<()> {
        info!("Starting agent {}", self.inner.config.agent.id);
        self.inner.client.register().await?;

        let heartbeat_period = Duration::from_secs(self.inner.config.heartbeat.interval);
        let poll_period = Duration::from_secs(self.inner.config.task_polling.interval);

        self.heartbeat_handle = Some(tokio::spawn(heartbeat_loop(
            Arc::clone(&self.inner),
            self.shutdown.clone(),
            heartbeat_period,
        )));
        self.poll_handle = Some(tokio::spawn(poll_loop(
            Arc::clone(&self.inner),
            self.shutdown.clone(),
            poll_period,
        )));

        info!("Agent started and is running");
        Ok(())
    }

    /// Stop both loops and wait for their current iteration to finish.
    ///
    /// No further platform calls are made once this returns. A task that is
    /// mid-flight runs to completion first; its timeout is the only
    /// cancellation mechanism for a script.
    pub async fn stop(&mut self) {
        info!("Stopping agent...");
        self.shutdown.cancel();
        if let Some(handle) = self.heartbeat_handle.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.poll_handle.take() {
            let _ = handle.await;
        }
        info!("Agent stopped");
    }

    /// Current idle/busy status.
    pub async fn status(&self) -> AgentStatus {
        *self.inner.status.read().await
    }
}

async fn heartbeat_loop(inner: Arc<AgentInner>, shutdown: CancellationToken, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let status = *inner.status.read().await;
                if let Err(e) = inner.client.send_heartbeat(status).await {
                    warn!("Failed to send heartbeat: {}", e);
                }
            }
        }
    }
}

async fn poll_loop(inner: Arc<AgentInner>, shutdown: CancellationToken, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if *inner.status.read().await != AgentStatus::Idle {
                    continue;
                }

                match inner.client.poll_task().await {
                    Ok(Some(task)) => {
                        *inner.status.write().await = AgentStatus::Busy;
                        // Out-of-band heartbeat so the platform sees the
                        // transition before the task finishes.
                        if let Err(e) = inner.client.send_heartbeat(AgentStatus::Busy).await {
                            warn!("Failed to send heartbeat: {}", e);
                        }
                        run_task(&inner, task).await;
                        *inner.status.write().await = AgentStatus::Idle;
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Failed to poll for tasks: {}", e),
                }
            }
        }
    }
}

/// Drive one task from workspace allocation to its final status update.
async fn run_task(inner: &AgentInner, task: Task) {
    info!("Starting execution for task: {} ({})", task.name, task.id);

    report_status(inner, &task.id, TaskStatus::Running, String::new()).await;

    let workspace = match inner
        .workspace_manager
        .acquire(&task.id, task.workspace_clean)
        .await
    {
        Ok(workspace) => workspace,
        Err(e) => {
            error!("Failed to allocate workspace for task {}: {}", task.id, e);
            report_status(
                inner,
                &task.id,
                TaskStatus::Failed,
                format!("Workspace allocation failed: {}", e),
            )
            .await;
            return;
        }
    };

    if let Some(repo) = &task.git_repo {
        if !inner
            .git_manager
            .clone(&repo.url, &workspace, &repo.branch)
            .await
        {
            error!("Failed to clone repository for task {}", task.id);
            report_status(
                inner,
                &task.id,
                TaskStatus::Failed,
                "Git clone failed".to_string(),
            )
            .await;
            release_workspace(inner, &task.id).await;
            return;
        }
    }

    let outcome = inner
        .executor
        .execute(
            &task.script,
            &workspace,
            &task.id,
            &task.env_vars,
            task.timeout,
        )
        .await;

    // Reports are attempted regardless of how the script exited.
    if let Err(e) = inner
        .report_processor
        .process_and_upload(&task.id, &workspace)
        .await
    {
        warn!("Report processing for task {} failed: {}", task.id, e);
    }

    let (status, message) = if outcome.timed_out {
        (TaskStatus::Timeout, String::new())
    } else if outcome.exit_code == 0 {
        (TaskStatus::Success, String::new())
    } else {
        (
            TaskStatus::Failed,
            format!("Script exited with code {}", outcome.exit_code),
        )
    };
    report_status(inner, &task.id, status, message).await;

    release_workspace(inner, &task.id).await;
    info!("Finished execution for task {}", task.id);
}

async fn report_status(inner: &AgentInner, task_id: &str, status: TaskStatus, message: String) {
    if let Err(e) = inner
        .client
        .update_task_status(task_id.to_string(), status, message)
        .await
    {
        warn!("Failed to update status for task {}: {}", task_id, e);
    }
}

async fn release_workspace(inner: &AgentInner, task_id: &str) {
    let cleanup = inner.config.agent.cleanup_workspaces;
    if let Err(e) = inner.workspace_manager.release(task_id, cleanup).await {
        warn!("Failed to release workspace for task {}: {}", task_id, e);
    }
}
