//! Script execution with live output streaming and timeout escalation

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::client::{LogStream, PlatformApi};

/// Exit code reported when the script exceeded its timeout. Distinct from
/// any real process exit code.
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// Exit code reported when the script could not be launched or waited on.
pub const FAILURE_EXIT_CODE: i32 = 1;

/// How long a terminated process gets to exit before it is killed.
const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(10);

/// How a single script execution finished.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub exit_code: i32,
    pub timed_out: bool,
    pub error: Option<String>,
}

impl ExecutionOutcome {
    fn completed(exit_code: i32) -> Self {
        Self {
            exit_code,
            timed_out: false,
            error: None,
        }
    }

    fn timeout() -> Self {
        Self {
            exit_code: TIMEOUT_EXIT_CODE,
            timed_out: true,
            error: None,
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            exit_code: FAILURE_EXIT_CODE,
            timed_out: false,
            error: Some(message.into()),
        }
    }

    /// True when the script ran to completion with exit code 0.
    pub fn is_success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

/// Runs task scripts through the shell, streaming their output to the
/// platform as it is produced.
pub struct CommandExecutor {
    client: Arc<dyn PlatformApi>,
    kill_grace: Duration,
}

impl CommandExecutor {
    pub fn new(client: Arc<dyn PlatformApi>) -> Self {
        Self {
            client,
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    /// Override the termination-to-kill grace period.
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Run `command` through the shell in `workspace` and stream its output.
    ///
    /// The child environment is the agent's environment overlaid with
    /// `env_vars`; task values win on collision. Every fault is folded into
    /// the returned outcome; this never propagates an error to the caller.
    /// Both stream readers are drained before the outcome is returned, so
    /// all produced output has been forwarded (best-effort) by then.
    pub async fn execute(
        &self,
        command: &str,
        workspace: &Path,
        task_id: &str,
        env_vars: &HashMap<String, String>,
        timeout_seconds: u64,
    ) -> ExecutionOutcome {
        let mut cmd = shell_command(command);
        cmd.current_dir(workspace)
            .envs(env_vars)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to spawn script for task {}: {}", task_id, e);
                return ExecutionOutcome::failure(format!("failed to spawn script: {}", e));
            }
        };

        let stdout_reader = child
            .stdout
            .take()
            .map(|stdout| self.spawn_reader(task_id, LogStream::Stdout, stdout));
        let stderr_reader = child
            .stderr
            .take()
            .map(|stderr| self.spawn_reader(task_id, LogStream::Stderr, stderr));

        let outcome =
            match tokio::time::timeout(Duration::from_secs(timeout_seconds), child.wait()).await {
                Ok(Ok(status)) => {
                    // Signal deaths carry no exit code; report them as failures.
                    ExecutionOutcome::completed(status.code().unwrap_or(FAILURE_EXIT_CODE))
                }
                Ok(Err(e)) => {
                    error!("Failed to wait on script for task {}: {}", task_id, e);
                    ExecutionOutcome::failure(format!("failed to wait on script: {}", e))
                }
                Err(_) => {
                    warn!(
                        "Task {} timed out after {} seconds, terminating process",
                        task_id, timeout_seconds
                    );
                    self.terminate(&mut child, task_id).await;
                    ExecutionOutcome::timeout()
                }
            };

        // Drain both streams fully before the caller finalizes status.
        if let Some(handle) = stdout_reader {
            let _ = handle.await;
        }
        if let Some(handle) = stderr_reader {
            let _ = handle.await;
        }

        outcome
    }

    fn spawn_reader(
        &self,
        task_id: &str,
        stream: LogStream,
        reader: impl AsyncRead + Unpin + Send + 'static,
    ) -> JoinHandle<()> {
        let client = Arc::clone(&self.client);
        let task_id = task_id.to_string();

        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                info!("[{}-{}] {}", task_id, stream, line);
                if let Err(e) = client
                    .send_task_log(task_id.clone(), stream, line.to_string())
                    .await
                {
                    warn!(
                        "Failed to forward {} line for task {}: {}",
                        stream, task_id, e
                    );
                }
            }
        })
    }

    /// Graceful termination, then a hard kill once the grace period lapses.
    async fn terminate(&self, child: &mut Child, task_id: &str) {
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                // tokio's kill() is SIGKILL-only; ask nicely first.
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGTERM);
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }

        if tokio::time::timeout(self.kill_grace, child.wait())
            .await
            .is_err()
        {
            error!("Process for task {} ignored termination, killing it", task_id);
            if let Err(e) = child.kill().await {
                error!("Failed to kill process for task {}: {}", task_id, e);
            }
        }
    }
}

fn shell_command(command: &str) -> Command {
    if cfg!(target_os = "windows") {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, RunnerError};
    use foreman_core::identity::AgentStatus;
    use foreman_core::task::{Task, TaskStatus};
    use std::future::Future;
    use std::pin::Pin;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Instant;
    use tempfile::TempDir;

    /// In-memory platform that records forwarded log lines.
    #[derive(Default)]
    struct RecordingPlatform {
        logs: Mutex<Vec<(String, LogStream, String)>>,
        fail_logs: bool,
    }

    impl RecordingPlatform {
        fn failing() -> Self {
            Self {
                fail_logs: true,
                ..Self::default()
            }
        }

        fn logs(&self) -> Vec<(String, LogStream, String)> {
            self.logs.lock().unwrap().clone()
        }

        fn lines_for(&self, stream: LogStream) -> Vec<String> {
            self.logs()
                .into_iter()
                .filter(|(_, s, _)| *s == stream)
                .map(|(_, _, content)| content)
                .collect()
        }
    }

    impl PlatformApi for RecordingPlatform {
        fn register(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }

        fn send_heartbeat(
            &self,
            _status: AgentStatus,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }

        fn poll_task(&self) -> Pin<Box<dyn Future<Output = Result<Option<Task>>> + Send + '_>> {
            Box::pin(async { Ok(None) })
        }

        fn update_task_status(
            &self,
            _task_id: String,
            _status: TaskStatus,
            _message: String,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }

        fn send_task_log(
            &self,
            task_id: String,
            stream: LogStream,
            content: String,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            if self.fail_logs {
                return Box::pin(async { Err(RunnerError::platform(500, "log sink down")) });
            }
            self.logs.lock().unwrap().push((task_id, stream, content));
            Box::pin(async { Ok(()) })
        }

        fn upload_report(
            &self,
            _task_id: String,
            _report_path: PathBuf,
            _attachments: Vec<PathBuf>,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn executor(platform: &Arc<RecordingPlatform>) -> CommandExecutor {
        CommandExecutor::new(Arc::clone(platform) as Arc<dyn PlatformApi>)
    }

    #[tokio::test]
    async fn test_zero_exit_is_success() {
        let platform = Arc::new(RecordingPlatform::default());
        let dir = TempDir::new().unwrap();

        let outcome = executor(&platform)
            .execute("exit 0", dir.path(), "t1", &HashMap::new(), 30)
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.exit_code, 0);
        assert!(!outcome.timed_out);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_nonzero_exit_code_is_preserved() {
        let platform = Arc::new(RecordingPlatform::default());
        let dir = TempDir::new().unwrap();

        let outcome = executor(&platform)
            .execute("exit 7", dir.path(), "t1", &HashMap::new(), 30)
            .await;

        assert_eq!(outcome.exit_code, 7);
        assert!(!outcome.timed_out);
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_stdout_lines_forwarded_in_order() {
        let platform = Arc::new(RecordingPlatform::default());
        let dir = TempDir::new().unwrap();

        let outcome = executor(&platform)
            .execute(
                "echo 1 && echo 2 && echo 3",
                dir.path(),
                "t1",
                &HashMap::new(),
                30,
            )
            .await;

        assert!(outcome.is_success());
        assert_eq!(platform.lines_for(LogStream::Stdout), vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_stderr_is_captured() {
        let platform = Arc::new(RecordingPlatform::default());
        let dir = TempDir::new().unwrap();

        executor(&platform)
            .execute("echo oops >&2", dir.path(), "t1", &HashMap::new(), 30)
            .await;

        assert_eq!(platform.lines_for(LogStream::Stderr), vec!["oops"]);
        assert!(platform.lines_for(LogStream::Stdout).is_empty());
    }

    #[tokio::test]
    async fn test_task_env_overlays_agent_env() {
        let platform = Arc::new(RecordingPlatform::default());
        let dir = TempDir::new().unwrap();
        let env: HashMap<String, String> =
            [("FOREMAN_TEST_VALUE".to_string(), "overlay".to_string())].into();

        let outcome = executor(&platform)
            .execute("echo $FOREMAN_TEST_VALUE", dir.path(), "t1", &env, 30)
            .await;

        assert!(outcome.is_success());
        assert_eq!(platform.lines_for(LogStream::Stdout), vec!["overlay"]);
    }

    #[tokio::test]
    async fn test_script_runs_in_workspace() {
        let platform = Arc::new(RecordingPlatform::default());
        let dir = TempDir::new().unwrap();

        executor(&platform)
            .execute("pwd", dir.path(), "t1", &HashMap::new(), 30)
            .await;

        let lines = platform.lines_for(LogStream::Stdout);
        assert_eq!(lines.len(), 1);
        // Canonicalize both sides; temp dirs are often behind symlinks.
        assert_eq!(
            std::fs::canonicalize(&lines[0]).unwrap(),
            std::fs::canonicalize(dir.path()).unwrap()
        );
    }

    #[tokio::test]
    async fn test_timeout_reports_sentinel_and_kills_process() {
        let platform = Arc::new(RecordingPlatform::default());
        let dir = TempDir::new().unwrap();

        let start = Instant::now();
        let outcome = executor(&platform)
            .with_kill_grace(Duration::from_secs(2))
            .execute("sleep 30", dir.path(), "t1", &HashMap::new(), 1)
            .await;

        assert!(outcome.timed_out);
        assert_eq!(outcome.exit_code, TIMEOUT_EXIT_CODE);
        assert!(!outcome.is_success());
        // 1s timeout + termination well inside the grace window.
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_fast_zero_exit_never_reported_as_timeout() {
        let platform = Arc::new(RecordingPlatform::default());
        let dir = TempDir::new().unwrap();

        let outcome = executor(&platform)
            .execute("exit 0", dir.path(), "t1", &HashMap::new(), 1)
            .await;

        assert!(!outcome.timed_out);
        assert_eq!(outcome.exit_code, 0);
    }

    #[tokio::test]
    async fn test_log_forwarding_failure_is_not_fatal() {
        let platform = Arc::new(RecordingPlatform::failing());
        let dir = TempDir::new().unwrap();

        let outcome = executor(&platform)
            .execute("echo hello && exit 0", dir.path(), "t1", &HashMap::new(), 30)
            .await;

        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_spawn_failure_yields_failure_outcome() {
        let platform = Arc::new(RecordingPlatform::default());
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing-workspace");

        let outcome = executor(&platform)
            .execute("exit 0", &missing, "t1", &HashMap::new(), 30)
            .await;

        assert_eq!(outcome.exit_code, FAILURE_EXIT_CODE);
        assert!(!outcome.timed_out);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn test_multiline_script_through_shell() {
        let platform = Arc::new(RecordingPlatform::default());
        let dir = TempDir::new().unwrap();

        let outcome = executor(&platform)
            .execute(
                "set -e\nVALUE=shell\necho $VALUE",
                dir.path(),
                "t1",
                &HashMap::new(),
                30,
            )
            .await;

        assert!(outcome.is_success());
        assert_eq!(platform.lines_for(LogStream::Stdout), vec!["shell"]);
    }
}
