//! Git command execution utilities

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, trace};

use crate::error::{GitError, Result};

/// Output from a git command
#[derive(Debug)]
pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

/// Execute a git command in the specified directory
pub async fn git_command(cwd: &Path, args: &[&str]) -> Result<GitOutput> {
    debug!("Running git {:?} in {:?}", args, cwd);

    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| GitError::command_failed_with_source("Failed to execute git command", e))?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    trace!("git stdout: {}", stdout);
    if !stderr.is_empty() {
        trace!("git stderr: {}", stderr);
    }

    Ok(GitOutput {
        stdout,
        stderr,
        success: output.status.success(),
    })
}

/// Execute a git command and return an error if it fails
pub async fn git_command_checked(cwd: &Path, args: &[&str]) -> Result<String> {
    let output = git_command(cwd, args).await?;

    if !output.success {
        return Err(GitError::command_failed(format!(
            "git {} failed: {}",
            args.join(" "),
            output.stderr.trim()
        )));
    }

    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_git_command_reports_success() {
        let dir = TempDir::new().unwrap();
        let output = git_command(dir.path(), &["--version"]).await.unwrap();
        assert!(output.success);
        assert!(output.stdout.contains("git version"));
    }

    #[tokio::test]
    async fn test_git_command_checked_fails_on_bad_subcommand() {
        let dir = TempDir::new().unwrap();
        let result = git_command_checked(dir.path(), &["definitely-not-a-subcommand"]).await;
        assert!(matches!(result, Err(GitError::CommandFailed { .. })));
    }
}
