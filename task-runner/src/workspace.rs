//! Per-task workspace directories

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, RunnerError};

/// Allocates and cleans per-task working directories under a base path.
///
/// A workspace is never torn down implicitly: artifacts must survive the
/// execution scope so report processing can pick them up afterwards. Removal
/// happens only through [`WorkspaceManager::release`] with the cleanup flag
/// set, or on the next acquisition with `clean_before`.
#[derive(Debug)]
pub struct WorkspaceManager {
    base_path: PathBuf,
}

impl WorkspaceManager {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Ensure a usable directory for `task_id` and return its path.
    ///
    /// With `clean_before`, a preexisting directory for the same task id is
    /// recursively removed first. Creation is idempotent.
    pub async fn acquire(&self, task_id: &str, clean_before: bool) -> Result<PathBuf> {
        let path = self.base_path.join(task_id);

        if clean_before && path.exists() {
            info!("Cleaning up workspace for task {}", task_id);
            tokio::fs::remove_dir_all(&path).await.map_err(|e| {
                RunnerError::workspace_with_source(
                    format!("failed to clean workspace {}", path.display()),
                    e,
                )
            })?;
        }

        tokio::fs::create_dir_all(&path).await.map_err(|e| {
            RunnerError::workspace_with_source(
                format!("failed to create workspace {}", path.display()),
                e,
            )
        })?;

        Ok(path)
    }

    /// Let go of the workspace for `task_id`, removing it only when `cleanup`
    /// is set.
    pub async fn release(&self, task_id: &str, cleanup: bool) -> Result<()> {
        if !cleanup {
            return Ok(());
        }

        let path = self.base_path.join(task_id);
        if path.exists() {
            debug!("Removing workspace for task {}", task_id);
            tokio::fs::remove_dir_all(&path).await.map_err(|e| {
                RunnerError::workspace_with_source(
                    format!("failed to remove workspace {}", path.display()),
                    e,
                )
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_acquire_creates_directory() {
        let base = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(base.path());

        let path = manager.acquire("task-1", false).await.unwrap();
        assert!(path.exists());
        assert_eq!(path, base.path().join("task-1"));
    }

    #[tokio::test]
    async fn test_clean_before_wipes_previous_contents() {
        let base = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(base.path());

        let path = manager.acquire("task-1", false).await.unwrap();
        tokio::fs::write(path.join("stale.txt"), "leftover")
            .await
            .unwrap();

        let path = manager.acquire("task-1", true).await.unwrap();
        assert!(path.exists());
        assert!(!path.join("stale.txt").exists());
    }

    #[tokio::test]
    async fn test_no_clean_preserves_previous_contents() {
        let base = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(base.path());

        let path = manager.acquire("task-1", false).await.unwrap();
        tokio::fs::write(path.join("kept.txt"), "artifact")
            .await
            .unwrap();

        let path = manager.acquire("task-1", false).await.unwrap();
        assert!(path.join("kept.txt").exists());
    }

    #[tokio::test]
    async fn test_release_respects_cleanup_flag() {
        let base = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(base.path());

        let path = manager.acquire("task-1", false).await.unwrap();
        manager.release("task-1", false).await.unwrap();
        assert!(path.exists());

        manager.release("task-1", true).await.unwrap();
        assert!(!path.exists());

        // Releasing an already-gone workspace is fine.
        manager.release("task-1", true).await.unwrap();
    }

    #[tokio::test]
    async fn test_base_directory_is_created_on_demand() {
        let base = TempDir::new().unwrap();
        let nested = base.path().join("deeper").join("workspace");
        let manager = WorkspaceManager::new(&nested);

        let path = manager.acquire("task-1", true).await.unwrap();
        assert!(path.exists());
    }
}
