//! Post-run report collection and upload
//!
//! Looks for Allure results left behind by the script, renders them with the
//! `allure` CLI, packages the rendered report and pushes it to the platform
//! together with loose log/screenshot attachments. The front half of the
//! pipeline is best-effort: a missing results directory or a failed render is
//! an expected outcome, not an error.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::process::Command;
use tracing::{error, info};

use crate::client::PlatformApi;
use crate::error::{Result, RunnerError};

const RESULTS_DIR: &str = "allure-results";
const REPORT_DIR: &str = "allure-report";
const ATTACHMENT_EXTENSIONS: &[&str] = &["log", "png", "jpg"];

/// Packages and uploads whatever report artifacts a task produced.
pub struct ReportProcessor {
    client: Arc<dyn PlatformApi>,
}

impl ReportProcessor {
    pub fn new(client: Arc<dyn PlatformApi>) -> Self {
        Self { client }
    }

    /// Render, package and upload the report for one finished task.
    pub async fn process_and_upload(&self, task_id: &str, workspace: &Path) -> Result<()> {
        let results_dir = workspace.join(RESULTS_DIR);
        if !has_entries(&results_dir).await {
            info!(
                "No results found in {} for task {}, skipping report",
                results_dir.display(),
                task_id
            );
            return Ok(());
        }

        let report_dir = workspace.join(REPORT_DIR);
        info!("Generating report for task {}", task_id);
        if !generate_report(&results_dir, &report_dir).await {
            return Ok(());
        }

        let archive_path = workspace.join(format!("allure-report-{}.tar.gz", task_id));
        info!("Packaging report to {}", archive_path.display());

        let attachments = {
            let report_dir = report_dir.clone();
            let archive_path = archive_path.clone();
            let workspace = workspace.to_path_buf();
            tokio::task::spawn_blocking(move || -> std::io::Result<Vec<PathBuf>> {
                archive_dir(&report_dir, &archive_path)?;
                Ok(collect_attachments(&workspace))
            })
            .await
            .map_err(|e| RunnerError::Io(std::io::Error::other(e)))??
        };

        self.client
            .upload_report(task_id.to_string(), archive_path, attachments)
            .await
    }
}

async fn has_entries(dir: &Path) -> bool {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => entries.next_entry().await.ok().flatten().is_some(),
        Err(_) => false,
    }
}

/// Run `allure generate`; failures are logged and swallowed.
async fn generate_report(results_dir: &Path, report_dir: &Path) -> bool {
    let output = Command::new("allure")
        .arg("generate")
        .arg(results_dir)
        .arg("-o")
        .arg(report_dir)
        .arg("--clean")
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() => true,
        Ok(output) => {
            error!(
                "Failed to generate report: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
            false
        }
        Err(e) => {
            error!("Failed to run allure: {}", e);
            false
        }
    }
}

fn archive_dir(dir: &Path, archive_path: &Path) -> std::io::Result<()> {
    let file = std::fs::File::create(archive_path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(".", dir)?;
    builder.into_inner()?.finish()?;
    Ok(())
}

/// Loose artifacts worth shipping alongside the report: logs and screenshots
/// anywhere in the workspace, excluding the allure trees themselves.
fn collect_attachments(workspace: &Path) -> Vec<PathBuf> {
    let mut attachments = Vec::new();
    let mut stack = vec![workspace.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                let name = entry.file_name();
                if name == RESULTS_DIR || name == REPORT_DIR {
                    continue;
                }
                stack.push(path);
            } else if path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| ATTACHMENT_EXTENSIONS.contains(&ext))
            {
                attachments.push(path);
            }
        }
    }

    attachments.sort();
    attachments
}
