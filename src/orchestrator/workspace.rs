//! Working-directory preparation for a new engine run.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::engines::EngineDescriptor;
use crate::session::layout::{WorkspaceLayout, ARTIFACT_DIRS};
use crate::{AppError, Result};

/// Inputs for [`prepare_workspace`].
#[derive(Debug, Clone)]
pub struct WorkspacePlan<'a> {
    /// Project name.
    pub project: &'a str,
    /// Engine the directory is for.
    pub engine: &'a EngineDescriptor,
    /// Requirements text written to `raw-input.md`.
    pub requirements: &'a str,
    /// Directory holding engine instruction templates, if any.
    pub templates_dir: Option<&'a Path>,
    /// Bound on each `git` invocation.
    pub git_timeout: Duration,
}

/// Create the working directory for one engine of a project.
///
/// Creates the artifact tree, copies the engine's instruction template when
/// one exists, writes the requirements file, and tries to commit the initial
/// state to a fresh git repository. Git failures are logged and ignored.
/// Returns the working directory.
///
/// # Errors
///
/// Returns `AppError::Io` if a directory or file cannot be written.
pub async fn prepare_workspace(layout: &WorkspaceLayout, plan: &WorkspacePlan<'_>) -> Result<PathBuf> {
    let work_dir = layout.project_dir(plan.project, plan.engine.key);
    let artifacts = layout.artifacts_dir(plan.project, plan.engine.key);

    for dir in ARTIFACT_DIRS {
        let path = artifacts.join(dir);
        tokio::fs::create_dir_all(&path).await.map_err(|err| {
            AppError::Io(format!("failed to create {}: {err}", path.display()))
        })?;
    }

    if let Some(templates) = plan.templates_dir {
        let source = templates.join(plan.engine.template);
        if tokio::fs::try_exists(&source).await.unwrap_or(false) {
            let dest = work_dir.join(plan.engine.template);
            tokio::fs::copy(&source, &dest).await.map_err(|err| {
                AppError::Io(format!("failed to copy template {}: {err}", source.display()))
            })?;
            debug!(template = plan.engine.template, "template copied");
        } else {
            debug!(path = %source.display(), "no template for engine");
        }
    }

    let requirements = layout.requirements_file(plan.project, plan.engine.key);
    tokio::fs::write(&requirements, plan.requirements)
        .await
        .map_err(|err| {
            AppError::Io(format!("failed to write {}: {err}", requirements.display()))
        })?;

    init_git(&work_dir, plan.git_timeout).await;
    info!(project = plan.project, engine = plan.engine.key, work_dir = %work_dir.display(), "workspace prepared");
    Ok(work_dir)
}

async fn init_git(work_dir: &Path, timeout: Duration) {
    let steps: [&[&str]; 3] = [
        &["init", "-b", "main"],
        &["add", "."],
        &["commit", "-m", "Initial project setup"],
    ];
    for args in steps {
        if let Err(err) = run_git(work_dir, args, timeout).await {
            warn!(%err, "git setup skipped");
            return;
        }
    }
}

async fn run_git(work_dir: &Path, args: &[&str], timeout: Duration) -> Result<()> {
    let mut cmd = Command::new("git");
    cmd.args(args)
        .current_dir(work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let verb = args.first().copied().unwrap_or_default();
    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| AppError::Io(format!("git {verb} timed out")))?
        .map_err(|err| AppError::Io(format!("failed to run git {verb}: {err}")))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(AppError::Io(format!(
            "git {verb} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}
