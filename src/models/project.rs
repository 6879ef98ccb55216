//! Project model, creation input, and name validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::run::{Run, RunStatus};
use crate::{AppError, Result};

/// Maximum length of a project name.
pub const MAX_PROJECT_NAME_LEN: usize = 64;

/// Lifecycle status for a project.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    /// Project recorded but no run started yet.
    Created,
    /// At least one engine run is active.
    Running,
    /// Every engine's latest run completed.
    Completed,
    /// At least one engine's latest run failed.
    Failed,
    /// Runs ended by operator request.
    Stopped,
}

impl ProjectStatus {
    /// Stable string form used in persistence.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }

    /// Parse the persisted string form.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` for an unknown value.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(Self::Created),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "stopped" => Ok(Self::Stopped),
            other => Err(AppError::Db(format!("invalid project status: {other}"))),
        }
    }
}

/// Kind of software the project produces. Carried for downstream tooling.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectType {
    /// Plain software package.
    #[default]
    Standalone,
    /// Chat bot.
    Bot,
    /// Web service or API.
    Web,
}

impl ProjectType {
    /// Stable string form used in persistence.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standalone => "standalone",
            Self::Bot => "bot",
            Self::Web => "web",
        }
    }

    /// Parse the persisted string form.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidInput` for an unknown value.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "standalone" => Ok(Self::Standalone),
            "bot" => Ok(Self::Bot),
            "web" => Ok(Self::Web),
            other => Err(AppError::InvalidInput(format!(
                "unknown project type: {other}"
            ))),
        }
    }
}

/// Project record owned by the run store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    /// Unique, immutable project name.
    pub name: String,
    /// Engine keys selected for this project.
    pub engines: Vec<String>,
    /// Short description.
    pub description: String,
    /// Full requirements text handed to the agents.
    pub requirements: String,
    /// Current lifecycle status.
    pub status: ProjectStatus,
    /// Identity of the creator (front-end specific).
    pub created_by: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Kind of software produced.
    pub project_type: ProjectType,
    /// Whether the agents are asked to deploy the result.
    pub deploy: bool,
    /// Deployment target host, if any.
    pub deploy_server: String,
    /// Public subdomain, if any.
    pub subdomain: String,
    /// Runs in creation order.
    pub runs: Vec<Run>,
}

impl Project {
    /// Most recent run for `engine`, regardless of status.
    #[must_use]
    pub fn latest_run(&self, engine: &str) -> Option<&Run> {
        self.runs.iter().rev().find(|r| r.engine == engine)
    }

    /// Most recent `running` run for `engine`.
    #[must_use]
    pub fn current_run(&self, engine: &str) -> Option<&Run> {
        self.runs
            .iter()
            .rev()
            .find(|r| r.engine == engine && r.status == RunStatus::Running)
    }

    /// Derive the project status from the latest run of each engine.
    ///
    /// Returns `None` when the project has no runs at all.
    #[must_use]
    pub fn aggregate_status(runs: &[Run]) -> Option<ProjectStatus> {
        if runs.is_empty() {
            return None;
        }
        let mut seen: Vec<&str> = Vec::new();
        let mut latest: Vec<RunStatus> = Vec::new();
        for run in runs.iter().rev() {
            if !seen.contains(&run.engine.as_str()) {
                seen.push(&run.engine);
                latest.push(run.status);
            }
        }
        // Superseded runs are `stopped`, so a live engine always shows its running run.
        if runs.iter().any(|r| r.status == RunStatus::Running) {
            return Some(ProjectStatus::Running);
        }
        if latest.iter().all(|s| *s == RunStatus::Completed) {
            Some(ProjectStatus::Completed)
        } else if latest.contains(&RunStatus::Failed) {
            Some(ProjectStatus::Failed)
        } else {
            Some(ProjectStatus::Stopped)
        }
    }
}

/// Input for creating a project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewProject {
    /// Unique project name.
    pub name: String,
    /// Engine keys to run.
    pub engines: Vec<String>,
    /// Short description; derived from the requirements when empty.
    #[serde(default)]
    pub description: String,
    /// Requirements text.
    #[serde(default)]
    pub requirements: String,
    /// Creator identity.
    #[serde(default)]
    pub created_by: String,
    /// Kind of software produced.
    #[serde(default)]
    pub project_type: ProjectType,
    /// Whether deployment is requested.
    #[serde(default)]
    pub deploy: bool,
    /// Deployment target host.
    #[serde(default)]
    pub deploy_server: String,
    /// Public subdomain.
    #[serde(default)]
    pub subdomain: String,
}

impl NewProject {
    /// Minimal creation input with defaults for the optional fields.
    #[must_use]
    pub fn new(name: impl Into<String>, engines: Vec<String>, requirements: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            engines,
            description: String::new(),
            requirements: requirements.into(),
            created_by: String::new(),
            project_type: ProjectType::default(),
            deploy: false,
            deploy_server: String::new(),
            subdomain: String::new(),
        }
    }

    /// Description to persist: explicit one, or the first 200 characters of the requirements.
    #[must_use]
    pub fn effective_description(&self) -> String {
        if self.description.is_empty() {
            self.requirements.chars().take(200).collect()
        } else {
            self.description.clone()
        }
    }
}

/// Validate a project name.
///
/// Names become part of multiplexer session names and directory names, so
/// only ASCII letters, digits, `_` and `-` are allowed, the first character
/// may not be `-`, and the length is bounded.
///
/// # Errors
///
/// Returns `AppError::InvalidInput` describing the first violation.
pub fn validate_project_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AppError::InvalidInput("project name is empty".into()));
    }
    if name.len() > MAX_PROJECT_NAME_LEN {
        return Err(AppError::InvalidInput(format!(
            "project name longer than {MAX_PROJECT_NAME_LEN} characters"
        )));
    }
    if name.starts_with('-') {
        return Err(AppError::InvalidInput(
            "project name must not start with '-'".into(),
        ));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(AppError::InvalidInput(format!(
            "project name contains invalid character {bad:?}"
        )));
    }
    Ok(())
}
