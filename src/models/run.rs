//! Run model and partial-update fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppError, Result};

/// Lifecycle status for a single engine run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Agent session is live and being monitored.
    Running,
    /// Agent emitted a COMPLETE marker.
    Completed,
    /// Agent session disappeared while running.
    Failed,
    /// Stopped by operator or superseded by a newer run.
    Stopped,
}

impl RunStatus {
    /// Stable string form used in persistence.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
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
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "stopped" => Ok(Self::Stopped),
            other => Err(AppError::Db(format!("invalid run status: {other}"))),
        }
    }

    /// Whether this status ends the run.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// One execution attempt of one engine against one project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Run {
    /// Unique run identifier.
    pub id: String,
    /// Owning project name.
    pub project_name: String,
    /// Engine key.
    pub engine: String,
    /// Multiplexer session name.
    pub session_id: String,
    /// Current status.
    pub status: RunStatus,
    /// Highest phase number the agent reported as finished.
    pub phase: u32,
    /// Bytes of the run log already consumed by the monitor.
    pub log_offset: u64,
    /// Sum of reported COST amounts.
    pub cost_total: f64,
    /// Start timestamp.
    pub started_at: DateTime<Utc>,
    /// Finish timestamp, set on any terminal status.
    pub finished_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Construct a fresh `running` run starting now.
    #[must_use]
    pub fn new(project_name: String, engine: String, session_id: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_name,
            engine,
            session_id,
            status: RunStatus::Running,
            phase: 0,
            log_offset: 0,
            cost_total: 0.0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, update: &RunUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(finished_at) = update.finished_at {
            self.finished_at = Some(finished_at);
        }
        if let Some(phase) = update.phase {
            self.phase = self.phase.max(phase);
        }
        if let Some(offset) = update.log_offset {
            self.log_offset = offset;
        }
        if let Some(cost) = update.add_cost {
            self.cost_total += cost;
        }
    }
}

/// Partial update applied to the current run of an engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunUpdate {
    /// New status.
    pub status: Option<RunStatus>,
    /// Finish timestamp.
    pub finished_at: Option<DateTime<Utc>>,
    /// Phase to raise the counter to; lower values leave it unchanged.
    pub phase: Option<u32>,
    /// New consumed-log offset.
    pub log_offset: Option<u64>,
    /// Amount added to the cost total.
    pub add_cost: Option<f64>,
}

impl RunUpdate {
    /// Terminal transition stamped with the current time.
    #[must_use]
    pub fn finish(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            finished_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    /// Whether the update carries no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
