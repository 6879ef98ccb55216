//! Lifecycle events delivered to observers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engines;
use crate::protocol::Marker;

/// Phase marker action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PhaseAction {
    /// Phase began.
    Start,
    /// Phase finished (may carry a score).
    End,
}

/// Closed set of event payloads emitted by a run monitor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Phase boundary.
    Phase {
        /// Phase number.
        number: u32,
        /// Start or end.
        action: PhaseAction,
        /// Quality score, only on `end`.
        #[serde(skip_serializing_if = "Option::is_none")]
        score: Option<u32>,
    },
    /// Agent needs an answer from the operator.
    Clarify {
        /// Decoded payload, or `{"question": raw}`.
        payload: Value,
    },
    /// Agent-reported error.
    Error {
        /// Raw message.
        message: String,
    },
    /// Spend report.
    Cost {
        /// Amount spent.
        amount: f64,
        /// Billing provider.
        provider: String,
    },
    /// Agent finished the run.
    Complete {
        /// Decoded payload, or `{"summary": raw}`.
        payload: Value,
    },
    /// Multiplexer session vanished while the run was active.
    SessionDied,
}

impl EventKind {
    /// Whether this event ends monitoring.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::SessionDied)
    }

    /// Notification category used for delivery filtering.
    #[must_use]
    pub fn category(&self) -> NotifyCategory {
        match self {
            Self::Phase {
                action: PhaseAction::Start,
                ..
            } => NotifyCategory::PhaseStart,
            Self::Phase {
                action: PhaseAction::End,
                ..
            } => NotifyCategory::PhaseEnd,
            Self::Clarify { .. } => NotifyCategory::Clarify,
            Self::Error { .. } => NotifyCategory::Error,
            Self::Cost { .. } => NotifyCategory::Cost,
            Self::Complete { .. } => NotifyCategory::Complete,
            Self::SessionDied => NotifyCategory::SessionDied,
        }
    }
}

impl From<Marker> for EventKind {
    fn from(marker: Marker) -> Self {
        match marker {
            Marker::Phase {
                number,
                action,
                score,
            } => Self::Phase {
                number,
                action,
                score,
            },
            Marker::Clarify { payload } => Self::Clarify { payload },
            Marker::Error { message } => Self::Error { message },
            Marker::Cost { amount, provider } => Self::Cost { amount, provider },
            Marker::Complete { payload } => Self::Complete { payload },
        }
    }
}

/// Event annotated with the run it came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FactoryEvent {
    /// Project name.
    pub project: String,
    /// Engine key.
    pub engine: String,
    /// Payload.
    #[serde(flatten)]
    pub kind: EventKind,
}

impl FactoryEvent {
    /// Attach project and engine identifiers to an event payload.
    #[must_use]
    pub fn new(project: &str, engine: &str, kind: EventKind) -> Self {
        Self {
            project: project.to_owned(),
            engine: engine.to_owned(),
            kind,
        }
    }

    /// Human-readable notification text.
    #[must_use]
    pub fn describe(&self) -> String {
        let engine = engines::display_name(&self.engine);
        let prefix = format!("[{}/{engine}]", self.project);
        match &self.kind {
            EventKind::Phase {
                number,
                action: PhaseAction::Start,
                ..
            } => format!("{prefix} Phase {number} started"),
            EventKind::Phase {
                number,
                action: PhaseAction::End,
                score,
            } => {
                let score = score.map_or_else(|| "?".to_owned(), |s| s.to_string());
                format!("{prefix} Phase {number} completed (score: {score})")
            }
            EventKind::Clarify { payload } => format!(
                "{prefix} Clarification needed:\n\n{}",
                field_or(payload, "question", "?")
            ),
            EventKind::Error { message } => format!("{prefix} ERROR: {message}"),
            EventKind::Cost { amount, provider } => {
                format!("{prefix} Cost: ${amount:.2} ({provider})")
            }
            EventKind::Complete { payload } => format!(
                "{prefix} FACTORY COMPLETE!\nDuration: {} min\nCost: ${}\nTests: {}",
                field_or(payload, "duration_minutes", "?"),
                field_or(payload, "total_cost", "?"),
                field_or(payload, "test_results", "{}"),
            ),
            EventKind::SessionDied => format!("{prefix} Session died unexpectedly!"),
        }
    }
}

/// Render a payload field for display; strings are shown without quotes.
fn field_or(payload: &Value, key: &str, default: &str) -> String {
    match payload.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => default.to_owned(),
    }
}

/// Delivery filter categories for outbound notifications.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotifyCategory {
    /// `PHASE:n:start`.
    PhaseStart,
    /// `PHASE:n:end`.
    PhaseEnd,
    /// `CLARIFY`.
    Clarify,
    /// `ERROR`.
    Error,
    /// `COST`.
    Cost,
    /// `COMPLETE`.
    Complete,
    /// Session liveness loss.
    SessionDied,
}

impl NotifyCategory {
    /// Categories delivered when none are configured.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::PhaseEnd,
            Self::Clarify,
            Self::Error,
            Self::Complete,
            Self::SessionDied,
        ]
    }
}
