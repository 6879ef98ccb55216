//! Event observers: where run lifecycle events go.
//!
//! The run monitor calls [`EventObserver::on_event`] once per event, in log
//! order, and awaits it before handling the next one. Implementations are
//! shared across monitors, so they must tolerate concurrent calls.

pub mod journal;
pub mod webhook;

use std::sync::Arc;

use tracing::info;

pub use journal::JournalObserver;
pub use webhook::WebhookObserver;

use crate::models::event::FactoryEvent;
use crate::session::BoxFuture;
use crate::{AppError, Result};

/// Receives lifecycle events from run monitors.
pub trait EventObserver: Send + Sync {
    /// Handle one event.
    ///
    /// # Errors
    ///
    /// Any error is logged by the caller and otherwise ignored.
    fn on_event<'a>(&'a self, event: &'a FactoryEvent) -> BoxFuture<'a, Result<()>>;
}

/// Emits one structured log line per event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl EventObserver for TracingObserver {
    fn on_event<'a>(&'a self, event: &'a FactoryEvent) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            info!(
                project = %event.project,
                engine = %event.engine,
                category = ?event.kind.category(),
                text = %event.describe(),
                "factory event"
            );
            Ok(())
        })
    }
}

/// Forwards every event to each inner observer in order.
///
/// All observers are called even when an earlier one fails; the failures are
/// joined into a single error.
#[derive(Clone, Default)]
pub struct FanoutObserver {
    observers: Vec<Arc<dyn EventObserver>>,
}

impl FanoutObserver {
    /// Empty fan-out.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observer.
    #[must_use]
    pub fn with(mut self, observer: Arc<dyn EventObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Number of inner observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Whether there are no inner observers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl EventObserver for FanoutObserver {
    fn on_event<'a>(&'a self, event: &'a FactoryEvent) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut failures = Vec::new();
            for observer in &self.observers {
                if let Err(err) = observer.on_event(event).await {
                    failures.push(err.to_string());
                }
            }
            if failures.is_empty() {
                Ok(())
            } else {
                Err(AppError::Notify(failures.join("; ")))
            }
        })
    }
}
