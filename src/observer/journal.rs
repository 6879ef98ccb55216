//! JSONL event journal with daily file rotation.

use std::{
    fs::{self, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::EventObserver;
use crate::models::event::FactoryEvent;
use crate::session::BoxFuture;
use crate::{AppError, Result};

/// One journal line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalEntry {
    /// Time the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// The event itself, flattened into the line.
    #[serde(flatten)]
    pub event: FactoryEvent,
}

struct WriterState {
    current_date: NaiveDate,
    writer: BufWriter<fs::File>,
}

/// Appends one JSON object per event to `<dir>/events-YYYY-MM-DD.jsonl`.
///
/// A new file is opened when the calendar date (UTC) changes between writes.
pub struct JournalObserver {
    dir: PathBuf,
    state: Mutex<Option<WriterState>>,
}

impl JournalObserver {
    /// Construct a journal that writes into `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] if the directory cannot be created.
    pub fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).map_err(|e| {
            AppError::Config(format!(
                "failed to create journal directory {}: {e}",
                dir.display()
            ))
        })?;
        Ok(Self {
            dir,
            state: Mutex::new(None),
        })
    }

    /// Path of the journal file for `date`.
    #[must_use]
    pub fn file_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("events-{date}.jsonl"))
    }

    fn open_for_date(dir: &Path, date: NaiveDate) -> Result<BufWriter<fs::File>> {
        let path = dir.join(format!("events-{date}.jsonl"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| AppError::Io(format!("failed to open journal {}: {e}", path.display())))?;
        Ok(BufWriter::new(file))
    }

    /// Append `event` synchronously.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the line cannot be written.
    pub fn append(&self, event: &FactoryEvent) -> Result<()> {
        let now = Utc::now();
        let today = now.date_naive();

        let mut guard = self
            .state
            .lock()
            .map_err(|_| AppError::Io("journal mutex poisoned".into()))?;

        if guard.as_ref().is_none_or(|s| s.current_date != today) {
            *guard = Some(WriterState {
                current_date: today,
                writer: Self::open_for_date(&self.dir, today)?,
            });
        }

        if let Some(state) = guard.as_mut() {
            let entry = JournalEntry {
                timestamp: now,
                event: event.clone(),
            };
            let line = serde_json::to_string(&entry)
                .map_err(|e| AppError::Io(format!("failed to serialize journal entry: {e}")))?;
            if let Err(e) = writeln!(state.writer, "{line}").and_then(|()| state.writer.flush()) {
                warn!("failed to write journal entry: {e}");
                return Err(AppError::Io(format!("journal write failed: {e}")));
            }
        }

        Ok(())
    }
}

impl EventObserver for JournalObserver {
    fn on_event<'a>(&'a self, event: &'a FactoryEvent) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.append(event) })
    }
}
