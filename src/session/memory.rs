//! In-process [`Multiplexer`] for tests and dry runs.
//!
//! Sessions are plain map entries. Keystrokes are recorded rather than
//! executed, and helpers let a test kill a session "out of band" the way a
//! crashed agent or an operator would.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{BoxFuture, Multiplexer};
use crate::{AppError, Result};

#[derive(Debug, Default)]
struct MemSession {
    work_dir: PathBuf,
    keys: Vec<String>,
    pane: String,
}

/// Multiplexer whose sessions live in a map.
#[derive(Debug, Default)]
pub struct InMemoryMultiplexer {
    sessions: Mutex<HashMap<String, MemSession>>,
    fail_create: AtomicBool,
}

impl InMemoryMultiplexer {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, MemSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove a session without going through [`SessionHandle`](super::SessionHandle).
    pub fn kill_out_of_band(&self, name: &str) -> bool {
        self.lock().remove(name).is_some()
    }

    /// Every keystroke line sent to `name`, oldest first.
    #[must_use]
    pub fn sent_keys(&self, name: &str) -> Vec<String> {
        self.lock()
            .get(name)
            .map(|s| s.keys.clone())
            .unwrap_or_default()
    }

    /// Working directory the session was created in.
    #[must_use]
    pub fn work_dir(&self, name: &str) -> Option<PathBuf> {
        self.lock().get(name).map(|s| s.work_dir.clone())
    }

    /// Replace the captured pane text for `name`.
    pub fn set_pane(&self, name: &str, text: impl Into<String>) {
        if let Some(session) = self.lock().get_mut(name) {
            session.pane = text.into();
        }
    }

    /// Make subsequent `create_session` calls fail.
    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }
}

impl Multiplexer for InMemoryMultiplexer {
    fn create_session<'a>(&'a self, name: &'a str, work_dir: &'a Path) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(AppError::Session(format!(
                    "failed to create session {name}"
                )));
            }
            let mut sessions = self.lock();
            if sessions.contains_key(name) {
                return Err(AppError::Session(format!("duplicate session: {name}")));
            }
            sessions.insert(
                name.to_owned(),
                MemSession {
                    work_dir: work_dir.to_path_buf(),
                    ..MemSession::default()
                },
            );
            Ok(())
        })
    }

    fn kill_session<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { Ok(self.lock().remove(name).is_some()) })
    }

    fn send_keys<'a>(&'a self, name: &'a str, keys: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut sessions = self.lock();
            let session = sessions
                .get_mut(name)
                .ok_or_else(|| AppError::Session(format!("can't find session: {name}")))?;
            session.keys.push(keys.to_owned());
            Ok(())
        })
    }

    fn capture_pane<'a>(&'a self, name: &'a str, lines: usize) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let sessions = self.lock();
            let session = sessions
                .get(name)
                .ok_or_else(|| AppError::Session(format!("can't find session: {name}")))?;
            let all: Vec<&str> = session.pane.lines().collect();
            let skip = all.len().saturating_sub(lines);
            Ok(all[skip..].join("\n"))
        })
    }

    fn list_sessions(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let mut names: Vec<String> = self.lock().keys().cloned().collect();
            names.sort();
            Ok(names)
        })
    }

    fn has_session<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { Ok(self.lock().contains_key(name)) })
    }
}
