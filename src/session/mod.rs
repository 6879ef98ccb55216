//! Agent session handling over a terminal multiplexer.
//!
//! The [`Multiplexer`] trait is the only seam to the external session
//! registry (tmux in production). [`SessionHandle`] layers the naming scheme,
//! working-directory layout, and stop sentinel on top of it.

pub mod layout;
pub mod memory;
pub mod tmux;

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, info, info_span, warn, Instrument};

pub use layout::WorkspaceLayout;

use crate::Result;

/// Boxed, sendable future returned by [`Multiplexer`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Primitive operations on an external session registry, addressed by name.
pub trait Multiplexer: Send + Sync {
    /// Create a detached session rooted at `work_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Session`](crate::AppError::Session) if the session cannot be created.
    fn create_session<'a>(&'a self, name: &'a str, work_dir: &'a Path) -> BoxFuture<'a, Result<()>>;

    /// Destroy a session. Resolves to `false` when no such session existed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Session`](crate::AppError::Session) if the multiplexer could not be queried.
    fn kill_session<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool>>;

    /// Type `keys` into the session followed by Enter.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Session`](crate::AppError::Session) if the keystrokes cannot be delivered.
    fn send_keys<'a>(&'a self, name: &'a str, keys: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Capture the last `lines` lines of the session's visible output.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Session`](crate::AppError::Session) if the pane cannot be read.
    fn capture_pane<'a>(&'a self, name: &'a str, lines: usize) -> BoxFuture<'a, Result<String>>;

    /// Names of every known session.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Session`](crate::AppError::Session) if the registry cannot be listed.
    fn list_sessions(&self) -> BoxFuture<'_, Result<Vec<String>>>;

    /// Whether the session exists.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Session`](crate::AppError::Session) only when the
    /// registry could not be asked at all (spawn failure, timeout); a missing
    /// session is `Ok(false)`.
    fn has_session<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool>>;
}

/// Session naming, start, stop, liveness, and capture for project engines.
#[derive(Clone)]
pub struct SessionHandle {
    mux: Arc<dyn Multiplexer>,
    layout: WorkspaceLayout,
}

impl SessionHandle {
    /// Wrap a multiplexer with the given directory layout.
    #[must_use]
    pub fn new(mux: Arc<dyn Multiplexer>, layout: WorkspaceLayout) -> Self {
        Self { mux, layout }
    }

    /// Deterministic session name for `(project, engine)`.
    ///
    /// Engine keys never contain `-`, so the last `-` always separates the
    /// two fields and distinct pairs never collide.
    #[must_use]
    pub fn session_name(project: &str, engine: &str) -> String {
        format!("{project}-{engine}")
    }

    /// Directory layout used for working directories and sentinels.
    #[must_use]
    pub fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    /// Replace any existing session for `(project, engine)` with a fresh one
    /// running `start_command` in `work_dir`. Returns the session name.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Session` if the session cannot be created or the
    /// start command cannot be injected.
    pub async fn start(
        &self,
        project: &str,
        engine: &str,
        work_dir: &Path,
        start_command: &str,
    ) -> Result<String> {
        let name = Self::session_name(project, engine);
        let span = info_span!("session_start", session = %name);
        async {
            match self.mux.kill_session(&name).await {
                Ok(true) => info!("replaced existing session"),
                Ok(false) => {}
                Err(err) => warn!(%err, "failed to tear down existing session"),
            }

            self.mux.create_session(&name, work_dir).await?;
            self.mux.send_keys(&name, start_command).await?;
            info!(work_dir = %work_dir.display(), "session started");
            Ok(name.clone())
        }
        .instrument(span)
        .await
    }

    /// Touch the stop sentinel and force-kill the session.
    ///
    /// Returns whether a session was killed; a missing session yields `false`.
    pub async fn stop(&self, project: &str, engine: &str) -> bool {
        let name = Self::session_name(project, engine);
        let sentinel = self.layout.stop_file(project, engine);
        if let Err(err) = tokio::fs::write(&sentinel, b"").await {
            warn!(%err, path = %sentinel.display(), "failed to write stop sentinel");
        }

        match self.mux.kill_session(&name).await {
            Ok(killed) => {
                info!(session = %name, killed, "session stop requested");
                killed
            }
            Err(err) => {
                warn!(%err, session = %name, "failed to kill session");
                false
            }
        }
    }

    /// Whether the session for `(project, engine)` exists; `false` when unknown.
    pub async fn is_alive(&self, project: &str, engine: &str) -> bool {
        self.liveness(project, engine).await.unwrap_or(false)
    }

    /// Liveness probe that distinguishes "gone" from "could not ask".
    ///
    /// # Errors
    ///
    /// Returns `AppError::Session` when the multiplexer did not answer.
    pub async fn liveness(&self, project: &str, engine: &str) -> Result<bool> {
        let name = Self::session_name(project, engine);
        self.mux.has_session(&name).await.inspect_err(|err| {
            debug!(%err, session = %name, "liveness probe failed");
        })
    }

    /// Best-effort snapshot of recent output; empty on any failure.
    pub async fn capture_output(&self, project: &str, engine: &str, line_limit: usize) -> String {
        let name = Self::session_name(project, engine);
        match self.mux.capture_pane(&name, line_limit).await {
            Ok(text) => text.trim().to_owned(),
            Err(err) => {
                debug!(%err, session = %name, "capture failed");
                String::new()
            }
        }
    }

    /// Every session known to the multiplexer; empty on failure.
    pub async fn list_active(&self) -> Vec<String> {
        match self.mux.list_sessions().await {
            Ok(names) => names,
            Err(err) => {
                debug!(%err, "listing sessions failed");
                Vec::new()
            }
        }
    }
}
