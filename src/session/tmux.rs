//! `tmux`-backed [`Multiplexer`].
//!
//! Every call spawns a short-lived `tmux` process bounded by the configured
//! timeout, so a wedged tmux server cannot stall a run monitor. Targets use
//! the `=name` form to force exact session-name matching.

use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use super::{BoxFuture, Multiplexer};
use crate::{AppError, Result};

/// Multiplexer that shells out to the `tmux` binary.
#[derive(Debug, Clone)]
pub struct TmuxMultiplexer {
    binary: String,
    socket_name: Option<String>,
    timeout: Duration,
}

impl TmuxMultiplexer {
    /// Use the default tmux server.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            binary: "tmux".into(),
            socket_name: None,
            timeout,
        }
    }

    /// Use a dedicated tmux server socket (`tmux -L <name>`).
    #[must_use]
    pub fn with_socket(mut self, socket_name: Option<String>) -> Self {
        self.socket_name = socket_name;
        self
    }

    fn session_target(name: &str) -> String {
        format!("={name}")
    }

    fn pane_target(name: &str) -> String {
        format!("={name}:")
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        let mut cmd = Command::new(&self.binary);
        if let Some(ref socket) = self.socket_name {
            cmd.arg("-L").arg(socket);
        }
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let verb = args.first().copied().unwrap_or_default();
        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => Err(AppError::Session(format!("failed to run tmux {verb}: {err}"))),
            Err(_) => Err(AppError::Session(format!(
                "tmux {verb} timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }

    async fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args).await?;
        if output.status.success() {
            Ok(output)
        } else {
            let verb = args.first().copied().unwrap_or_default();
            Err(AppError::Session(format!(
                "tmux {verb} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

impl Multiplexer for TmuxMultiplexer {
    fn create_session<'a>(&'a self, name: &'a str, work_dir: &'a Path) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let dir = work_dir.to_string_lossy();
            self.run_checked(&["new-session", "-d", "-s", name, "-c", &dir])
                .await?;
            Ok(())
        })
    }

    fn kill_session<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let target = Self::session_target(name);
            let output = self.run(&["kill-session", "-t", &target]).await?;
            if !output.status.success() {
                debug!(
                    session = name,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "kill-session found nothing to kill"
                );
            }
            Ok(output.status.success())
        })
    }

    fn send_keys<'a>(&'a self, name: &'a str, keys: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let target = Self::pane_target(name);
            self.run_checked(&["send-keys", "-t", &target, keys, "Enter"])
                .await?;
            Ok(())
        })
    }

    fn capture_pane<'a>(&'a self, name: &'a str, lines: usize) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let target = Self::pane_target(name);
            let start = format!("-{lines}");
            let output = self
                .run_checked(&["capture-pane", "-t", &target, "-p", "-S", &start])
                .await?;
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        })
    }

    fn list_sessions(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let output = self.run(&["list-sessions", "-F", "#{session_name}"]).await?;
            if !output.status.success() {
                // No server running means no sessions.
                return Ok(Vec::new());
            }
            Ok(String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect())
        })
    }

    fn has_session<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let target = Self::session_target(name);
            let output = self.run(&["has-session", "-t", &target]).await?;
            Ok(output.status.success())
        })
    }
}
