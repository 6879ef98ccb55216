//! Installed-version probes for registered engines.

use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info_span, Instrument};

use super::EngineDescriptor;

/// Longest error text kept from a failed probe.
const MAX_ERROR_LEN: usize = 200;

/// Result of probing one engine.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EngineStatus {
    /// Engine key.
    pub engine: String,
    /// Whether the health-check command succeeded.
    pub installed: bool,
    /// First line of the version output when installed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Failure description when not installed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EngineStatus {
    fn missing(engine: &str, error: impl Into<String>) -> Self {
        let mut error: String = error.into();
        if error.len() > MAX_ERROR_LEN {
            let cut = (0..=MAX_ERROR_LEN)
                .rev()
                .find(|i| error.is_char_boundary(*i))
                .unwrap_or(0);
            error.truncate(cut);
        }
        Self {
            engine: engine.to_owned(),
            installed: false,
            version: None,
            error: Some(error),
        }
    }
}

/// Run the engine's health-check command with a timeout.
///
/// Never fails: unknown keys, spawn errors, non-zero exits, and timeouts are
/// all reported as "not installed".
pub async fn check_engine(key: &str, timeout: Duration) -> EngineStatus {
    let Ok(engine) = super::get(key) else {
        return EngineStatus::missing(key, format!("unknown engine: {key}"));
    };
    probe(engine, timeout)
        .instrument(info_span!("check_engine", engine = key))
        .await
}

/// Probe every registered engine concurrently.
pub async fn check_all(timeout: Duration) -> Vec<EngineStatus> {
    let probes = super::all().iter().map(|e| check_engine(e.key, timeout));
    futures_util::future::join_all(probes).await
}

async fn probe(engine: &EngineDescriptor, timeout: Duration) -> EngineStatus {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(engine.check)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => return EngineStatus::missing(engine.key, err.to_string()),
        Err(_) => {
            return EngineStatus::missing(
                engine.key,
                format!("health check timed out after {}s", timeout.as_secs()),
            )
        }
    };

    if output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let version = stdout.trim().lines().next().unwrap_or_default().to_owned();
        debug!(engine = engine.key, version, "engine installed");
        EngineStatus {
            engine: engine.key.to_owned(),
            installed: true,
            version: Some(version),
            error: None,
        }
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        EngineStatus::missing(engine.key, stderr.trim())
    }
}
