//! Local IPC server for `project-factory-ctl` commands.
//!
//! Listens on a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! using the `interprocess` crate. Accepts line-delimited JSON commands and
//! routes them to the [`Factory`].
//!
//! ## Protocol
//!
//! Request (one JSON object per line):
//! ```json
//! {"command": "list"}
//! {"command": "status", "name": "todo-app"}
//! {"command": "launch", "new_project": {"name": "todo-app", "engines": ["claude"], "requirements": "..."}}
//! {"command": "stop", "name": "todo-app", "engine": "claude"}
//! {"command": "logs", "name": "todo-app", "lines": 100}
//! {"command": "health", "auth_token": "s3cret"}
//! ```
//!
//! When the server has an `ipc_auth_token`, requests without the matching
//! `auth_token` are answered with `unauthorized`.
//!
//! Response (one JSON object per line):
//! ```json
//! {"ok": true, "data": { ... } }
//! {"ok": false, "error": "not found: project not found: todo-app"}
//! ```

use std::sync::Arc;

use interprocess::local_socket::{tokio::prelude::*, GenericNamespaced, ListenerOptions};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::engines;
use crate::models::project::NewProject;
use crate::orchestrator::factory::Factory;
use crate::{AppError, Result};

/// Default number of lines returned by `logs`.
pub const DEFAULT_LOG_LINES: usize = 50;

/// Inbound IPC request.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct IpcRequest {
    /// Command verb.
    pub command: String,
    /// Project name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Engine key (for `stop`, `logs`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    /// Line count (for `logs`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines: Option<usize>,
    /// Project definition (for `create`, `launch`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_project: Option<NewProject>,
    /// Shared-secret authentication token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl IpcRequest {
    /// Request with only a command verb.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    fn require_name(&self) -> Result<&str> {
        self.name
            .as_deref()
            .ok_or_else(|| AppError::InvalidInput(format!("{} requires a project name", self.command)))
    }

    fn require_new_project(&self) -> Result<&NewProject> {
        self.new_project
            .as_ref()
            .ok_or_else(|| AppError::InvalidInput(format!("{} requires new_project", self.command)))
    }
}

/// Outbound IPC response.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct IpcResponse {
    /// Whether the command succeeded.
    pub ok: bool,
    /// Payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IpcResponse {
    fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }

    fn from_result<T: Serialize>(result: Result<T>) -> Self {
        match result.and_then(|value| {
            serde_json::to_value(value)
                .map_err(|err| AppError::Ipc(format!("failed to encode response: {err}")))
        }) {
            Ok(data) => Self::success(data),
            Err(err) => Self::error(err.to_string()),
        }
    }
}

/// Spawn the IPC server task.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the listener cannot be created.
pub fn spawn_ipc_server(
    name: &str,
    factory: Arc<Factory>,
    auth_token: Option<String>,
    ct: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let name = name.to_owned();
    let auth_token: Option<Arc<str>> = auth_token.map(Arc::from);

    let listener_name = name
        .clone()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Ipc(format!("invalid ipc socket name '{name}': {err}")))?;

    let listener = ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| AppError::Ipc(format!("failed to create ipc listener: {err}")))?;

    info!(ipc_name = %name, auth = auth_token.is_some(), "IPC server listening");

    let handle = tokio::spawn(async move {
        let span = info_span!("ipc_server", name = %name);
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("IPC server shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                tokio::spawn(handle_connection(
                                    stream,
                                    Arc::clone(&factory),
                                    auth_token.clone(),
                                ));
                            }
                            Err(err) => {
                                warn!(%err, "IPC accept failed");
                            }
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await;
    });

    Ok(handle)
}

/// Handle a single IPC client connection.
async fn handle_connection(
    stream: interprocess::local_socket::tokio::Stream,
    factory: Arc<Factory>,
    auth_token: Option<Arc<str>>,
) {
    let span = info_span!("ipc_conn");
    async move {
        let (reader, mut writer) = stream.split();
        let mut buf_reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            match buf_reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let response = match serde_json::from_str::<IpcRequest>(trimmed) {
                        Ok(request) => {
                            dispatch_authenticated(&factory, auth_token.as_deref(), &request).await
                        }
                        Err(err) => IpcResponse::error(format!("invalid json: {err}")),
                    };

                    let mut response_line = serde_json::to_string(&response).unwrap_or_else(|_| {
                        r#"{"ok":false,"error":"serialization failed"}"#.to_owned()
                    });
                    response_line.push('\n');

                    if let Err(err) = writer.write_all(response_line.as_bytes()).await {
                        warn!(%err, "failed to write ipc response");
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "ipc read error");
                    break;
                }
            }
        }

        info!("IPC connection closed");
    }
    .instrument(span)
    .await;
}

/// Check the request's token against `expected`, then [`dispatch`] it.
///
/// With no expected token every request is accepted.
pub async fn dispatch_authenticated(
    factory: &Factory,
    expected: Option<&str>,
    request: &IpcRequest,
) -> IpcResponse {
    if let Some(expected) = expected {
        if request.auth_token.as_deref() != Some(expected) {
            warn!(command = %request.command, "IPC request rejected: invalid auth token");
            return IpcResponse::error("unauthorized");
        }
    }
    dispatch(factory, request).await
}

/// Route one request to the factory.
pub async fn dispatch(factory: &Factory, request: &IpcRequest) -> IpcResponse {
    let span = info_span!("ipc_command", command = %request.command);
    async {
        match request.command.as_str() {
            "list" => IpcResponse::from_result(factory.repo().list_projects().await),
            "status" => match request.require_name() {
                Ok(name) => IpcResponse::from_result(factory.status(name).await),
                Err(err) => IpcResponse::error(err.to_string()),
            },
            "create" => match request.require_new_project() {
                Ok(input) => IpcResponse::from_result(factory.create_project(input).await),
                Err(err) => IpcResponse::error(err.to_string()),
            },
            "launch" => match request.require_new_project() {
                Ok(input) => IpcResponse::from_result(factory.launch(input).await),
                Err(err) => IpcResponse::error(err.to_string()),
            },
            "start" => match request.require_name() {
                Ok(name) => IpcResponse::from_result(factory.start_project(name).await),
                Err(err) => IpcResponse::error(err.to_string()),
            },
            "stop" => match (request.require_name(), request.engine.as_deref()) {
                (Ok(name), Some(engine)) => IpcResponse::from_result(
                    factory
                        .stop_engine(name, engine)
                        .await
                        .map(|killed| json!({ engine: killed })),
                ),
                (Ok(name), None) => IpcResponse::from_result(factory.stop_project(name).await),
                (Err(err), _) => IpcResponse::error(err.to_string()),
            },
            "logs" => match request.require_name() {
                Ok(name) => IpcResponse::from_result(
                    factory
                        .logs(
                            name,
                            request.engine.as_deref(),
                            request.lines.unwrap_or(DEFAULT_LOG_LINES),
                        )
                        .await,
                ),
                Err(err) => IpcResponse::error(err.to_string()),
            },
            "engines" => {
                let status = factory.engine_inventory().await;
                IpcResponse::from_result(Ok(json!({
                    "catalogue": engines::all(),
                    "status": status,
                })))
            }
            "health" => IpcResponse::from_result(factory.health().await),
            "sessions" => IpcResponse::from_result(Ok(factory.sessions().list_active().await)),
            "monitors" => IpcResponse::from_result(Ok(factory.active_monitors())),
            other => {
                warn!(command = other, "unknown IPC command");
                IpcResponse::error(format!("unknown command: {other}"))
            }
        }
    }
    .instrument(span)
    .await
}
