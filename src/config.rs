//! Factory configuration parsing and validation.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::models::event::NotifyCategory;
use crate::orchestrator::log_monitor::MonitorSettings;
use crate::{AppError, Result};

/// Environment variable overriding `factory_root`.
pub const ENV_FACTORY_ROOT: &str = "FACTORY_ROOT";

/// Environment variable overriding `state_dir`.
pub const ENV_STATE_DIR: &str = "FACTORY_STATE_DIR";

/// Environment variable overriding `ipc_auth_token`.
pub const ENV_IPC_TOKEN: &str = "FACTORY_IPC_TOKEN";

/// Multiplexer settings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TmuxConfig {
    /// Dedicated tmux server socket (`tmux -L`); default server when unset.
    #[serde(default)]
    pub socket_name: Option<String>,
}

/// Outbound notification settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct NotificationConfig {
    /// Event categories delivered to the webhook.
    #[serde(default = "NotifyCategory::defaults")]
    pub events: Vec<NotifyCategory>,
    /// Webhook receiving JSON notifications; disabled when unset.
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Per-request webhook timeout.
    #[serde(default = "default_ten")]
    pub webhook_timeout_seconds: u64,
    /// Directory for the JSONL event journal; `<state_dir>/events` when unset.
    #[serde(default)]
    pub journal_dir: Option<PathBuf>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            events: NotifyCategory::defaults(),
            webhook_url: None,
            webhook_timeout_seconds: default_ten(),
            journal_dir: None,
        }
    }
}

fn default_ten() -> u64 {
    10
}

fn default_poll_interval_ms() -> u64 {
    3000
}

fn default_ipc_name() -> String {
    "project-factory".into()
}

fn default_factory_root() -> PathBuf {
    PathBuf::from("/home/factory/projects")
}

fn default_state_dir() -> PathBuf {
    env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".factory-bot")
}

/// Factory configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct FactoryConfig {
    /// Directory holding one working directory per `(project, engine)`.
    #[serde(default = "default_factory_root")]
    pub factory_root: PathBuf,
    /// Directory for the database and journal.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Directory of engine instruction templates.
    #[serde(default)]
    pub templates_dir: Option<PathBuf>,
    /// Local socket name for the control channel.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
    /// Shared secret every control request must carry; unset disables the check.
    #[serde(default)]
    pub ipc_auth_token: Option<String>,
    /// Sleep between monitor ticks.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Bound on multiplexer, git, and log I/O calls.
    #[serde(default = "default_ten")]
    pub command_timeout_seconds: u64,
    /// Bound on engine version probes.
    #[serde(default = "default_ten")]
    pub health_check_timeout_seconds: u64,
    /// Multiplexer settings.
    #[serde(default)]
    pub tmux: TmuxConfig,
    /// Notification settings.
    #[serde(default)]
    pub notifications: NotificationConfig,
}

impl FactoryConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read, contains
    /// invalid TOML, or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string, apply environment overrides,
    /// and validate.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Database file location.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.state_dir.join("factory.db")
    }

    /// Event journal directory.
    #[must_use]
    pub fn journal_dir(&self) -> PathBuf {
        self.notifications
            .journal_dir
            .clone()
            .unwrap_or_else(|| self.state_dir.join("events"))
    }

    /// Multiplexer, git, and log I/O timeout.
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds)
    }

    /// Engine probe timeout.
    #[must_use]
    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_seconds)
    }

    /// Monitor timing derived from this configuration.
    #[must_use]
    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            io_timeout: self.command_timeout(),
            ..MonitorSettings::default()
        }
    }

    fn apply_env(&mut self) {
        if let Some(root) = env::var_os(ENV_FACTORY_ROOT).filter(|v| !v.is_empty()) {
            self.factory_root = PathBuf::from(root);
        }
        if let Some(dir) = env::var_os(ENV_STATE_DIR).filter(|v| !v.is_empty()) {
            self.state_dir = PathBuf::from(dir);
        }
        if let Some(token) = env::var(ENV_IPC_TOKEN).ok().filter(|v| !v.is_empty()) {
            self.ipc_auth_token = Some(token);
        }
    }

    fn validate(&mut self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.command_timeout_seconds == 0 {
            return Err(AppError::Config(
                "command_timeout_seconds must be greater than zero".into(),
            ));
        }
        if self.health_check_timeout_seconds == 0 {
            return Err(AppError::Config(
                "health_check_timeout_seconds must be greater than zero".into(),
            ));
        }
        if self.notifications.webhook_timeout_seconds == 0 {
            return Err(AppError::Config(
                "notifications.webhook_timeout_seconds must be greater than zero".into(),
            ));
        }
        if self.ipc_name.trim().is_empty() {
            return Err(AppError::Config("ipc_name must not be empty".into()));
        }
        if self
            .ipc_auth_token
            .as_deref()
            .is_some_and(|token| token.trim().is_empty())
        {
            return Err(AppError::Config("ipc_auth_token must not be empty".into()));
        }

        self.factory_root = ensure_dir(&self.factory_root, "factory_root")?;
        self.state_dir = ensure_dir(&self.state_dir, "state_dir")?;

        if let Some(ref templates) = self.templates_dir {
            match templates.canonicalize() {
                Ok(path) => self.templates_dir = Some(path),
                Err(err) => {
                    warn!(path = %templates.display(), %err, "templates_dir unavailable; templates disabled");
                    self.templates_dir = None;
                }
            }
        }

        Ok(())
    }
}

fn ensure_dir(path: &Path, field: &str) -> Result<PathBuf> {
    fs::create_dir_all(path)
        .map_err(|err| AppError::Config(format!("{field} cannot be created: {err}")))?;
    path.canonicalize()
        .map_err(|err| AppError::Config(format!("{field} invalid: {err}")))
}
