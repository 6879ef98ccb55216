//! Project lifecycle orchestration.
//!
//! [`Factory`] ties the session handle, run store, observer, and the
//! registry of live monitors together. It is the only place that starts or
//! stops monitors; the monitors themselves own run status while they run.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::log_monitor::{deliver, LogMonitor, MonitorDeps, MonitorSettings, MonitorState};
use super::workspace::{prepare_workspace, WorkspacePlan};
use crate::config::FactoryConfig;
use crate::engines::system::{system_health, SystemHealth};
use crate::engines::{self, health::EngineStatus};
use crate::models::event::{EventKind, FactoryEvent};
use crate::models::project::{validate_project_name, NewProject, Project};
use crate::models::run::{Run, RunStatus, RunUpdate};
use crate::observer::EventObserver;
use crate::persistence::project_repo::ProjectRepo;
use crate::session::{Multiplexer, SessionHandle, WorkspaceLayout};
use crate::{AppError, Result};

/// Lines of pane output included in a status report.
const STATUS_TAIL_LINES: usize = 10;

/// Placeholder returned by [`Factory::logs`] when there is nothing to show.
pub const NO_LOG: &str = "(no log)";

type MonitorKey = (String, String);

/// Tunables not covered by the collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactoryOptions {
    /// Engine instruction templates.
    pub templates_dir: Option<PathBuf>,
    /// Monitor timing.
    pub monitor: MonitorSettings,
    /// Bound on git calls during workspace setup.
    pub command_timeout: Duration,
    /// Bound on engine version probes.
    pub health_check_timeout: Duration,
}

impl Default for FactoryOptions {
    fn default() -> Self {
        Self {
            templates_dir: None,
            monitor: MonitorSettings::default(),
            command_timeout: Duration::from_secs(10),
            health_check_timeout: Duration::from_secs(10),
        }
    }
}

impl FactoryOptions {
    /// Options taken from the loaded configuration.
    #[must_use]
    pub fn from_config(config: &FactoryConfig) -> Self {
        Self {
            templates_dir: config.templates_dir.clone(),
            monitor: config.monitor_settings(),
            command_timeout: config.command_timeout(),
            health_check_timeout: config.health_check_timeout(),
        }
    }
}

/// Liveness and recent output for one engine of a project.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EngineReport {
    /// Engine key.
    pub engine: String,
    /// Whether its session exists.
    pub alive: bool,
    /// State of its monitor, if one is registered.
    pub monitor: Option<MonitorState>,
    /// Last lines of pane output; empty when dead.
    pub tail: String,
}

/// Answer to [`Factory::status`].
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusReport {
    /// Stored project record with runs.
    pub project: Project,
    /// One entry per project engine.
    pub engines: Vec<EngineReport>,
}

/// Where a [`LogExcerpt`] came from.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    /// Live pane capture.
    Pane,
    /// Tail of the run log file.
    File,
    /// Nothing available.
    None,
}

/// Recent output for one engine.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LogExcerpt {
    /// Engine key.
    pub engine: String,
    /// Origin of `text`.
    pub source: LogSource,
    /// The output.
    pub text: String,
}

/// A registered monitor.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MonitorInfo {
    /// Project name.
    pub project: String,
    /// Engine key.
    pub engine: String,
    /// Lifecycle state.
    pub state: MonitorState,
}

/// Outcome of [`Factory::recover`].
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RecoveryReport {
    /// `(project, engine)` pairs whose monitor was resumed.
    pub resumed: Vec<(String, String)>,
    /// `(project, engine)` pairs whose session was gone.
    pub failed: Vec<(String, String)>,
}

/// Host utilisation plus the live multiplexer sessions.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HealthReport {
    /// CPU, memory, and factory-root disk usage.
    pub system: SystemHealth,
    /// Names of every live session.
    pub sessions: Vec<String>,
}

/// Owns the project lifecycle.
pub struct Factory {
    sessions: SessionHandle,
    repo: ProjectRepo,
    observer: Arc<dyn EventObserver>,
    options: FactoryOptions,
    monitors: Mutex<HashMap<MonitorKey, Arc<LogMonitor>>>,
}

impl Factory {
    /// Assemble a factory.
    #[must_use]
    pub fn new(
        layout: WorkspaceLayout,
        mux: Arc<dyn Multiplexer>,
        repo: ProjectRepo,
        observer: Arc<dyn EventObserver>,
        options: FactoryOptions,
    ) -> Self {
        Self {
            sessions: SessionHandle::new(mux, layout),
            repo,
            observer,
            options,
            monitors: Mutex::new(HashMap::new()),
        }
    }

    /// Session handle used for all multiplexer access.
    #[must_use]
    pub fn sessions(&self) -> &SessionHandle {
        &self.sessions
    }

    /// Run state store.
    #[must_use]
    pub fn repo(&self) -> &ProjectRepo {
        &self.repo
    }

    fn layout(&self) -> &WorkspaceLayout {
        self.sessions.layout()
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<MonitorKey, Arc<LogMonitor>>> {
        self.monitors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deps(&self) -> MonitorDeps {
        MonitorDeps {
            sessions: self.sessions.clone(),
            repo: self.repo.clone(),
            observer: Arc::clone(&self.observer),
            settings: self.options.monitor,
        }
    }

    /// Validate and persist a new project.
    ///
    /// Engine keys are de-duplicated, keeping first occurrences in order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidInput` for a bad name or an empty engine
    /// list, `AppError::NotFound` for an unknown engine, and
    /// `AppError::Conflict` when the name is taken.
    pub async fn create_project(&self, input: &NewProject) -> Result<Project> {
        validate_project_name(&input.name)?;

        let mut engines: Vec<String> = Vec::with_capacity(input.engines.len());
        for key in &input.engines {
            engines::get(key)?;
            if !engines.contains(key) {
                engines.push(key.clone());
            }
        }
        if engines.is_empty() {
            return Err(AppError::InvalidInput(
                "at least one engine is required".into(),
            ));
        }

        let normalized = NewProject {
            engines,
            ..input.clone()
        };
        let project = self.repo.create_project(&normalized).await?;
        info!(project = %project.name, engines = ?project.engines, "project created");
        Ok(project)
    }

    /// Start every engine of an existing project.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown project, or the first
    /// workspace, session, or store failure.
    pub async fn start_project(&self, name: &str) -> Result<Vec<Run>> {
        let project = self.repo.get_project(name).await?;
        let span = info_span!("start_project", project = %project.name);
        async {
            let mut runs = Vec::with_capacity(project.engines.len());
            for engine in &project.engines {
                runs.push(self.start_engine(&project, engine).await?);
            }
            Ok(runs)
        }
        .instrument(span)
        .await
    }

    /// [`create_project`](Self::create_project) then
    /// [`start_project`](Self::start_project); returns the refreshed project.
    ///
    /// # Errors
    ///
    /// Propagates errors from either step.
    pub async fn launch(&self, input: &NewProject) -> Result<Project> {
        let project = self.create_project(input).await?;
        self.start_project(&project.name).await?;
        self.repo.get_project(&project.name).await
    }

    async fn start_engine(&self, project: &Project, engine: &str) -> Result<Run> {
        let descriptor = engines::get(engine)?;
        let layout = self.layout();
        let work_dir = layout.project_dir(&project.name, engine);

        if !tokio::fs::try_exists(&work_dir).await.unwrap_or(false) {
            let plan = WorkspacePlan {
                project: &project.name,
                engine: descriptor,
                requirements: &project.requirements,
                templates_dir: self.options.templates_dir.as_deref(),
                git_timeout: self.options.command_timeout,
            };
            prepare_workspace(layout, &plan).await?;
        }

        let key = (project.name.clone(), engine.to_owned());
        let previous = self.registry().remove(&key);
        if let Some(previous) = previous {
            previous.stop_and_wait().await;
        }

        let sentinel = layout.stop_file(&project.name, engine);
        if let Err(err) = tokio::fs::remove_file(&sentinel).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(%err, path = %sentinel.display(), "failed to clear stop sentinel");
            }
        }

        // Markers already in the log belong to earlier runs.
        let log_path = layout.log_file(&project.name, engine);
        let offset = tokio::fs::metadata(&log_path)
            .await
            .map(|meta| meta.len())
            .unwrap_or(0);

        let session_id = self
            .sessions
            .start(&project.name, engine, &work_dir, descriptor.start_cmd)
            .await?;
        let run = match self.record_run(&project.name, engine, &session_id, offset).await {
            Ok(run) => run,
            Err(err) => {
                error!(%err, engine, "failed to record run; stopping its session");
                self.sessions.stop(&project.name, engine).await;
                return Err(err);
            }
        };

        let monitor = Arc::new(LogMonitor::new(
            project.name.clone(),
            engine,
            log_path,
            self.deps(),
        ));
        monitor.start_at(offset);
        self.registry().insert(key, monitor);

        info!(engine, session = %session_id, run_id = %run.id, "engine started");
        Ok(run)
    }

    async fn record_run(
        &self,
        project: &str,
        engine: &str,
        session_id: &str,
        offset: u64,
    ) -> Result<Run> {
        let run = self.repo.add_run(project, engine, session_id).await?;
        if offset == 0 {
            return Ok(run);
        }
        let update = RunUpdate {
            log_offset: Some(offset),
            ..RunUpdate::default()
        };
        match self.repo.update_run(project, engine, &update).await {
            Ok(updated) => Ok(updated.unwrap_or(run)),
            Err(err) => {
                let finish = RunUpdate::finish(RunStatus::Stopped);
                if let Err(cleanup) = self.repo.update_run(project, engine, &finish).await {
                    warn!(%cleanup, engine, "failed to stop unrecorded run");
                }
                Err(err)
            }
        }
    }

    /// Stop one engine of a project. Returns whether a session was killed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown project or an engine the
    /// project does not use.
    pub async fn stop_engine(&self, name: &str, engine: &str) -> Result<bool> {
        let project = self.repo.get_project(name).await?;
        if !project.engines.iter().any(|e| e == engine) {
            return Err(AppError::NotFound(format!(
                "project {name} has no engine {engine}"
            )));
        }
        self.stop_engine_unchecked(name, engine).await
    }

    async fn stop_engine_unchecked(&self, name: &str, engine: &str) -> Result<bool> {
        let monitor = self.registry().remove(&(name.to_owned(), engine.to_owned()));
        if let Some(monitor) = monitor {
            monitor.stop_and_wait().await;
        }

        let killed = self.sessions.stop(name, engine).await;
        self.repo
            .update_run(name, engine, &RunUpdate::finish(RunStatus::Stopped))
            .await?;
        info!(project = name, engine, killed, "engine stopped");
        Ok(killed)
    }

    /// Stop every engine of a project. Returns engine → session killed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown project.
    pub async fn stop_project(&self, name: &str) -> Result<BTreeMap<String, bool>> {
        let project = self.repo.get_project(name).await?;
        let mut results = BTreeMap::new();
        for engine in &project.engines {
            let killed = self.stop_engine_unchecked(name, engine).await?;
            results.insert(engine.clone(), killed);
        }
        Ok(results)
    }

    /// Project record plus per-engine liveness and recent output.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown project.
    pub async fn status(&self, name: &str) -> Result<StatusReport> {
        let project = self.repo.get_project(name).await?;
        let mut reports = Vec::with_capacity(project.engines.len());
        for engine in &project.engines {
            let alive = self.sessions.is_alive(name, engine).await;
            let tail = if alive {
                self.sessions
                    .capture_output(name, engine, STATUS_TAIL_LINES)
                    .await
            } else {
                String::new()
            };
            let monitor = self
                .registry()
                .get(&(name.to_owned(), engine.clone()))
                .map(|m| m.state());
            reports.push(EngineReport {
                engine: engine.clone(),
                alive,
                monitor,
                tail,
            });
        }
        Ok(StatusReport {
            project,
            engines: reports,
        })
    }

    /// Recent output for one engine, or for all of them.
    ///
    /// Live sessions are captured from the pane; otherwise the tail of the
    /// run log is returned, or [`NO_LOG`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown project or engine.
    pub async fn logs(&self, name: &str, engine: Option<&str>, lines: usize) -> Result<Vec<LogExcerpt>> {
        let project = self.repo.get_project(name).await?;
        let selected: Vec<String> = match engine {
            Some(key) if project.engines.iter().any(|e| e == key) => vec![key.to_owned()],
            Some(key) => {
                return Err(AppError::NotFound(format!(
                    "project {name} has no engine {key}"
                )))
            }
            None => project.engines.clone(),
        };

        let mut excerpts = Vec::with_capacity(selected.len());
        for engine in selected {
            let excerpt = if self.sessions.is_alive(name, &engine).await {
                let text = self.sessions.capture_output(name, &engine, lines).await;
                LogExcerpt {
                    engine,
                    source: LogSource::Pane,
                    text,
                }
            } else {
                let path = self.layout().log_file(name, &engine);
                match tokio::fs::read(&path).await {
                    Ok(bytes) => LogExcerpt {
                        engine,
                        source: LogSource::File,
                        text: tail_lines(&String::from_utf8_lossy(&bytes), lines),
                    },
                    Err(err) => {
                        debug!(%err, path = %path.display(), "no log file");
                        LogExcerpt {
                            engine,
                            source: LogSource::None,
                            text: NO_LOG.to_owned(),
                        }
                    }
                }
            };
            excerpts.push(excerpt);
        }
        Ok(excerpts)
    }

    /// Reattach to runs left `running` by a previous process.
    ///
    /// Live sessions get a monitor resumed from the persisted log offset.
    /// Vanished sessions emit `session_died` and their runs become `failed`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the running runs cannot be listed.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        for run in self.repo.list_running_runs().await? {
            let key = (run.project_name.clone(), run.engine.clone());
            if self.registry().contains_key(&key) {
                continue;
            }

            match self.sessions.liveness(&run.project_name, &run.engine).await {
                Ok(false) => {
                    warn!(project = %run.project_name, engine = %run.engine, "session lost while offline");
                    let event = FactoryEvent::new(&run.project_name, &run.engine, EventKind::SessionDied);
                    deliver(self.observer.as_ref(), &event, self.options.monitor.observer_timeout).await;
                    self.repo
                        .update_run(&run.project_name, &run.engine, &RunUpdate::finish(RunStatus::Failed))
                        .await?;
                    report.failed.push(key);
                }
                // An unanswered probe is left to the monitor's next tick.
                Ok(true) | Err(_) => {
                    let log_path = self.layout().log_file(&run.project_name, &run.engine);
                    let monitor = Arc::new(LogMonitor::new(
                        run.project_name.clone(),
                        run.engine.clone(),
                        log_path,
                        self.deps(),
                    ));
                    monitor.start_at(run.log_offset);
                    info!(project = %run.project_name, engine = %run.engine, offset = run.log_offset, "monitor resumed");
                    self.registry().insert(key.clone(), monitor);
                    report.resumed.push(key);
                }
            }
        }
        Ok(report)
    }

    /// Stop every monitor and wait for them. Agent sessions keep running.
    pub async fn shutdown(&self) {
        let monitors: Vec<Arc<LogMonitor>> = self.registry().drain().map(|(_, m)| m).collect();
        for monitor in &monitors {
            monitor.stop();
        }
        for monitor in monitors {
            monitor.join().await;
        }
        info!("all monitors stopped");
    }

    /// Monitors that are still polling. Finished ones are pruned.
    #[must_use]
    pub fn active_monitors(&self) -> Vec<MonitorInfo> {
        let mut registry = self.registry();
        registry.retain(|_, m| m.state() != MonitorState::Stopped);
        let mut active: Vec<MonitorInfo> = registry
            .iter()
            .map(|((project, engine), m)| MonitorInfo {
                project: project.clone(),
                engine: engine.clone(),
                state: m.state(),
            })
            .collect();
        active.sort_by(|a, b| (&a.project, &a.engine).cmp(&(&b.project, &b.engine)));
        active
    }

    /// Installed-version probe for every engine.
    pub async fn engine_inventory(&self) -> Vec<EngineStatus> {
        engines::health::check_all(self.options.health_check_timeout).await
    }

    /// Host utilisation (disk measured at the factory root) and live sessions.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the host could not be sampled.
    pub async fn health(&self) -> Result<HealthReport> {
        let system = system_health(self.layout().root()).await?;
        let sessions = self.sessions.list_active().await;
        Ok(HealthReport { system, sessions })
    }
}

/// Last `lines` lines of `text`.
fn tail_lines(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let skip = all.len().saturating_sub(lines);
    all[skip..].join("\n")
}
