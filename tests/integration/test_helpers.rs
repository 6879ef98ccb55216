//! Shared fixtures for monitor, factory, and IPC integration tests.
//!
//! Everything runs against an in-memory `SQLite` pool, the in-process
//! multiplexer, and a temporary factory root, with a fast poll interval.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use project_factory::models::event::{EventKind, FactoryEvent};
use project_factory::models::project::NewProject;
use project_factory::models::run::Run;
use project_factory::observer::EventObserver;
use project_factory::orchestrator::factory::{Factory, FactoryOptions};
use project_factory::orchestrator::log_monitor::{LogMonitor, MonitorDeps, MonitorSettings, MonitorState};
use project_factory::persistence::db::{self, Database};
use project_factory::persistence::project_repo::ProjectRepo;
use project_factory::session::memory::InMemoryMultiplexer;
use project_factory::session::{BoxFuture, Multiplexer, SessionHandle, WorkspaceLayout};
use project_factory::{AppError, Result};
use tempfile::TempDir;

/// Upper bound for any wait in these tests.
pub const WAIT: Duration = Duration::from_secs(5);

/// How a [`RecordingObserver`] reacts after recording an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    /// Return `Ok`.
    Accept,
    /// Return an error for phase events.
    FailOnPhase,
    /// Panic on error events.
    PanicOnError,
    /// Take this long to accept every event.
    Stall(Duration),
}

/// Observer that records every event it sees.
pub struct RecordingObserver {
    events: Mutex<Vec<FactoryEvent>>,
    reaction: Reaction,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Self::with_reaction(Reaction::Accept)
    }

    pub fn with_reaction(reaction: Reaction) -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            reaction,
        })
    }

    pub fn events(&self) -> Vec<FactoryEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }

    /// Wait until at least `n` events arrived, then return all of them.
    pub async fn wait_for(&self, n: usize) -> Vec<FactoryEvent> {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let events = self.events();
            if events.len() >= n {
                return events;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {n} events, got {events:?}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl EventObserver for RecordingObserver {
    fn on_event<'a>(&'a self, event: &'a FactoryEvent) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.events.lock().unwrap().push(event.clone());
            if let Reaction::Stall(delay) = self.reaction {
                tokio::time::sleep(delay).await;
            }
            match (self.reaction, &event.kind) {
                (Reaction::FailOnPhase, EventKind::Phase { .. }) => {
                    Err(AppError::Notify("observer rejected phase".into()))
                }
                (Reaction::PanicOnError, EventKind::Error { .. }) => {
                    panic!("observer blew up");
                }
                _ => Ok(()),
            }
        })
    }
}

/// Fast settings for tests.
pub fn fast_settings() -> MonitorSettings {
    MonitorSettings {
        poll_interval: Duration::from_millis(20),
        io_timeout: Duration::from_secs(1),
        observer_timeout: Duration::from_secs(1),
        ..MonitorSettings::default()
    }
}

/// Temporary factory root, in-memory store, and in-process multiplexer.
pub struct Harness {
    pub dir: TempDir,
    pub db: Arc<Database>,
    pub mux: Arc<InMemoryMultiplexer>,
    pub repo: ProjectRepo,
    pub observer: Arc<RecordingObserver>,
    pub layout: WorkspaceLayout,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_observer(RecordingObserver::new()).await
    }

    pub async fn with_observer(observer: Arc<RecordingObserver>) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(db::connect_memory().await.expect("db connect"));
        let layout = WorkspaceLayout::new(dir.path().join("projects"));
        Self {
            dir,
            repo: ProjectRepo::new(Arc::clone(&db)),
            db,
            mux: Arc::new(InMemoryMultiplexer::new()),
            observer,
            layout,
        }
    }

    pub fn mux_dyn(&self) -> Arc<dyn Multiplexer> {
        Arc::clone(&self.mux) as Arc<dyn Multiplexer>
    }

    pub fn sessions(&self) -> SessionHandle {
        SessionHandle::new(self.mux_dyn(), self.layout.clone())
    }

    pub fn deps(&self) -> MonitorDeps {
        MonitorDeps {
            sessions: self.sessions(),
            repo: self.repo.clone(),
            observer: Arc::clone(&self.observer) as Arc<dyn EventObserver>,
            settings: fast_settings(),
        }
    }

    pub fn options(&self) -> FactoryOptions {
        FactoryOptions {
            templates_dir: None,
            monitor: fast_settings(),
            command_timeout: Duration::from_secs(2),
            health_check_timeout: Duration::from_secs(2),
        }
    }

    pub fn factory(&self) -> Factory {
        Factory::new(
            self.layout.clone(),
            self.mux_dyn(),
            self.repo.clone(),
            Arc::clone(&self.observer) as Arc<dyn EventObserver>,
            self.options(),
        )
    }

    /// Project with one engine, a live session, a running run, and an empty
    /// reports directory.
    pub async fn seed_run(&self, project: &str, engine: &str) -> Run {
        self.repo
            .create_project(&NewProject::new(project, vec![engine.to_owned()], "build it"))
            .await
            .expect("create project");
        let work_dir = self.layout.project_dir(project, engine);
        std::fs::create_dir_all(work_dir.join("artifacts").join("reports")).expect("mkdir");
        let name = SessionHandle::session_name(project, engine);
        self.mux
            .create_session(&name, &work_dir)
            .await
            .expect("create session");
        self.repo
            .add_run(project, engine, &name)
            .await
            .expect("add run")
    }

    pub fn log_path(&self, project: &str, engine: &str) -> PathBuf {
        self.layout.log_file(project, engine)
    }

    /// Append `text` to the run log, creating it if needed.
    pub fn append_log(&self, project: &str, engine: &str, text: &str) {
        use std::io::Write;
        let path = self.log_path(project, engine);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .expect("open log");
        file.write_all(text.as_bytes()).expect("append");
        file.flush().expect("flush");
    }

    pub fn monitor(&self, project: &str, engine: &str) -> LogMonitor {
        LogMonitor::new(project, engine, self.log_path(project, engine), self.deps())
    }

    pub async fn current_run(&self, project: &str, engine: &str) -> Run {
        self.repo
            .get_project(project)
            .await
            .expect("get project")
            .latest_run(engine)
            .cloned()
            .expect("run exists")
    }

    /// Poll the latest run until `pred` holds.
    pub async fn wait_for_run<F>(&self, project: &str, engine: &str, pred: F) -> Run
    where
        F: Fn(&Run) -> bool,
    {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let run = self.current_run(project, engine).await;
            if pred(&run) {
                return run;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting on run {run:?}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Wait for a monitor's background task to end.
pub async fn wait_stopped(monitor: &LogMonitor) {
    tokio::time::timeout(WAIT, monitor.join())
        .await
        .expect("monitor did not stop in time");
    assert_eq!(monitor.state(), MonitorState::Stopped);
}
