//! End-to-end project lifecycle through [`Factory`].

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use project_factory::models::event::{EventKind, PhaseAction};
use project_factory::models::project::{NewProject, ProjectStatus};
use project_factory::models::run::RunStatus;
use project_factory::observer::EventObserver;
use project_factory::orchestrator::factory::{Factory, LogSource, NO_LOG};
use project_factory::session::layout::STOP_FILE;
use project_factory::session::memory::InMemoryMultiplexer;
use project_factory::session::{BoxFuture, Multiplexer, SessionHandle};
use project_factory::{AppError, Result};

use super::test_helpers::{Harness, WAIT};

fn todo_app(engines: &[&str]) -> NewProject {
    NewProject::new(
        "todo-app",
        engines.iter().map(|e| (*e).to_owned()).collect(),
        "Build a todo list API with tests.",
    )
}

#[tokio::test]
async fn create_rejects_bad_input() {
    let h = Harness::new().await;
    let factory = h.factory();

    let bad_name = NewProject::new("../etc", vec!["claude".into()], "x");
    assert!(matches!(
        factory.create_project(&bad_name).await,
        Err(AppError::InvalidInput(_))
    ));

    let no_engines = NewProject::new("empty", Vec::new(), "x");
    assert!(matches!(
        factory.create_project(&no_engines).await,
        Err(AppError::InvalidInput(_))
    ));

    let unknown = NewProject::new("unknown", vec!["cursor".into()], "x");
    assert!(matches!(
        factory.create_project(&unknown).await,
        Err(AppError::NotFound(_))
    ));

    assert!(h.repo.list_projects().await.expect("list").is_empty());
}

#[tokio::test]
async fn create_dedupes_engines_and_rejects_duplicates() {
    let h = Harness::new().await;
    let factory = h.factory();

    let project = factory
        .create_project(&todo_app(&["claude", "gemini", "claude"]))
        .await
        .expect("create");
    assert_eq!(project.engines, vec!["claude", "gemini"]);
    assert_eq!(project.status, ProjectStatus::Created);
    assert!(project.runs.is_empty());

    let again = factory.create_project(&todo_app(&["aider"])).await;
    assert!(matches!(again, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn launch_prepares_workspaces_and_starts_sessions() {
    let h = Harness::new().await;
    let factory = h.factory();

    let project = factory
        .launch(&todo_app(&["claude", "aider"]))
        .await
        .expect("launch");
    assert_eq!(project.status, ProjectStatus::Running);
    assert_eq!(project.runs.len(), 2);
    assert!(project.runs.iter().all(|r| r.status == RunStatus::Running));

    for engine in ["claude", "aider"] {
        let name = SessionHandle::session_name("todo-app", engine);
        let descriptor = project_factory::engines::get(engine).expect("engine");
        assert_eq!(h.mux.sent_keys(&name), vec![descriptor.start_cmd.to_owned()]);
        assert_eq!(
            h.mux.work_dir(&name),
            Some(h.layout.project_dir("todo-app", engine))
        );

        let requirements = std::fs::read_to_string(h.layout.requirements_file("todo-app", engine))
            .expect("requirements written");
        assert_eq!(requirements, "Build a todo list API with tests.");
        assert!(h.layout.artifacts_dir("todo-app", engine).join("reports").is_dir());
    }

    let monitors = factory.active_monitors();
    assert_eq!(monitors.len(), 2);
    assert_eq!(monitors[0].engine, "aider");
    assert_eq!(monitors[1].engine, "claude");

    factory.shutdown().await;
}

#[tokio::test]
async fn stop_engine_writes_sentinel_and_marks_run_stopped() {
    let h = Harness::new().await;
    let factory = h.factory();
    factory.launch(&todo_app(&["claude"])).await.expect("launch");

    assert!(factory.stop_engine("todo-app", "claude").await.expect("stop"));
    assert!(h.layout.project_dir("todo-app", "claude").join(STOP_FILE).exists());
    assert!(!factory.sessions().is_alive("todo-app", "claude").await);

    let project = h.repo.get_project("todo-app").await.expect("project");
    assert_eq!(project.status, ProjectStatus::Stopped);
    let run = project.latest_run("claude").expect("run");
    assert_eq!(run.status, RunStatus::Stopped);
    assert!(run.finished_at.is_some());
    assert!(factory.active_monitors().is_empty());

    // Second stop finds nothing to kill.
    assert!(!factory.stop_engine("todo-app", "claude").await.expect("stop again"));

    // Stopping is not a failure.
    assert!(!h
        .observer
        .kinds()
        .iter()
        .any(|k| matches!(k, EventKind::SessionDied)));
}

#[tokio::test]
async fn stop_rejects_unknown_project_or_engine() {
    let h = Harness::new().await;
    let factory = h.factory();
    factory.create_project(&todo_app(&["claude"])).await.expect("create");

    assert!(matches!(
        factory.stop_project("nope").await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        factory.stop_engine("todo-app", "gemini").await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn stop_project_reports_each_engine() {
    let h = Harness::new().await;
    let factory = h.factory();
    factory
        .launch(&todo_app(&["claude", "gemini"]))
        .await
        .expect("launch");
    h.mux
        .kill_out_of_band(&SessionHandle::session_name("todo-app", "gemini"));

    let results = factory.stop_project("todo-app").await.expect("stop");
    assert_eq!(results.get("claude"), Some(&true));
    assert_eq!(results.get("gemini"), Some(&false));
    assert!(h.sessions().list_active().await.is_empty());
}

#[tokio::test]
async fn restart_supersedes_previous_run() {
    let h = Harness::new().await;
    let factory = h.factory();
    factory.launch(&todo_app(&["claude"])).await.expect("launch");
    factory.start_project("todo-app").await.expect("restart");

    let project = h.repo.get_project("todo-app").await.expect("project");
    assert_eq!(project.runs.len(), 2);
    assert_eq!(project.runs[0].status, RunStatus::Stopped);
    assert_eq!(project.runs[1].status, RunStatus::Running);
    assert_eq!(factory.active_monitors().len(), 1);
    assert_eq!(
        h.mux.sent_keys("todo-app-claude").len(),
        1,
        "old session replaced"
    );

    factory.shutdown().await;
}

#[tokio::test]
async fn restart_clears_stale_sentinel() {
    let h = Harness::new().await;
    let factory = h.factory();
    factory.launch(&todo_app(&["claude"])).await.expect("launch");
    factory.stop_engine("todo-app", "claude").await.expect("stop");
    let sentinel = h.layout.stop_file("todo-app", "claude");
    assert!(sentinel.exists());

    factory.start_project("todo-app").await.expect("restart");
    assert!(!sentinel.exists());
    factory.shutdown().await;
}

#[tokio::test]
async fn new_run_ignores_markers_from_previous_runs() {
    let h = Harness::new().await;
    let factory = h.factory();
    factory.create_project(&todo_app(&["claude"])).await.expect("create");
    h.append_log("todo-app", "claude", "[FACTORY:COMPLETE:old run]\n");

    factory.start_project("todo-app").await.expect("start");
    h.append_log("todo-app", "claude", "[FACTORY:PHASE:1:start]\n");
    let events = h.observer.wait_for(1).await;
    factory.shutdown().await;

    assert_eq!(events.len(), 1);
    assert!(matches!(events[0].kind, EventKind::Phase { number: 1, .. }));
    assert_eq!(
        h.current_run("todo-app", "claude").await.status,
        RunStatus::Running
    );
}

#[tokio::test]
async fn completion_marker_completes_project() {
    let h = Harness::new().await;
    let factory = h.factory();
    factory.launch(&todo_app(&["claude"])).await.expect("launch");

    h.append_log(
        "todo-app",
        "claude",
        "[FACTORY:PHASE:7:end:90]\n[FACTORY:COMPLETE:{\"total_cost\":3.2}]\n",
    );
    h.wait_for_run("todo-app", "claude", |r| r.status == RunStatus::Completed)
        .await;

    let project = h.repo.get_project("todo-app").await.expect("project");
    assert_eq!(project.status, ProjectStatus::Completed);
    assert_eq!(project.runs[0].phase, 7);

    let deadline = tokio::time::Instant::now() + WAIT;
    while !factory.active_monitors().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "monitor still registered");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn session_failure_leaves_no_run() {
    let h = Harness::new().await;
    let factory = h.factory();
    factory.create_project(&todo_app(&["claude"])).await.expect("create");
    h.mux.set_fail_create(true);

    let result = factory.start_project("todo-app").await;
    assert!(matches!(result, Err(AppError::Session(_))));

    let project = h.repo.get_project("todo-app").await.expect("project");
    assert!(project.runs.is_empty());
    assert_eq!(project.status, ProjectStatus::Created);
    assert!(factory.active_monitors().is_empty());
}

/// Multiplexer whose agent writes a marker the moment it is started.
struct EagerAgent {
    inner: Arc<InMemoryMultiplexer>,
    log: PathBuf,
}

impl Multiplexer for EagerAgent {
    fn create_session<'a>(&'a self, name: &'a str, work_dir: &'a Path) -> BoxFuture<'a, Result<()>> {
        self.inner.create_session(name, work_dir)
    }

    fn kill_session<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool>> {
        self.inner.kill_session(name)
    }

    fn send_keys<'a>(&'a self, name: &'a str, keys: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.inner.send_keys(name, keys).await?;
            std::fs::create_dir_all(self.log.parent().expect("parent")).expect("mkdir");
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log)
                .expect("open log");
            file.write_all(b"[FACTORY:PHASE:1:start]\n").expect("append");
            Ok(())
        })
    }

    fn capture_pane<'a>(&'a self, name: &'a str, lines: usize) -> BoxFuture<'a, Result<String>> {
        self.inner.capture_pane(name, lines)
    }

    fn list_sessions(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        self.inner.list_sessions()
    }

    fn has_session<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool>> {
        self.inner.has_session(name)
    }
}

#[tokio::test]
async fn output_written_while_the_session_starts_is_monitored() {
    let h = Harness::new().await;
    let mux = Arc::new(EagerAgent {
        inner: Arc::clone(&h.mux),
        log: h.log_path("todo-app", "claude"),
    });
    let factory = Factory::new(
        h.layout.clone(),
        mux,
        h.repo.clone(),
        Arc::clone(&h.observer) as Arc<dyn EventObserver>,
        h.options(),
    );

    factory.launch(&todo_app(&["claude"])).await.expect("launch");
    let events = h.observer.wait_for(1).await;
    factory.shutdown().await;

    assert_eq!(
        events[0].kind,
        EventKind::Phase {
            number: 1,
            action: PhaseAction::Start,
            score: None
        }
    );
    assert_eq!(h.current_run("todo-app", "claude").await.log_offset, 0);
}

#[tokio::test]
async fn failed_run_record_stops_the_new_session() {
    let h = Harness::new().await;
    let factory = h.factory();
    factory.create_project(&todo_app(&["claude"])).await.expect("create");
    sqlx::query(
        "CREATE TRIGGER reject_runs BEFORE INSERT ON run
         BEGIN SELECT RAISE(ABORT, 'run store unavailable'); END",
    )
    .execute(h.db.as_ref())
    .await
    .expect("trigger");

    let result = factory.start_project("todo-app").await;
    assert!(matches!(result, Err(AppError::Db(_))));

    assert!(h.sessions().list_active().await.is_empty());
    assert!(factory.active_monitors().is_empty());
    let project = h.repo.get_project("todo-app").await.expect("project");
    assert!(project.runs.is_empty());
}

#[tokio::test]
async fn status_reports_liveness_and_tail() {
    let h = Harness::new().await;
    let factory = h.factory();
    factory
        .launch(&todo_app(&["claude", "gemini"]))
        .await
        .expect("launch");
    h.mux.set_pane("todo-app-claude", "line one\nline two\n");
    h.mux.kill_out_of_band("todo-app-gemini");

    let report = factory.status("todo-app").await.expect("status");
    assert_eq!(report.project.name, "todo-app");
    let claude = &report.engines[0];
    assert_eq!(claude.engine, "claude");
    assert!(claude.alive);
    assert_eq!(claude.tail, "line one\nline two");
    assert!(claude.monitor.is_some());

    let gemini = &report.engines[1];
    assert!(!gemini.alive);
    assert!(gemini.tail.is_empty());

    assert!(matches!(
        factory.status("missing").await,
        Err(AppError::NotFound(_))
    ));
    factory.shutdown().await;
}

#[tokio::test]
async fn logs_fall_back_from_pane_to_file_to_placeholder() {
    let h = Harness::new().await;
    let factory = h.factory();
    factory
        .launch(&todo_app(&["claude", "gemini", "aider"]))
        .await
        .expect("launch");
    factory.shutdown().await;

    h.mux.set_pane("todo-app-claude", "a\nb\nc");
    h.mux.kill_out_of_band("todo-app-gemini");
    h.append_log("todo-app", "gemini", "one\ntwo\nthree\n");
    h.mux.kill_out_of_band("todo-app-aider");

    let logs = factory.logs("todo-app", None, 2).await.expect("logs");
    assert_eq!(logs.len(), 3);
    assert_eq!(logs[0].source, LogSource::Pane);
    assert_eq!(logs[0].text, "b\nc");
    assert_eq!(logs[1].source, LogSource::File);
    assert_eq!(logs[1].text, "two\nthree");
    assert_eq!(logs[2].source, LogSource::None);
    assert_eq!(logs[2].text, NO_LOG);

    let single = factory
        .logs("todo-app", Some("gemini"), 10)
        .await
        .expect("logs");
    assert_eq!(single.len(), 1);
    assert!(matches!(
        factory.logs("todo-app", Some("opencode"), 10).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn shutdown_keeps_agent_sessions() {
    let h = Harness::new().await;
    let factory = h.factory();
    factory.launch(&todo_app(&["claude"])).await.expect("launch");

    factory.shutdown().await;
    assert!(factory.active_monitors().is_empty());
    assert!(factory.sessions().is_alive("todo-app", "claude").await);
    assert_eq!(
        h.current_run("todo-app", "claude").await.status,
        RunStatus::Running
    );
}
