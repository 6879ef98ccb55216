//! Session naming, start, stop, and capture over the in-process multiplexer.

use std::sync::Arc;

use project_factory::session::layout::STOP_FILE;
use project_factory::session::memory::InMemoryMultiplexer;
use project_factory::session::{Multiplexer, SessionHandle, WorkspaceLayout};
use project_factory::AppError;

fn handle(root: &std::path::Path) -> (Arc<InMemoryMultiplexer>, SessionHandle) {
    let mux = Arc::new(InMemoryMultiplexer::new());
    let sessions = SessionHandle::new(
        Arc::clone(&mux) as Arc<dyn Multiplexer>,
        WorkspaceLayout::new(root),
    );
    (mux, sessions)
}

#[test]
fn session_names_are_distinct_per_pair() {
    assert_eq!(SessionHandle::session_name("todo-app", "claude"), "todo-app-claude");
    assert_ne!(
        SessionHandle::session_name("a-b", "claude"),
        SessionHandle::session_name("a", "b-claude")
    );
}

#[tokio::test]
async fn start_injects_command_and_replaces_existing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mux, sessions) = handle(dir.path());
    let work_dir = dir.path().join("p-claude");

    let name = sessions
        .start("p", "claude", &work_dir, "claude --go")
        .await
        .expect("start");
    assert_eq!(name, "p-claude");
    assert_eq!(mux.sent_keys(&name), vec!["claude --go"]);

    sessions
        .start("p", "claude", &work_dir, "claude --again")
        .await
        .expect("restart");
    assert_eq!(mux.sent_keys(&name), vec!["claude --again"]);
    assert_eq!(sessions.list_active().await, vec!["p-claude"]);
}

#[tokio::test]
async fn start_failure_is_a_session_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mux, sessions) = handle(dir.path());
    mux.set_fail_create(true);

    let err = sessions
        .start("p", "gemini", dir.path(), "gemini")
        .await
        .expect_err("create fails");
    assert!(matches!(err, AppError::Session(_)));
    assert!(!sessions.is_alive("p", "gemini").await);
}

#[tokio::test]
async fn stop_touches_sentinel_and_kills() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (_mux, sessions) = handle(dir.path());
    let work_dir = dir.path().join("p-aider");
    std::fs::create_dir_all(&work_dir).expect("mkdir");
    sessions
        .start("p", "aider", &work_dir, "aider")
        .await
        .expect("start");

    assert!(sessions.stop("p", "aider").await);
    assert!(work_dir.join(STOP_FILE).exists());
    assert!(!sessions.is_alive("p", "aider").await);

    assert!(!sessions.stop("p", "aider").await, "nothing left to kill");
}

#[tokio::test]
async fn stop_without_working_directory_still_kills() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mux, sessions) = handle(dir.path());
    mux.create_session("p-opencode", dir.path())
        .await
        .expect("create");

    assert!(sessions.stop("p", "opencode").await);
    assert!(sessions.list_active().await.is_empty());
}

#[tokio::test]
async fn capture_returns_trimmed_tail_or_empty() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mux, sessions) = handle(dir.path());
    sessions
        .start("p", "claude", dir.path(), "claude")
        .await
        .expect("start");
    mux.set_pane("p-claude", "one\ntwo\nthree\n\n");

    assert_eq!(sessions.capture_output("p", "claude", 2).await, "three");
    assert_eq!(
        sessions.capture_output("p", "claude", 10).await,
        "one\ntwo\nthree"
    );
    assert_eq!(sessions.capture_output("p", "gemini", 10).await, "");
}

#[tokio::test]
async fn liveness_distinguishes_gone_from_alive() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mux, sessions) = handle(dir.path());
    sessions
        .start("p", "claude", dir.path(), "claude")
        .await
        .expect("start");

    assert!(sessions.liveness("p", "claude").await.expect("probe"));
    assert!(mux.kill_out_of_band("p-claude"));
    assert!(!sessions.liveness("p", "claude").await.expect("probe"));
}
