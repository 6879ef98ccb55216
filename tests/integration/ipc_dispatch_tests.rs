//! IPC command routing without a socket.

use project_factory::ipc::server::{dispatch, dispatch_authenticated, IpcRequest};
use project_factory::models::project::NewProject;

use super::test_helpers::Harness;

fn named(command: &str, name: &str) -> IpcRequest {
    IpcRequest {
        name: Some(name.to_owned()),
        ..IpcRequest::new(command)
    }
}

#[tokio::test]
async fn create_list_status_roundtrip() {
    let h = Harness::new().await;
    let factory = h.factory();

    let create = IpcRequest {
        new_project: Some(NewProject::new("shop", vec!["claude".into()], "sell things")),
        ..IpcRequest::new("create")
    };
    let response = dispatch(&factory, &create).await;
    assert!(response.ok, "{response:?}");
    let data = response.data.expect("data");
    assert_eq!(data["name"], "shop");
    assert_eq!(data["status"], "created");
    assert_eq!(data["description"], "sell things");

    let list = dispatch(&factory, &IpcRequest::new("list")).await;
    assert!(list.ok);
    assert!(list.data.expect("data").get("shop").is_some());

    let status = dispatch(&factory, &named("status", "shop")).await;
    assert!(status.ok);
    let data = status.data.expect("data");
    assert_eq!(data["engines"][0]["engine"], "claude");
    assert_eq!(data["engines"][0]["alive"], false);
}

#[tokio::test]
async fn launch_stop_and_monitors() {
    let h = Harness::new().await;
    let factory = h.factory();

    let launch = IpcRequest {
        new_project: Some(NewProject::new("blog", vec!["aider".into()], "posts")),
        ..IpcRequest::new("launch")
    };
    let response = dispatch(&factory, &launch).await;
    assert!(response.ok, "{response:?}");
    assert_eq!(response.data.expect("data")["status"], "running");

    let monitors = dispatch(&factory, &IpcRequest::new("monitors")).await;
    let data = monitors.data.expect("data");
    assert_eq!(data[0]["project"], "blog");
    assert_eq!(data[0]["state"], "running");

    let sessions = dispatch(&factory, &IpcRequest::new("sessions")).await;
    assert_eq!(sessions.data.expect("data")[0], "blog-aider");

    let stop = IpcRequest {
        engine: Some("aider".into()),
        ..named("stop", "blog")
    };
    let response = dispatch(&factory, &stop).await;
    assert!(response.ok);
    assert_eq!(response.data.expect("data")["aider"], true);

    let stop_all = dispatch(&factory, &named("stop", "blog")).await;
    assert_eq!(stop_all.data.expect("data")["aider"], false);
}

#[tokio::test]
async fn logs_default_to_placeholder() {
    let h = Harness::new().await;
    let factory = h.factory();
    factory
        .create_project(&NewProject::new("notes", vec!["gemini".into()], "x"))
        .await
        .expect("create");

    let response = dispatch(&factory, &named("logs", "notes")).await;
    assert!(response.ok);
    let data = response.data.expect("data");
    assert_eq!(data[0]["source"], "none");
    assert_eq!(data[0]["text"], "(no log)");
}

#[tokio::test]
async fn errors_are_reported_not_raised() {
    let h = Harness::new().await;
    let factory = h.factory();

    let unknown = dispatch(&factory, &IpcRequest::new("explode")).await;
    assert!(!unknown.ok);
    assert_eq!(unknown.error.as_deref(), Some("unknown command: explode"));

    let missing_name = dispatch(&factory, &IpcRequest::new("status")).await;
    assert!(!missing_name.ok);
    assert!(missing_name
        .error
        .expect("error")
        .contains("status requires a project name"));

    let missing_project = dispatch(&factory, &named("status", "ghost")).await;
    assert_eq!(
        missing_project.error.as_deref(),
        Some("not found: project not found: ghost")
    );

    let no_body = dispatch(&factory, &IpcRequest::new("launch")).await;
    assert!(!no_body.ok);
}

#[tokio::test]
async fn request_wire_format_accepts_ctl_json() {
    let raw = r#"{"command":"launch","new_project":{"name":"cli","engines":["claude","gemini"],"requirements":"r","description":"","project_type":"web"}}"#;
    let request: IpcRequest = serde_json::from_str(raw).expect("parse");
    let project = request.new_project.expect("project");
    assert_eq!(project.engines, vec!["claude", "gemini"]);
    assert_eq!(
        project.project_type,
        project_factory::models::project::ProjectType::Web
    );
    assert!(request.name.is_none());
}

#[tokio::test]
async fn token_is_required_when_configured() {
    let h = Harness::new().await;
    let factory = h.factory();

    let anonymous = IpcRequest::new("list");
    let response = dispatch_authenticated(&factory, Some("s3cret"), &anonymous).await;
    assert!(!response.ok);
    assert_eq!(response.error.as_deref(), Some("unauthorized"));

    let wrong = IpcRequest {
        auth_token: Some("guess".into()),
        ..IpcRequest::new("launch")
    };
    let response = dispatch_authenticated(&factory, Some("s3cret"), &wrong).await;
    assert_eq!(response.error.as_deref(), Some("unauthorized"));
    assert!(h.repo.list_projects().await.expect("list").is_empty());

    let good = IpcRequest {
        auth_token: Some("s3cret".into()),
        ..IpcRequest::new("list")
    };
    assert!(dispatch_authenticated(&factory, Some("s3cret"), &good).await.ok);
}

#[tokio::test]
async fn no_configured_token_accepts_everything() {
    let h = Harness::new().await;
    let factory = h.factory();
    let response = dispatch_authenticated(&factory, None, &IpcRequest::new("list")).await;
    assert!(response.ok, "{response:?}");
}

#[tokio::test]
async fn health_reports_host_and_sessions() {
    let h = Harness::new().await;
    h.seed_run("host-check", "claude").await;
    let factory = h.factory();

    let response = dispatch(&factory, &IpcRequest::new("health")).await;
    assert!(response.ok, "{response:?}");
    let data = response.data.expect("data");
    assert!(data["system"]["memory"]["total_gb"].as_f64().expect("total") > 0.0);
    assert!(data["system"]["cpu_percent"].is_number());
    assert_eq!(data["sessions"], serde_json::json!(["host-check-claude"]));
}
