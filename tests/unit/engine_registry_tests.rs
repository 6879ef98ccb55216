//! Engine catalogue lookups.

use std::time::Duration;

use project_factory::engines::{self, health::check_engine};
use project_factory::AppError;

#[test]
fn catalogue_has_four_engines_without_dashes() {
    let keys: Vec<&str> = engines::all().iter().map(|e| e.key).collect();
    assert_eq!(keys, vec!["claude", "gemini", "opencode", "aider"]);
    assert!(keys.iter().all(|k| !k.contains('-')));
}

#[test]
fn lookup_by_key() {
    let claude = engines::get("claude").expect("claude");
    assert_eq!(claude.name, "Claude Code");
    assert_eq!(claude.template, "CLAUDE.md");
    assert!(claude.start_cmd.contains("/factory"));

    let aider = engines::get("aider").expect("aider");
    assert_eq!(aider.template, "aider.conf.yml");
}

#[test]
fn unknown_key_is_not_found() {
    let err = engines::get("copilot").expect_err("unknown");
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(err.to_string(), "not found: unknown engine: copilot");
}

#[test]
fn display_name_falls_back_to_key() {
    assert_eq!(engines::display_name("gemini"), "Gemini CLI");
    assert_eq!(engines::display_name("mystery"), "mystery");
}

#[tokio::test]
async fn unknown_engine_probe_reports_not_installed() {
    let status = check_engine("mystery", Duration::from_secs(1)).await;
    assert!(!status.installed);
    assert!(status.version.is_none());
    assert_eq!(status.error.as_deref(), Some("unknown engine: mystery"));
}
