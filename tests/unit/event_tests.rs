//! Event rendering, categories, and JSON shape.

use project_factory::models::event::{EventKind, FactoryEvent, NotifyCategory, PhaseAction};
use serde_json::json;

fn event(kind: EventKind) -> FactoryEvent {
    FactoryEvent::new("todo", "claude", kind)
}

#[test]
fn describe_renders_each_kind() {
    let cases = [
        (
            EventKind::Phase {
                number: 2,
                action: PhaseAction::Start,
                score: None,
            },
            "[todo/Claude Code] Phase 2 started",
        ),
        (
            EventKind::Phase {
                number: 2,
                action: PhaseAction::End,
                score: Some(91),
            },
            "[todo/Claude Code] Phase 2 completed (score: 91)",
        ),
        (
            EventKind::Phase {
                number: 3,
                action: PhaseAction::End,
                score: None,
            },
            "[todo/Claude Code] Phase 3 completed (score: ?)",
        ),
        (
            EventKind::Clarify {
                payload: json!({"question": "Which DB?"}),
            },
            "[todo/Claude Code] Clarification needed:\n\nWhich DB?",
        ),
        (
            EventKind::Error {
                message: "tests failed".into(),
            },
            "[todo/Claude Code] ERROR: tests failed",
        ),
        (
            EventKind::Cost {
                amount: 1.5,
                provider: "anthropic".into(),
            },
            "[todo/Claude Code] Cost: $1.50 (anthropic)",
        ),
        (
            EventKind::Complete {
                payload: json!({"duration_minutes": 42, "total_cost": 3.1}),
            },
            "[todo/Claude Code] FACTORY COMPLETE!\nDuration: 42 min\nCost: $3.1\nTests: {}",
        ),
        (
            EventKind::SessionDied,
            "[todo/Claude Code] Session died unexpectedly!",
        ),
    ];
    for (kind, expected) in cases {
        assert_eq!(event(kind).describe(), expected);
    }
}

#[test]
fn unknown_engine_renders_by_key() {
    let e = FactoryEvent::new("p", "mystery", EventKind::SessionDied);
    assert_eq!(e.describe(), "[p/mystery] Session died unexpectedly!");
}

#[test]
fn json_is_flat_and_tagged() {
    let value = serde_json::to_value(event(EventKind::Phase {
        number: 1,
        action: PhaseAction::End,
        score: Some(80),
    }))
    .expect("serialize");
    assert_eq!(
        value,
        json!({"project": "todo", "engine": "claude", "type": "phase", "number": 1, "action": "end", "score": 80})
    );

    let value = serde_json::to_value(event(EventKind::SessionDied)).expect("serialize");
    assert_eq!(
        value,
        json!({"project": "todo", "engine": "claude", "type": "session_died"})
    );

    let start = serde_json::to_value(event(EventKind::Phase {
        number: 1,
        action: PhaseAction::Start,
        score: None,
    }))
    .expect("serialize");
    assert!(start.get("score").is_none());
}

#[test]
fn categories_and_terminality() {
    assert_eq!(
        EventKind::Phase {
            number: 1,
            action: PhaseAction::Start,
            score: None
        }
        .category(),
        NotifyCategory::PhaseStart
    );
    assert_eq!(EventKind::SessionDied.category(), NotifyCategory::SessionDied);
    assert!(EventKind::SessionDied.is_terminal());
    assert!(EventKind::Complete { payload: json!({}) }.is_terminal());
    assert!(!EventKind::Error {
        message: String::new()
    }
    .is_terminal());
}

#[test]
fn default_categories_skip_noisy_kinds() {
    let defaults = NotifyCategory::defaults();
    assert!(!defaults.contains(&NotifyCategory::PhaseStart));
    assert!(!defaults.contains(&NotifyCategory::Cost));
    assert!(defaults.contains(&NotifyCategory::SessionDied));
}
