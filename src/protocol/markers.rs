//! `[FACTORY:...]` marker parser.
//!
//! Markers are embedded in free-form agent output:
//!
//! | Marker                                 | Event                                  |
//! |----------------------------------------|----------------------------------------|
//! | `[FACTORY:PHASE:<n>:<start\|end>[:<s>]]` | [`Marker::Phase`]                    |
//! | `[FACTORY:CLARIFY:<json-or-text>]`     | [`Marker::Clarify`]                    |
//! | `[FACTORY:ERROR:<message>]`            | [`Marker::Error`]                      |
//! | `[FACTORY:COST:<amount>:<provider>]`   | [`Marker::Cost`]                       |
//! | `[FACTORY:COMPLETE:<json-or-text>]`    | [`Marker::Complete`]                   |
//! | *(any other type)*                     | Skipped; logged at `DEBUG`             |
//!
//! The payload runs up to the first `]` and never crosses a newline.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::models::event::PhaseAction;

/// Opening sequence shared by every marker.
pub const MARKER_PREFIX: &str = "[FACTORY:";

/// Trailing fragments longer than this are not carried between reads.
pub const MAX_FRAGMENT_LEN: usize = 64 * 1024;

#[allow(clippy::expect_used)] // Literal pattern; covered by tests.
static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[FACTORY:(\w+)(?::([^\]\n]*))?\]").expect("marker pattern is valid")
});

/// A control marker decoded from agent output.
#[derive(Debug, Clone, PartialEq)]
pub enum Marker {
    /// Phase boundary.
    Phase {
        /// Phase number.
        number: u32,
        /// Start or end.
        action: PhaseAction,
        /// Score reported with `end`.
        score: Option<u32>,
    },
    /// Operator clarification request.
    Clarify {
        /// Decoded object, or `{"question": raw}`.
        payload: Value,
    },
    /// Agent-reported error.
    Error {
        /// Raw payload; may be empty.
        message: String,
    },
    /// Spend report.
    Cost {
        /// Amount; 0 when not numeric.
        amount: f64,
        /// Provider; `unknown` when absent.
        provider: String,
    },
    /// Run finished.
    Complete {
        /// Decoded object, or `{"summary": raw}`.
        payload: Value,
    },
}

/// Parse every marker in `text`, in order of appearance.
///
/// Malformed `PHASE` markers and unknown marker types are skipped without
/// affecting their neighbours. Never fails.
#[must_use]
pub fn parse_markers(text: &str) -> Vec<Marker> {
    parse_markers_with_ends(text)
        .into_iter()
        .map(|(marker, _)| marker)
        .collect()
}

/// [`parse_markers`], pairing each marker with the index just past its `]`.
#[must_use]
pub fn parse_markers_with_ends(text: &str) -> Vec<(Marker, usize)> {
    MARKER_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let end = caps.get(0).map_or(0, |m| m.end());
            let kind = caps.get(1).map_or("", |m| m.as_str());
            let payload = caps.get(2).map_or("", |m| m.as_str());
            parse_marker(kind, payload).map(|marker| (marker, end))
        })
        .collect()
}

fn parse_marker(kind: &str, payload: &str) -> Option<Marker> {
    match kind {
        "PHASE" => parse_phase(payload),
        "CLARIFY" => Some(Marker::Clarify {
            payload: decode_object(payload, "question"),
        }),
        "ERROR" => Some(Marker::Error {
            message: payload.to_owned(),
        }),
        "COST" => Some(parse_cost(payload)),
        "COMPLETE" => Some(Marker::Complete {
            payload: decode_object(payload, "summary"),
        }),
        other => {
            debug!(marker_type = other, "skipping unknown marker type");
            None
        }
    }
}

fn parse_phase(payload: &str) -> Option<Marker> {
    let mut parts = payload.split(':');
    let Ok(number) = parts.next()?.trim().parse::<u32>() else {
        debug!(payload, "dropping phase marker with malformed number");
        return None;
    };
    let action = match parts.next()?.trim().to_ascii_lowercase().as_str() {
        "start" => PhaseAction::Start,
        "end" => PhaseAction::End,
        other => {
            debug!(action = other, "dropping phase marker with unknown action");
            return None;
        }
    };
    let score = match action {
        PhaseAction::End => parts.next().and_then(|s| s.trim().parse::<u32>().ok()),
        PhaseAction::Start => None,
    };
    Some(Marker::Phase {
        number,
        action,
        score,
    })
}

fn parse_cost(payload: &str) -> Marker {
    let mut parts = payload.split(':');
    let amount = parts
        .next()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|a| a.is_finite())
        .unwrap_or(0.0);
    let provider = parts
        .next()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or("unknown")
        .to_owned();
    Marker::Cost { amount, provider }
}

/// Decode a JSON object payload, wrapping anything else under `fallback_key`.
fn decode_object(payload: &str, fallback_key: &str) -> Value {
    match serde_json::from_str::<Value>(payload) {
        Ok(value @ Value::Object(_)) => value,
        _ => {
            let mut map = Map::new();
            map.insert(fallback_key.to_owned(), Value::String(payload.to_owned()));
            Value::Object(map)
        }
    }
}

/// Split `text` into a fully parseable head and a trailing marker fragment.
///
/// The fragment is a suffix that may still become a marker once more output
/// arrives: it begins with [`MARKER_PREFIX`] (or is a proper prefix of it)
/// and contains neither `]` nor a newline. Text without such a suffix is
/// returned whole with an empty fragment.
#[must_use]
pub fn split_trailing_fragment(text: &str) -> (&str, &str) {
    let region_start = text.rfind([']', '\n']).map_or(0, |pos| pos + 1);
    let region = &text[region_start..];

    let fragment_start = if let Some(pos) = region.find(MARKER_PREFIX) {
        Some(region_start + pos)
    } else {
        (1..MARKER_PREFIX.len())
            .rev()
            .find(|&k| region.ends_with(&MARKER_PREFIX[..k]))
            .map(|k| text.len() - k)
    };

    match fragment_start {
        Some(start) if text.len() - start <= MAX_FRAGMENT_LEN => text.split_at(start),
        _ => (text, ""),
    }
}
