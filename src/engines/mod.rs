//! Static catalogue of supported coding agents.

pub mod health;
pub mod system;

use serde::Serialize;

use crate::{AppError, Result};

/// Immutable description of one agent CLI.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct EngineDescriptor {
    /// Registry key; never contains `-`.
    pub key: &'static str,
    /// Human-readable name.
    pub name: &'static str,
    /// Command typed into the session to launch the agent.
    pub start_cmd: &'static str,
    /// Shell command that installs the agent.
    pub install: &'static str,
    /// Shell command that prints the installed version.
    pub check: &'static str,
    /// Instruction file copied into the working directory.
    pub template: &'static str,
}

static ENGINES: [EngineDescriptor; 4] = [
    EngineDescriptor {
        key: "claude",
        name: "Claude Code",
        start_cmd: r#"claude --dangerously-skip-permissions -p "Read CLAUDE.md and run /factory""#,
        install: "npm install -g @anthropic-ai/claude-code",
        check: "claude --version",
        template: "CLAUDE.md",
    },
    EngineDescriptor {
        key: "gemini",
        name: "Gemini CLI",
        start_cmd: r#"gemini -p "Read GEMINI.md and run /factory""#,
        install: "npm install -g @google/gemini-cli",
        check: "gemini --version",
        template: "GEMINI.md",
    },
    EngineDescriptor {
        key: "opencode",
        name: "OpenCode",
        start_cmd: "opencode",
        install: "curl -fsSL https://opencode.ai/install | bash",
        check: "opencode --version",
        template: "OPENCODE.md",
    },
    EngineDescriptor {
        key: "aider",
        name: "Aider",
        start_cmd: "aider --yes-always",
        install: "pip install aider-chat",
        check: "aider --version",
        template: "aider.conf.yml",
    },
];

/// Look up an engine by key.
///
/// # Errors
///
/// Returns `AppError::NotFound` for an unknown key.
pub fn get(key: &str) -> Result<&'static EngineDescriptor> {
    ENGINES
        .iter()
        .find(|e| e.key == key)
        .ok_or_else(|| AppError::NotFound(format!("unknown engine: {key}")))
}

/// All registered engines in catalogue order.
#[must_use]
pub fn all() -> &'static [EngineDescriptor] {
    &ENGINES
}

/// Display name for `key`, falling back to the key itself.
#[must_use]
pub fn display_name(key: &str) -> &str {
    ENGINES
        .iter()
        .find(|e| e.key == key)
        .map_or(key, |e| e.name)
}
