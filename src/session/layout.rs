//! Filesystem layout for per-engine working directories.

use std::path::{Path, PathBuf};

/// Subdirectories created under `artifacts/` for every working directory.
pub const ARTIFACT_DIRS: [&str; 8] = [
    "requirements",
    "reports",
    "architecture",
    "code",
    "tests",
    "reviews",
    "docs",
    "release",
];

/// Sentinel file an agent watches for a cooperative shutdown request.
pub const STOP_FILE: &str = ".factory-stop";

/// Maps `(project, engine)` to paths under the factory root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    root: PathBuf,
}

impl WorkspaceLayout {
    /// Create a layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Factory root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Working directory for one engine of a project.
    #[must_use]
    pub fn project_dir(&self, project: &str, engine: &str) -> PathBuf {
        self.root.join(format!("{project}-{engine}"))
    }

    /// `artifacts/` directory inside the working directory.
    #[must_use]
    pub fn artifacts_dir(&self, project: &str, engine: &str) -> PathBuf {
        self.project_dir(project, engine).join("artifacts")
    }

    /// Append-only agent log tailed by the run monitor.
    #[must_use]
    pub fn log_file(&self, project: &str, engine: &str) -> PathBuf {
        self.artifacts_dir(project, engine)
            .join("reports")
            .join("factory-run.log")
    }

    /// Cooperative stop sentinel.
    #[must_use]
    pub fn stop_file(&self, project: &str, engine: &str) -> PathBuf {
        self.project_dir(project, engine).join(STOP_FILE)
    }

    /// Requirements file handed to the agent.
    #[must_use]
    pub fn requirements_file(&self, project: &str, engine: &str) -> PathBuf {
        self.artifacts_dir(project, engine)
            .join("requirements")
            .join("raw-input.md")
    }
}
