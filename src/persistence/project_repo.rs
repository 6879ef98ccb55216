//! Project and run repository for `SQLite` persistence.
//!
//! Every read-modify-write runs inside a transaction while holding the
//! project's keyed lock, so concurrent monitors of one project apply their
//! updates one at a time and monitors of different projects never wait on
//! each other. Write transactions open with `BEGIN IMMEDIATE` so a writer
//! queues on the busy timeout instead of failing a read-to-write upgrade.
//! Run order within a project is insertion order (`rowid`).

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqliteConnection, Transaction};
use tracing::debug;

use crate::models::project::{validate_project_name, NewProject, Project, ProjectStatus, ProjectType};
use crate::models::run::{Run, RunStatus, RunUpdate};
use crate::{AppError, Result};

use super::db::Database;
use super::locks::KeyedLocks;

const PROJECT_COLUMNS: &str = "name, engines, description, requirements, status, created_by, \
     created_at, project_type, deploy, deploy_server, subdomain";

const RUN_COLUMNS: &str = "id, project_name, engine, session_id, status, phase, log_offset, \
     cost_total, started_at, finished_at";

/// Repository for project and run records.
#[derive(Clone)]
pub struct ProjectRepo {
    db: Arc<Database>,
    locks: Arc<KeyedLocks>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct ProjectRow {
    name: String,
    engines: String,
    description: String,
    requirements: String,
    status: String,
    created_by: String,
    created_at: String,
    project_type: String,
    deploy: i64,
    deploy_server: String,
    subdomain: String,
}

impl ProjectRow {
    fn into_project(self, runs: Vec<Run>) -> Result<Project> {
        let engines: Vec<String> = serde_json::from_str(&self.engines)
            .map_err(|e| AppError::Db(format!("invalid engines column: {e}")))?;
        let project_type = ProjectType::parse(&self.project_type)
            .map_err(|e| AppError::Db(e.to_string()))?;

        Ok(Project {
            name: self.name,
            engines,
            description: self.description,
            requirements: self.requirements,
            status: ProjectStatus::parse(&self.status)?,
            created_by: self.created_by,
            created_at: parse_ts(&self.created_at, "created_at")?,
            project_type,
            deploy: self.deploy != 0,
            deploy_server: self.deploy_server,
            subdomain: self.subdomain,
            runs,
        })
    }
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct RunRow {
    id: String,
    project_name: String,
    engine: String,
    session_id: String,
    status: String,
    phase: i64,
    log_offset: i64,
    cost_total: f64,
    started_at: String,
    finished_at: Option<String>,
}

impl RunRow {
    fn into_run(self) -> Result<Run> {
        let phase = u32::try_from(self.phase)
            .map_err(|_| AppError::Db(format!("invalid phase: {}", self.phase)))?;
        let log_offset = u64::try_from(self.log_offset)
            .map_err(|_| AppError::Db(format!("invalid log_offset: {}", self.log_offset)))?;
        let finished_at = self
            .finished_at
            .as_deref()
            .map(|ts| parse_ts(ts, "finished_at"))
            .transpose()?;

        Ok(Run {
            id: self.id,
            project_name: self.project_name,
            engine: self.engine,
            session_id: self.session_id,
            status: RunStatus::parse(&self.status)?,
            phase,
            log_offset,
            cost_total: self.cost_total,
            started_at: parse_ts(&self.started_at, "started_at")?,
            finished_at,
        })
    }
}

fn parse_ts(value: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid {column}: {e}")))
}

fn offset_to_i64(offset: u64) -> i64 {
    i64::try_from(offset).unwrap_or(i64::MAX)
}

async fn project_exists(conn: &mut SqliteConnection, name: &str) -> Result<bool> {
    let found: Option<(String,)> = sqlx::query_as("SELECT name FROM project WHERE name = ?1")
        .bind(name)
        .fetch_optional(conn)
        .await?;
    Ok(found.is_some())
}

async fn runs_of(conn: &mut SqliteConnection, project: &str) -> Result<Vec<Run>> {
    let rows: Vec<RunRow> = sqlx::query_as(&format!(
        "SELECT {RUN_COLUMNS} FROM run WHERE project_name = ?1 ORDER BY rowid ASC"
    ))
    .bind(project)
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(RunRow::into_run).collect()
}

async fn current_run(conn: &mut SqliteConnection, project: &str, engine: &str) -> Result<Option<Run>> {
    let row: Option<RunRow> = sqlx::query_as(&format!(
        "SELECT {RUN_COLUMNS} FROM run
         WHERE project_name = ?1 AND engine = ?2 AND status = 'running'
         ORDER BY rowid DESC LIMIT 1"
    ))
    .bind(project)
    .bind(engine)
    .fetch_optional(conn)
    .await?;
    row.map(RunRow::into_run).transpose()
}

impl ProjectRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            locks: Arc::new(KeyedLocks::new()),
        }
    }

    async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.db.begin_with("BEGIN IMMEDIATE").await?)
    }

    /// Insert a new project in `created` status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidInput` for a malformed name,
    /// `AppError::Conflict` if the name is taken, or `AppError::Db`.
    pub async fn create_project(&self, input: &NewProject) -> Result<Project> {
        validate_project_name(&input.name)?;
        let _guard = self.locks.lock(&input.name).await;

        let project = Project {
            name: input.name.clone(),
            engines: input.engines.clone(),
            description: input.effective_description(),
            requirements: input.requirements.clone(),
            status: ProjectStatus::Created,
            created_by: input.created_by.clone(),
            created_at: Utc::now(),
            project_type: input.project_type,
            deploy: input.deploy,
            deploy_server: input.deploy_server.clone(),
            subdomain: input.subdomain.clone(),
            runs: Vec::new(),
        };
        let engines = serde_json::to_string(&project.engines)
            .map_err(|e| AppError::Db(format!("failed to encode engines: {e}")))?;

        let mut tx = self.begin_write().await?;
        if project_exists(&mut tx, &project.name).await? {
            return Err(AppError::Conflict(format!(
                "project already exists: {}",
                project.name
            )));
        }

        sqlx::query(&format!(
            "INSERT INTO project ({PROJECT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
        ))
        .bind(&project.name)
        .bind(&engines)
        .bind(&project.description)
        .bind(&project.requirements)
        .bind(project.status.as_str())
        .bind(&project.created_by)
        .bind(project.created_at.to_rfc3339())
        .bind(project.project_type.as_str())
        .bind(i64::from(project.deploy))
        .bind(&project.deploy_server)
        .bind(&project.subdomain)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(project = %project.name, "project created");
        Ok(project)
    }

    /// Retrieve one project with its runs.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the project does not exist.
    pub async fn get_project(&self, name: &str) -> Result<Project> {
        let mut conn = self.db.acquire().await?;
        let row: Option<ProjectRow> = sqlx::query_as(&format!(
            "SELECT {PROJECT_COLUMNS} FROM project WHERE name = ?1"
        ))
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;
        let row = row.ok_or_else(|| AppError::NotFound(format!("project not found: {name}")))?;
        let runs = runs_of(&mut conn, name).await?;
        row.into_project(runs)
    }

    /// All projects keyed by name, each with its runs.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_projects(&self) -> Result<BTreeMap<String, Project>> {
        let mut conn = self.db.acquire().await?;
        let project_rows: Vec<ProjectRow> =
            sqlx::query_as(&format!("SELECT {PROJECT_COLUMNS} FROM project"))
                .fetch_all(&mut *conn)
                .await?;
        let run_rows: Vec<RunRow> =
            sqlx::query_as(&format!("SELECT {RUN_COLUMNS} FROM run ORDER BY rowid ASC"))
                .fetch_all(&mut *conn)
                .await?;

        let mut runs_by_project: BTreeMap<String, Vec<Run>> = BTreeMap::new();
        for row in run_rows {
            let run = row.into_run()?;
            runs_by_project
                .entry(run.project_name.clone())
                .or_default()
                .push(run);
        }

        project_rows
            .into_iter()
            .map(|row| {
                let runs = runs_by_project.remove(&row.name).unwrap_or_default();
                let project = row.into_project(runs)?;
                Ok((project.name.clone(), project))
            })
            .collect()
    }

    /// Every run still marked `running`, across all projects.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_running_runs(&self) -> Result<Vec<Run>> {
        let rows: Vec<RunRow> = sqlx::query_as(&format!(
            "SELECT {RUN_COLUMNS} FROM run WHERE status = 'running' ORDER BY rowid ASC"
        ))
        .fetch_all(self.db.as_ref())
        .await?;
        rows.into_iter().map(RunRow::into_run).collect()
    }

    /// Append a `running` run for `engine`, superseding any active one.
    ///
    /// The superseded run becomes `stopped` with a finish timestamp, and the
    /// project status becomes `running`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown project or `AppError::Db`.
    pub async fn add_run(&self, project: &str, engine: &str, session_id: &str) -> Result<Run> {
        let _guard = self.locks.lock(project).await;
        let mut tx = self.begin_write().await?;

        if !project_exists(&mut tx, project).await? {
            return Err(AppError::NotFound(format!("project not found: {project}")));
        }

        let now = Utc::now().to_rfc3339();
        let superseded = sqlx::query(
            "UPDATE run SET status = 'stopped', finished_at = ?1
             WHERE project_name = ?2 AND engine = ?3 AND status = 'running'",
        )
        .bind(&now)
        .bind(project)
        .bind(engine)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let run = Run::new(project.to_owned(), engine.to_owned(), session_id.to_owned());
        sqlx::query(&format!(
            "INSERT INTO run ({RUN_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        ))
        .bind(&run.id)
        .bind(&run.project_name)
        .bind(&run.engine)
        .bind(&run.session_id)
        .bind(run.status.as_str())
        .bind(i64::from(run.phase))
        .bind(offset_to_i64(run.log_offset))
        .bind(run.cost_total)
        .bind(run.started_at.to_rfc3339())
        .bind(run.finished_at.map(|ts| ts.to_rfc3339()))
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE project SET status = 'running' WHERE name = ?1")
            .bind(project)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(project, engine, run_id = %run.id, superseded, "run added");
        Ok(run)
    }

    /// Apply `update` to the current run of `engine`.
    ///
    /// Returns the updated run, or `None` (and changes nothing) when the
    /// engine has no `running` run. A terminal status recomputes the project
    /// status from the latest run of every engine.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the transaction fails.
    pub async fn update_run(
        &self,
        project: &str,
        engine: &str,
        update: &RunUpdate,
    ) -> Result<Option<Run>> {
        if update.is_empty() {
            return Ok(None);
        }

        let _guard = self.locks.lock(project).await;
        let mut tx = self.begin_write().await?;

        let Some(mut run) = current_run(&mut tx, project, engine).await? else {
            debug!(project, engine, "no current run to update");
            return Ok(None);
        };
        run.apply(update);

        sqlx::query(
            "UPDATE run SET status = ?1, phase = ?2, log_offset = ?3, cost_total = ?4,
                            finished_at = ?5
             WHERE id = ?6",
        )
        .bind(run.status.as_str())
        .bind(i64::from(run.phase))
        .bind(offset_to_i64(run.log_offset))
        .bind(run.cost_total)
        .bind(run.finished_at.map(|ts| ts.to_rfc3339()))
        .bind(&run.id)
        .execute(&mut *tx)
        .await?;

        if run.status.is_terminal() {
            let runs = runs_of(&mut tx, project).await?;
            if let Some(status) = Project::aggregate_status(&runs) {
                sqlx::query("UPDATE project SET status = ?1 WHERE name = ?2")
                    .bind(status.as_str())
                    .bind(project)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;

        Ok(Some(run))
    }
}
