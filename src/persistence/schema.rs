//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS`, so this runs on
//! every startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS project (
    name            TEXT PRIMARY KEY NOT NULL,
    engines         TEXT NOT NULL,
    description     TEXT NOT NULL DEFAULT '',
    requirements    TEXT NOT NULL DEFAULT '',
    status          TEXT NOT NULL CHECK(status IN ('created','running','completed','failed','stopped')),
    created_by      TEXT NOT NULL DEFAULT '',
    created_at      TEXT NOT NULL,
    project_type    TEXT NOT NULL DEFAULT 'standalone' CHECK(project_type IN ('standalone','bot','web')),
    deploy          INTEGER NOT NULL DEFAULT 0,
    deploy_server   TEXT NOT NULL DEFAULT '',
    subdomain       TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS run (
    id              TEXT PRIMARY KEY NOT NULL,
    project_name    TEXT NOT NULL REFERENCES project(name),
    engine          TEXT NOT NULL,
    session_id      TEXT NOT NULL,
    status          TEXT NOT NULL CHECK(status IN ('running','completed','failed','stopped')),
    phase           INTEGER NOT NULL DEFAULT 0,
    log_offset      INTEGER NOT NULL DEFAULT 0,
    cost_total      REAL NOT NULL DEFAULT 0,
    started_at      TEXT NOT NULL,
    finished_at     TEXT
);

CREATE INDEX IF NOT EXISTS idx_run_project ON run(project_name, engine);
CREATE INDEX IF NOT EXISTS idx_run_status ON run(status);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
