//! `SQLite` schema bootstrap logic.
//!
//! All definitions use `IF NOT EXISTS`, so the bootstrap runs on every
//! startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS session (
    id              TEXT PRIMARY KEY NOT NULL,
    working_dir     TEXT NOT NULL,
    resume_id       TEXT,
    status          TEXT NOT NULL CHECK(status IN ('idle','running','waiting_permission','waiting_question')),
    pending_prompt  TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_session_status ON session(status);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
