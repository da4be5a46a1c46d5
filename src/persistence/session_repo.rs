//! Session repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::prompt::PendingPrompt;
use crate::models::session::{Session, SessionStatus};
use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around `SQLite` for projected session records.
#[derive(Clone)]
pub struct SessionRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    working_dir: String,
    resume_id: Option<String>,
    status: String,
    pending_prompt: Option<String>,
    created_at: String,
    updated_at: String,
}

impl SessionRow {
    /// Convert a database row into the domain model.
    fn into_session(self) -> Result<Session> {
        let status = self.status.parse::<SessionStatus>()?;
        let pending_prompt = self
            .pending_prompt
            .as_deref()
            .map(serde_json::from_str::<PendingPrompt>)
            .transpose()
            .map_err(|e| AppError::Db(format!("invalid pending_prompt: {e}")))?;

        Ok(Session {
            id: self.id,
            working_dir: self.working_dir,
            resume_id: self.resume_id,
            status,
            pending_prompt,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
        })
    }
}

fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid {field}: {e}")))
}

fn encode_prompt(prompt: Option<&PendingPrompt>) -> Result<Option<String>> {
    prompt
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| AppError::Db(format!("serialize pending_prompt: {e}")))
}

impl SessionRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new session record, or reset an existing one with the same id
    /// for a fresh run (the creation time is kept).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the database write fails.
    pub async fn create(&self, session: &Session) -> Result<Session> {
        let pending_prompt = encode_prompt(session.pending_prompt.as_ref())?;

        sqlx::query(
            "INSERT INTO session (id, working_dir, resume_id, status, pending_prompt,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                working_dir = excluded.working_dir,
                resume_id = COALESCE(excluded.resume_id, session.resume_id),
                status = excluded.status,
                pending_prompt = excluded.pending_prompt,
                updated_at = excluded.updated_at",
        )
        .bind(&session.id)
        .bind(&session.working_dir)
        .bind(&session.resume_id)
        .bind(session.status.as_str())
        .bind(&pending_prompt)
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;

        self.get_by_id(&session.id).await
    }

    /// Retrieve a session by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist, or
    /// `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Session> {
        let row: Option<SessionRow> = sqlx::query_as("SELECT * FROM session WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.ok_or_else(|| AppError::NotFound(format!("session {id} not found")))?
            .into_session()
    }

    /// Record a projected status together with the prompt to redisplay.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist, or
    /// `AppError::Db` if the update fails.
    pub async fn update_projection(
        &self,
        id: &str,
        status: SessionStatus,
        pending_prompt: Option<&PendingPrompt>,
    ) -> Result<()> {
        let pending_prompt = encode_prompt(pending_prompt)?;

        let result = sqlx::query(
            "UPDATE session SET status = ?1, pending_prompt = ?2, updated_at = ?3 WHERE id = ?4",
        )
        .bind(status.as_str())
        .bind(&pending_prompt)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(self.db.as_ref())
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("session {id} not found")));
        }
        Ok(())
    }

    /// Record the resumable external session id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn set_resume_id(&self, id: &str, resume_id: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE session SET resume_id = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(resume_id)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// List sessions in `status`, most recently updated first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_by_status(&self, status: SessionStatus) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            "SELECT * FROM session WHERE status = ?1 ORDER BY updated_at DESC, id ASC",
        )
        .bind(status.as_str())
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// Mark every non-idle session idle and clear its prompt.
    ///
    /// Used at host startup: no runner survives a restart, so nothing can
    /// still be running or waiting. Returns the number of rows changed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn reset_stale(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE session SET status = 'idle', pending_prompt = NULL, updated_at = ?1
             WHERE status != 'idle'",
        )
        .bind(Utc::now().to_rfc3339())
        .execute(self.db.as_ref())
        .await?;
        Ok(result.rows_affected())
    }
}
