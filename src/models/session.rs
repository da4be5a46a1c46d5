//! Session model: the persisted view projected from a runner.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::prompt::PendingPrompt;
use crate::AppError;

/// Coarse, externally persisted session status.
///
/// Derived from runner state by [`crate::projector::project_status`]; never
/// written by anything else.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No computation in progress.
    #[default]
    Idle,
    /// The agent is starting or actively generating.
    Running,
    /// The agent waits for an allow/deny decision.
    WaitingPermission,
    /// The agent waits for answers to structured questions.
    WaitingQuestion,
}

impl SessionStatus {
    /// Storage spelling of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::WaitingPermission => "waiting_permission",
            Self::WaitingQuestion => "waiting_question",
        }
    }
}

impl Display for SessionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "waiting_permission" => Ok(Self::WaitingPermission),
            "waiting_question" => Ok(Self::WaitingQuestion),
            other => Err(AppError::Db(format!("invalid session status: {other}"))),
        }
    }
}

/// One logical conversation with at most one live agent process at a time.
///
/// Not authoritative over state: `status` and `pending_prompt` are written
/// from the runner's projection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    /// Unique session identifier.
    pub id: String,
    /// Working directory the agent runs in.
    pub working_dir: String,
    /// Resumable external session id announced by the agent.
    pub resume_id: Option<String>,
    /// Projected status.
    pub status: SessionStatus,
    /// Prompt awaiting an answer, if any.
    pub pending_prompt: Option<PendingPrompt>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last status change timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Construct an idle session record.
    #[must_use]
    pub fn new(id: String, working_dir: String, resume_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            working_dir,
            resume_id,
            status: SessionStatus::Idle,
            pending_prompt: None,
            created_at: now,
            updated_at: now,
        }
    }
}
