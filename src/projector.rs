//! Session State Projector.
//!
//! Derives the persisted [`SessionStatus`] from a runner's coarse phase and
//! its outstanding prompt, so a reconnecting client sees the right status
//! and can redisplay an unanswered prompt without replaying history.
//!
//! `running` is reported only for genuine in-progress computation. A live
//! runner blocked on a prompt is `waiting_*`, never `running`. A finished
//! or failed one is `idle`.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::models::prompt::{PendingPrompt, PromptKind};
use crate::models::session::SessionStatus;
use crate::persistence::session_repo::SessionRepo;
use crate::runner::{RunnerPhase, RunnerSnapshot};

/// Project `phase` and the outstanding `prompt` onto a session status.
#[must_use]
pub fn project_status(phase: RunnerPhase, prompt: Option<&PendingPrompt>) -> SessionStatus {
    match phase {
        RunnerPhase::Idle | RunnerPhase::Result | RunnerPhase::Errored | RunnerPhase::Exited => {
            SessionStatus::Idle
        }
        RunnerPhase::Starting
        | RunnerPhase::Streaming
        | RunnerPhase::WaitingPermission
        | RunnerPhase::WaitingQuestion => match prompt.map(|p| &p.kind) {
            Some(PromptKind::Permission { .. }) => SessionStatus::WaitingPermission,
            Some(PromptKind::Question { .. }) => SessionStatus::WaitingQuestion,
            None => match phase {
                RunnerPhase::WaitingPermission => SessionStatus::WaitingPermission,
                RunnerPhase::WaitingQuestion => SessionStatus::WaitingQuestion,
                _ => SessionStatus::Running,
            },
        },
    }
}

/// Persisted view of one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// Projected status.
    pub status: SessionStatus,
    /// Prompt to redisplay, kept only while the status is waiting on it.
    pub pending_prompt: Option<PendingPrompt>,
}

impl Projection {
    /// Project a runner snapshot.
    #[must_use]
    pub fn of(snapshot: &RunnerSnapshot) -> Self {
        let prompt = snapshot.current_prompt();
        let status = project_status(snapshot.phase, prompt);
        let pending_prompt = match status {
            SessionStatus::WaitingPermission | SessionStatus::WaitingQuestion => prompt.cloned(),
            SessionStatus::Idle | SessionStatus::Running => None,
        };
        Self {
            status,
            pending_prompt,
        }
    }
}

/// Spawn a task that writes every projection change of `snapshots` to
/// `repo`, until the runner exits.
///
/// The resumable id announced by the agent is recorded as well. Database
/// failures are logged and do not stop the recorder.
#[must_use]
pub fn spawn_status_recorder(
    repo: SessionRepo,
    session_id: String,
    mut snapshots: watch::Receiver<RunnerSnapshot>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last: Option<Projection> = None;
        let mut resume_id: Option<String> = None;

        loop {
            let snapshot = snapshots.borrow_and_update().clone();
            let projection = Projection::of(&snapshot);

            if last.as_ref() != Some(&projection) {
                debug!(session_id, status = %projection.status, "recording projected status");
                if let Err(err) = repo
                    .update_projection(
                        &session_id,
                        projection.status,
                        projection.pending_prompt.as_ref(),
                    )
                    .await
                {
                    warn!(session_id, error = %err, "failed to record session status");
                }
                last = Some(projection);
            }

            if snapshot.external_session_id.is_some() && snapshot.external_session_id != resume_id {
                resume_id.clone_from(&snapshot.external_session_id);
                if let Err(err) = repo.set_resume_id(&session_id, resume_id.as_deref()).await {
                    warn!(session_id, error = %err, "failed to record resume id");
                }
            }

            if snapshot.phase.is_terminal() || snapshots.changed().await.is_err() {
                break;
            }
        }
    })
}
