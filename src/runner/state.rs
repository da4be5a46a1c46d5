//! Runner phases and the observable snapshot.

use std::fmt::{Display, Formatter};

use serde::Serialize;

use crate::models::permission::PermissionMode;
use crate::models::prompt::PendingPrompt;

/// Coarse lifecycle phase of a runner.
///
/// ```text
/// Idle → Starting → Streaming ⇄ {WaitingPermission | WaitingQuestion}
///                   Streaming → Result → Exited
/// any → Errored → Exited
/// ```
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunnerPhase {
    /// Constructed, not started.
    #[default]
    Idle,
    /// Launching, or launched without any output yet.
    Starting,
    /// The agent is producing output.
    Streaming,
    /// Blocked on a permission decision.
    WaitingPermission,
    /// Blocked on answers to a structured question.
    WaitingQuestion,
    /// The agent finished its turn; waiting for the process to end.
    Result,
    /// A fatal failure was observed; waiting for the process to end.
    Errored,
    /// Terminal.
    Exited,
}

impl RunnerPhase {
    /// Lowercase name used in logs and JSON.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Streaming => "streaming",
            Self::WaitingPermission => "waiting_permission",
            Self::WaitingQuestion => "waiting_question",
            Self::Result => "result",
            Self::Errored => "errored",
            Self::Exited => "exited",
        }
    }

    /// Whether the runner has finished for good.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Exited)
    }

    /// Whether a process exists or is being started and no failure was seen.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(
            self,
            Self::Starting
                | Self::Streaming
                | Self::WaitingPermission
                | Self::WaitingQuestion
                | Self::Result
        )
    }
}

impl Display for RunnerPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a runner, published after every state change.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunnerSnapshot {
    /// Current phase.
    pub phase: RunnerPhase,
    /// Last permission mode confirmed by the agent.
    pub permission_mode: Option<PermissionMode>,
    /// Most recently requested mode; provisional until confirmed.
    pub requested_mode: Option<PermissionMode>,
    /// Unanswered prompts in arrival order.
    pub pending_prompts: Vec<PendingPrompt>,
    /// Unresolved control requests.
    pub pending_controls: usize,
    /// Resumable session id announced by the agent.
    pub external_session_id: Option<String>,
}

impl RunnerSnapshot {
    /// The prompt a client should be shown first, if any.
    #[must_use]
    pub fn current_prompt(&self) -> Option<&PendingPrompt> {
        self.pending_prompts
            .iter()
            .find(|p| p.is_permission())
            .or_else(|| self.pending_prompts.first())
    }
}
