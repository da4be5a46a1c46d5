//! Out-of-band control request and response model.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::permission::PermissionMode;
use crate::{AppError, Result};

/// Kind of control request issued to the agent process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlKind {
    /// Switch the agent's permission mode.
    SetPermissionMode {
        /// Requested mode.
        mode: PermissionMode,
    },
    /// Ask the agent to abandon its current generation.
    Interrupt,
}

impl ControlKind {
    /// Wire `subtype` of the request.
    #[must_use]
    pub fn subtype(self) -> &'static str {
        match self {
            Self::SetPermissionMode { .. } => "set_permission_mode",
            Self::Interrupt => "interrupt",
        }
    }
}

/// Final outcome of a control request. Every issued request ends in exactly one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ControlOutcome {
    /// The agent acknowledged the request.
    Success,
    /// The agent rejected the request, or it could not be delivered.
    Failed {
        /// Reason reported by the agent or the runner.
        error: String,
    },
    /// No response arrived before the deadline.
    TimedOut,
}

impl ControlOutcome {
    /// Whether the request was acknowledged.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Convert into a `Result` for callers that apply their own retry policy.
    ///
    /// # Errors
    ///
    /// - [`AppError::ControlTimeout`] for [`ControlOutcome::TimedOut`].
    /// - [`AppError::Write`] for [`ControlOutcome::Failed`].
    pub fn into_result(self, request_id: &str) -> Result<()> {
        match self {
            Self::Success => Ok(()),
            Self::Failed { error } => Err(AppError::Write(format!(
                "control request {request_id} failed: {error}"
            ))),
            Self::TimedOut => Err(AppError::ControlTimeout(format!(
                "control request {request_id} was not answered in time"
            ))),
        }
    }
}

/// A control request that has been written to the agent and awaits an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRequest {
    /// Caller-chosen correlation identifier.
    pub id: String,
    /// What the request asks for.
    pub kind: ControlKind,
    /// When the request was issued.
    pub issued_at: Instant,
}

/// Resolution of one [`ControlRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlResponse {
    /// Identifier of the resolved request.
    pub id: String,
    /// What the request asked for.
    pub kind: ControlKind,
    /// How it ended.
    pub outcome: ControlOutcome,
}
