//! Structured events emitted by a runner.

use serde::Serialize;
use serde_json::Value;

use super::control::{ControlKind, ControlOutcome};
use super::permission::PermissionMode;
use super::prompt::Question;

/// How the agent process terminated.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, when the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal number, when killed by a signal.
    pub signal: Option<i32>,
}

impl ExitInfo {
    /// Normal exit with `code`.
    #[must_use]
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    /// Termination by `signal`.
    #[must_use]
    pub fn signal(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    /// Convert a platform exit status.
    #[must_use]
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

/// Immutable event emitted by a runner, ordered within its session.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// System announcement (e.g. `init`).
    System {
        /// System message subtype.
        subtype: String,
        /// Resumable external session identifier, if announced.
        #[serde(skip_serializing_if = "Option::is_none")]
        external_session_id: Option<String>,
        /// Permission mode announced by the agent, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        permission_mode: Option<PermissionMode>,
        /// Raw message as received.
        raw: Value,
    },
    /// Assistant text output.
    Text {
        /// Text content.
        text: String,
    },
    /// Assistant reasoning output.
    Thinking {
        /// Reasoning content.
        thinking: String,
    },
    /// Assistant tool invocation.
    ToolUse {
        /// Tool-use identifier.
        id: String,
        /// Tool name.
        name: String,
        /// Tool input.
        input: Value,
    },
    /// Result of a tool invocation.
    ToolResult {
        /// Identifier of the originating tool use.
        tool_use_id: String,
        /// Result content as received.
        content: Value,
        /// Whether the tool reported an error.
        is_error: bool,
    },
    /// The agent waits for an allow/deny decision.
    PermissionRequest {
        /// Identifier to echo back in the decision.
        request_id: String,
        /// Tool the agent wants to run.
        tool_name: String,
        /// Tool input.
        input: Value,
    },
    /// The agent waits for answers to structured questions.
    AskUserQuestion {
        /// Identifier to echo back with the answers.
        request_id: String,
        /// Questions to answer.
        questions: Vec<Question>,
    },
    /// A control request was resolved.
    ControlResponse {
        /// Identifier of the resolved request.
        request_id: String,
        /// What the request asked for.
        request: ControlKind,
        /// How it ended.
        outcome: ControlOutcome,
    },
    /// The agent finished its turn.
    Result {
        /// Result subtype (`success`, `error_max_turns`, …).
        subtype: String,
        /// Final result text.
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        /// Whether the agent reported the turn as failed.
        is_error: bool,
        /// Raw message as received.
        raw: Value,
    },
    /// A session-level failure.
    Error {
        /// Human-readable description.
        message: String,
    },
    /// The agent process terminated. Always the last event of a session.
    Exit(ExitInfo),
}

impl AgentEvent {
    /// Wire name of the event type.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::Text { .. } => "text",
            Self::Thinking { .. } => "thinking",
            Self::ToolUse { .. } => "tool_use",
            Self::ToolResult { .. } => "tool_result",
            Self::PermissionRequest { .. } => "permission_request",
            Self::AskUserQuestion { .. } => "ask_user_question",
            Self::ControlResponse { .. } => "control_response",
            Self::Result { .. } => "result",
            Self::Error { .. } => "error",
            Self::Exit(_) => "exit",
        }
    }

    /// Whether this is the final event of a session.
    #[must_use]
    pub fn is_exit(&self) -> bool {
        matches!(self, Self::Exit(_))
    }
}

/// An [`AgentEvent`] tagged with its session, as delivered to the host sink.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionEvent {
    /// Session the event belongs to.
    pub session_id: String,
    /// The event itself.
    pub event: AgentEvent,
}

impl SessionEvent {
    /// Wire name of the wrapped event type.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        self.event.event_type()
    }

    /// Event payload as JSON, including its `type` tag.
    #[must_use]
    pub fn payload(&self) -> Value {
        serde_json::to_value(&self.event).unwrap_or(Value::Null)
    }
}
