//! Permission modes and per-action permission decisions.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::AppError;

/// Policy governing whether the agent may act without per-action confirmation.
///
/// Serialized with the agent's own spelling (`acceptEdits`, not
/// `accept_edits`) because the value travels verbatim over the wire.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// Every sensitive action asks for confirmation.
    #[default]
    Default,
    /// File edits are accepted without confirmation.
    AcceptEdits,
    /// No confirmation is requested for any action.
    BypassPermissions,
    /// Planning only; the agent does not act.
    Plan,
}

impl PermissionMode {
    /// Wire spelling of the mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::BypassPermissions => "bypassPermissions",
            Self::Plan => "plan",
        }
    }
}

impl Display for PermissionMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "acceptEdits" => Ok(Self::AcceptEdits),
            "bypassPermissions" => Ok(Self::BypassPermissions),
            "plan" => Ok(Self::Plan),
            other => Err(AppError::Config(format!("unknown permission mode: {other}"))),
        }
    }
}

/// Caller's answer to a single permission request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "behavior", rename_all = "snake_case")]
pub enum PermissionDecision {
    /// Let the tool run, optionally with rewritten input.
    Allow {
        /// Replacement tool input; `None` keeps the agent's original input.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        updated_input: Option<serde_json::Value>,
    },
    /// Refuse the tool invocation.
    Deny {
        /// Explanation relayed back to the agent.
        message: String,
    },
}

impl PermissionDecision {
    /// Plain allow without input rewriting.
    #[must_use]
    pub fn allow() -> Self {
        Self::Allow {
            updated_input: None,
        }
    }

    /// Deny with the given explanation.
    #[must_use]
    pub fn deny(message: impl Into<String>) -> Self {
        Self::Deny {
            message: message.into(),
        }
    }
}
