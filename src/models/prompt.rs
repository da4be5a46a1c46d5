//! Outstanding prompts that block the agent until the caller answers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One selectable option of a structured question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionOption {
    /// Short option label.
    pub label: String,
    /// Optional longer explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One sub-question of a multi-question tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    /// Full question text; answers are keyed by it.
    pub question: String,
    /// Short header shown above the question.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    /// Suggested answers.
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    /// Whether several options may be chosen.
    #[serde(default)]
    pub multi_select: bool,
}

/// Kind of outstanding prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PromptKind {
    /// The agent asks to run a tool.
    Permission {
        /// Tool the agent wants to run.
        tool_name: String,
        /// Tool input as sent by the agent.
        input: serde_json::Value,
    },
    /// The agent asks the caller one or more questions.
    Question {
        /// Every sub-question that must be answered.
        questions: Vec<Question>,
    },
}

/// A prompt the caller has not yet answered.
///
/// Persisted alongside the session status so a reconnecting client can
/// redisplay it without replaying the session history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingPrompt {
    /// Identifier the caller echoes back when answering.
    pub request_id: String,
    /// What is being asked.
    #[serde(flatten)]
    pub kind: PromptKind,
}

impl PendingPrompt {
    /// Whether this prompt is a permission request.
    #[must_use]
    pub fn is_permission(&self) -> bool {
        matches!(self.kind, PromptKind::Permission { .. })
    }

    /// Whether `answers` covers every sub-question of a question prompt.
    ///
    /// Always `false` for permission prompts. Blank answers do not count.
    #[must_use]
    pub fn answered_by(&self, answers: &HashMap<String, String>) -> bool {
        match &self.kind {
            PromptKind::Permission { .. } => false,
            PromptKind::Question { questions } => questions.iter().all(|q| {
                answers
                    .get(&q.question)
                    .is_some_and(|answer| !answer.trim().is_empty())
            }),
        }
    }
}
