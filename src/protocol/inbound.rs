//! Inbound message decoding (agent → runner).
//!
//! # Known inbound types
//!
//! | `type`             | Maps to                                            |
//! |--------------------|----------------------------------------------------|
//! | `system`           | [`InboundMessage::System`]                         |
//! | `assistant`        | [`InboundMessage::Assistant`] (text/thinking/tool) |
//! | `user`             | [`InboundMessage::User`] (tool results)            |
//! | `control_request`  | [`InboundMessage::PermissionRequest`]              |
//! | `control_response` | [`InboundMessage::ControlResponse`]                |
//! | `result`           | [`InboundMessage::Result`]                         |
//! | *(any other)*      | Skipped; logged at `DEBUG`                         |

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::models::event::AgentEvent;
use crate::models::permission::PermissionMode;
use crate::models::prompt::Question;
use crate::{AppError, Result};

/// Tool name the agent uses for structured multi-question prompts.
pub const ASK_USER_QUESTION_TOOL: &str = "AskUserQuestion";

/// One content block of an `assistant` or `user` message.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    /// Plain text.
    Text(String),
    /// Reasoning text.
    Thinking(String),
    /// Tool invocation.
    ToolUse {
        /// Tool-use identifier.
        id: String,
        /// Tool name.
        name: String,
        /// Tool input.
        input: Value,
    },
    /// Structured question prompt (an `AskUserQuestion` tool use).
    Question {
        /// Tool-use identifier; answers are keyed by it.
        id: String,
        /// The questions asked.
        questions: Vec<Question>,
    },
    /// Result of an earlier tool invocation.
    ToolResult {
        /// Identifier of the originating tool use.
        tool_use_id: String,
        /// Result content.
        content: Value,
        /// Whether the tool failed.
        is_error: bool,
    },
}

impl ContentBlock {
    /// The event this block surfaces as.
    #[must_use]
    pub fn into_event(self) -> AgentEvent {
        match self {
            Self::Text(text) => AgentEvent::Text { text },
            Self::Thinking(thinking) => AgentEvent::Thinking { thinking },
            Self::ToolUse { id, name, input } => AgentEvent::ToolUse { id, name, input },
            Self::Question { id, questions } => AgentEvent::AskUserQuestion {
                request_id: id,
                questions,
            },
            Self::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => AgentEvent::ToolResult {
                tool_use_id,
                content,
                is_error,
            },
        }
    }
}

/// A decoded inbound line.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// System announcement.
    System {
        /// Subtype, e.g. `init`.
        subtype: String,
        /// Resumable session id, if announced.
        session_id: Option<String>,
        /// Permission mode, if announced.
        permission_mode: Option<PermissionMode>,
        /// Raw message.
        raw: Value,
    },
    /// Assistant output blocks.
    Assistant(Vec<ContentBlock>),
    /// Tool results relayed as a user turn.
    User(Vec<ContentBlock>),
    /// The agent asks permission to run a tool.
    PermissionRequest {
        /// Identifier to answer with.
        request_id: String,
        /// Tool name.
        tool_name: String,
        /// Tool input.
        input: Value,
    },
    /// Answer to a control request issued by the runner.
    ControlResponse {
        /// Identifier of the answered request.
        request_id: String,
        /// `None` on success, the agent's error otherwise.
        error: Option<String>,
    },
    /// End of turn.
    Result {
        /// Result subtype.
        subtype: String,
        /// Final text.
        result: Option<String>,
        /// Whether the turn failed.
        is_error: bool,
        /// Raw message.
        raw: Value,
    },
}

// ── Wire shapes ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct SystemWire {
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default, rename = "permissionMode")]
    permission_mode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageWire {
    #[serde(default)]
    message: Option<MessageBody>,
    #[serde(default)]
    content: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    #[serde(default)]
    content: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockWire {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ControlRequestWire {
    request_id: String,
    request: ControlRequestBody,
}

#[derive(Debug, Deserialize)]
struct ControlRequestBody {
    subtype: String,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    input: Value,
}

#[derive(Debug, Deserialize)]
struct ControlResponseWire {
    response: ControlResponseBody,
}

#[derive(Debug, Deserialize)]
struct ControlResponseBody {
    subtype: String,
    request_id: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultWire {
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    is_error: bool,
}

#[derive(Debug, Deserialize)]
struct QuestionsInput {
    questions: Vec<Question>,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Parse a single NDJSON line from the agent into an [`InboundMessage`].
///
/// # Return value
///
/// - `Ok(Some(msg))`: a recognized, complete message.
/// - `Ok(None)`: blank line, unknown `type`, or a control request this
///   runner does not answer (logged at `DEBUG`).
/// - `Err(AppError::Protocol(...))`: not valid JSON, or a recognized type
///   with missing required fields.
///
/// # Errors
///
/// - [`AppError::Protocol`]`("malformed json: …")`: not valid JSON.
/// - [`AppError::Protocol`]`("invalid <type> message: …")`: a recognized
///   type whose required fields are absent.
pub fn parse_line(session_id: &str, line: &str) -> Result<Option<InboundMessage>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let raw: Value = serde_json::from_str(line)
        .map_err(|e| AppError::Protocol(format!("malformed json: {e}")))?;
    let envelope: Envelope = serde_json::from_value(raw.clone())
        .map_err(|e| AppError::Protocol(format!("missing message type: {e}")))?;

    match envelope.kind.as_str() {
        "system" => parse_system(raw).map(Some),
        "assistant" => parse_blocks(&raw, "assistant").map(|b| Some(InboundMessage::Assistant(b))),
        // Only tool results are surfaced from user turns; echoed text is not.
        "user" => parse_blocks(&raw, "user").map(|blocks| {
            Some(InboundMessage::User(
                blocks
                    .into_iter()
                    .filter(|b| matches!(b, ContentBlock::ToolResult { .. }))
                    .collect(),
            ))
        }),
        "control_request" => parse_control_request(session_id, raw),
        "control_response" => parse_control_response(raw).map(Some),
        "result" => parse_result(raw).map(Some),
        other => {
            debug!(
                kind = other,
                session_id, "protocol: skipping unknown inbound type"
            );
            Ok(None)
        }
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn invalid(kind: &str, err: impl std::fmt::Display) -> AppError {
    AppError::Protocol(format!("invalid {kind} message: {err}"))
}

fn parse_system(raw: Value) -> Result<InboundMessage> {
    let wire: SystemWire = serde_json::from_value(raw.clone()).map_err(|e| invalid("system", e))?;
    // An unrecognized mode spelling is not worth dropping the message over.
    let permission_mode = wire.permission_mode.and_then(|m| m.parse().ok());
    Ok(InboundMessage::System {
        subtype: wire.subtype.unwrap_or_default(),
        session_id: wire.session_id,
        permission_mode,
        raw,
    })
}

fn parse_blocks(raw: &Value, kind: &str) -> Result<Vec<ContentBlock>> {
    let wire: MessageWire = serde_json::from_value(raw.clone()).map_err(|e| invalid(kind, e))?;
    let content = wire
        .message
        .and_then(|m| m.content)
        .or(wire.content)
        .unwrap_or(Value::Null);

    let items = match content {
        Value::Array(items) => items,
        Value::String(text) => return Ok(vec![ContentBlock::Text(text)]),
        Value::Null => Vec::new(),
        other => return Err(invalid(kind, format!("unexpected content: {other}"))),
    };

    let mut blocks = Vec::with_capacity(items.len());
    for item in items {
        let block: BlockWire = serde_json::from_value(item).map_err(|e| invalid(kind, e))?;
        match block {
            BlockWire::Text { text } => blocks.push(ContentBlock::Text(text)),
            BlockWire::Thinking { thinking } => blocks.push(ContentBlock::Thinking(thinking)),
            BlockWire::ToolUse { id, name, input } if name == ASK_USER_QUESTION_TOOL => {
                match serde_json::from_value::<QuestionsInput>(input.clone()) {
                    Ok(parsed) => blocks.push(ContentBlock::Question {
                        id,
                        questions: parsed.questions,
                    }),
                    Err(e) => {
                        debug!(error = %e, "protocol: question tool without questions, treating as tool use");
                        blocks.push(ContentBlock::ToolUse { id, name, input });
                    }
                }
            }
            BlockWire::ToolUse { id, name, input } => {
                blocks.push(ContentBlock::ToolUse { id, name, input });
            }
            BlockWire::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => blocks.push(ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            }),
            BlockWire::Other => {}
        }
    }
    Ok(blocks)
}

fn parse_control_request(session_id: &str, raw: Value) -> Result<Option<InboundMessage>> {
    let wire: ControlRequestWire =
        serde_json::from_value(raw).map_err(|e| invalid("control_request", e))?;

    if wire.request.subtype != "can_use_tool" {
        debug!(
            session_id,
            subtype = wire.request.subtype.as_str(),
            "protocol: skipping unsupported inbound control request"
        );
        return Ok(None);
    }

    let tool_name = wire
        .request
        .tool_name
        .ok_or_else(|| invalid("control_request", "missing field `tool_name`"))?;

    Ok(Some(InboundMessage::PermissionRequest {
        request_id: wire.request_id,
        tool_name,
        input: wire.request.input,
    }))
}

fn parse_control_response(raw: Value) -> Result<InboundMessage> {
    let wire: ControlResponseWire =
        serde_json::from_value(raw).map_err(|e| invalid("control_response", e))?;
    let error = if wire.response.subtype == "success" {
        None
    } else {
        Some(
            wire.response
                .error
                .unwrap_or_else(|| format!("agent answered {}", wire.response.subtype)),
        )
    };
    Ok(InboundMessage::ControlResponse {
        request_id: wire.response.request_id,
        error,
    })
}

fn parse_result(raw: Value) -> Result<InboundMessage> {
    let wire: ResultWire = serde_json::from_value(raw.clone()).map_err(|e| invalid("result", e))?;
    Ok(InboundMessage::Result {
        subtype: wire.subtype.unwrap_or_else(|| "success".into()),
        result: wire.result,
        is_error: wire.is_error,
        raw,
    })
}
