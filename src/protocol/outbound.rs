//! Outbound message construction (runner → agent).
//!
//! Every function returns one JSON object; the [`LineCodec`] encoder turns
//! it into a single newline-terminated line.
//!
//! [`LineCodec`]: crate::protocol::codec::LineCodec

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::{json, Value};

use crate::models::control::ControlKind;
use crate::models::permission::PermissionDecision;

/// A new user turn carrying `text` plus one `@path` reference per attachment.
#[must_use]
pub fn user_message(text: &str, attachments: &[PathBuf]) -> Value {
    let mut content = vec![json!({ "type": "text", "text": text })];
    for path in attachments {
        content.push(json!({ "type": "text", "text": format!("@{}", path.display()) }));
    }
    json!({
        "type": "user",
        "message": { "role": "user", "content": content }
    })
}

/// A control request with caller-chosen `request_id`.
#[must_use]
pub fn control_request(request_id: &str, kind: ControlKind) -> Value {
    let request = match kind {
        ControlKind::SetPermissionMode { mode } => json!({
            "subtype": kind.subtype(),
            "mode": mode.as_str(),
        }),
        ControlKind::Interrupt => json!({ "subtype": kind.subtype() }),
    };
    json!({
        "type": "control_request",
        "request_id": request_id,
        "request": request,
    })
}

/// Answer to an inbound permission request.
#[must_use]
pub fn permission_response(request_id: &str, decision: &PermissionDecision) -> Value {
    let response = match decision {
        PermissionDecision::Allow { updated_input } => {
            let mut body = json!({ "behavior": "allow" });
            if let Some(input) = updated_input {
                body["updatedInput"] = input.clone();
            }
            body
        }
        PermissionDecision::Deny { message } => json!({
            "behavior": "deny",
            "message": message,
        }),
    };
    json!({
        "type": "control_response",
        "response": {
            "subtype": "success",
            "request_id": request_id,
            "response": response,
        }
    })
}

/// Answers to a structured question prompt, relayed as its tool result.
#[must_use]
pub fn question_answers(tool_use_id: &str, answers: &HashMap<String, String>) -> Value {
    let body = json!({ "answers": answers }).to_string();
    json!({
        "type": "user",
        "message": {
            "role": "user",
            "content": [{
                "type": "tool_result",
                "tool_use_id": tool_use_id,
                "content": body,
            }]
        }
    })
}
