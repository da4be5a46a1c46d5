//! Unit tests for inbound message decoding.

use serde_json::json;

use session_runner::models::event::AgentEvent;
use session_runner::models::permission::PermissionMode;
use session_runner::protocol::inbound::{parse_line, ContentBlock, InboundMessage};
use session_runner::AppError;

fn parse(value: &serde_json::Value) -> Option<InboundMessage> {
    parse_line("s1", &value.to_string()).expect("line must decode")
}

#[test]
fn system_init_carries_session_id_and_mode() {
    let msg = parse(&json!({
        "type": "system",
        "subtype": "init",
        "session_id": "ext-42",
        "permissionMode": "acceptEdits",
        "tools": ["Bash"]
    }));

    let Some(InboundMessage::System {
        subtype,
        session_id,
        permission_mode,
        raw,
    }) = msg
    else {
        panic!("expected system message, got {msg:?}");
    };
    assert_eq!(subtype, "init");
    assert_eq!(session_id.as_deref(), Some("ext-42"));
    assert_eq!(permission_mode, Some(PermissionMode::AcceptEdits));
    assert_eq!(raw["tools"][0], "Bash");
}

#[test]
fn unknown_permission_mode_spelling_is_ignored() {
    let msg = parse(&json!({"type": "system", "subtype": "init", "permissionMode": "yolo"}));
    assert!(matches!(
        msg,
        Some(InboundMessage::System {
            permission_mode: None,
            ..
        })
    ));
}

#[test]
fn assistant_blocks_are_decoded_in_order() {
    let msg = parse(&json!({
        "type": "assistant",
        "message": {"content": [
            {"type": "thinking", "thinking": "let me see"},
            {"type": "text", "text": "hi"},
            {"type": "tool_use", "id": "toolu_1", "name": "Bash", "input": {"command": "ls"}},
            {"type": "server_tool_use", "id": "x"}
        ]}
    }));

    let Some(InboundMessage::Assistant(blocks)) = msg else {
        panic!("expected assistant message");
    };
    assert_eq!(
        blocks,
        vec![
            ContentBlock::Thinking("let me see".into()),
            ContentBlock::Text("hi".into()),
            ContentBlock::ToolUse {
                id: "toolu_1".into(),
                name: "Bash".into(),
                input: json!({"command": "ls"}),
            },
        ],
        "unknown block types are skipped"
    );
}

#[test]
fn top_level_content_is_accepted() {
    let msg = parse(&json!({"type": "assistant", "content": [{"type": "text", "text": "hi"}]}));
    assert_eq!(
        msg,
        Some(InboundMessage::Assistant(vec![ContentBlock::Text("hi".into())]))
    );
}

#[test]
fn string_content_becomes_a_text_block() {
    let msg = parse(&json!({"type": "assistant", "message": {"content": "plain"}}));
    assert_eq!(
        msg,
        Some(InboundMessage::Assistant(vec![ContentBlock::Text("plain".into())]))
    );
}

#[test]
fn ask_user_question_tool_use_becomes_a_question() {
    let msg = parse(&json!({
        "type": "assistant",
        "message": {"content": [{
            "type": "tool_use",
            "id": "toolu_q",
            "name": "AskUserQuestion",
            "input": {"questions": [
                {"question": "Which database?", "header": "DB",
                 "options": [{"label": "sqlite"}, {"label": "postgres", "description": "server"}],
                 "multiSelect": false}
            ]}
        }]}
    }));

    let Some(InboundMessage::Assistant(mut blocks)) = msg else {
        panic!("expected assistant message");
    };
    let event = blocks.remove(0).into_event();
    let AgentEvent::AskUserQuestion {
        request_id,
        questions,
    } = event
    else {
        panic!("expected ask_user_question event, got {event:?}");
    };
    assert_eq!(request_id, "toolu_q");
    assert_eq!(questions.len(), 1);
    assert_eq!(questions[0].question, "Which database?");
    assert_eq!(questions[0].options[1].description.as_deref(), Some("server"));
}

#[test]
fn ask_user_question_without_questions_stays_a_tool_use() {
    let msg = parse(&json!({
        "type": "assistant",
        "message": {"content": [
            {"type": "tool_use", "id": "t", "name": "AskUserQuestion", "input": {}}
        ]}
    }));
    assert!(matches!(
        msg,
        Some(InboundMessage::Assistant(ref blocks)) if matches!(blocks[0], ContentBlock::ToolUse { .. })
    ));
}

#[test]
fn user_turn_keeps_only_tool_results() {
    let msg = parse(&json!({
        "type": "user",
        "message": {"content": [
            {"type": "text", "text": "echo"},
            {"type": "tool_result", "tool_use_id": "toolu_1", "content": "ok", "is_error": true}
        ]}
    }));
    assert_eq!(
        msg,
        Some(InboundMessage::User(vec![ContentBlock::ToolResult {
            tool_use_id: "toolu_1".into(),
            content: json!("ok"),
            is_error: true,
        }]))
    );
}

#[test]
fn can_use_tool_control_request_is_a_permission_request() {
    let msg = parse(&json!({
        "type": "control_request",
        "request_id": "req-7",
        "request": {"subtype": "can_use_tool", "tool_name": "Write", "input": {"path": "a.txt"}}
    }));
    assert_eq!(
        msg,
        Some(InboundMessage::PermissionRequest {
            request_id: "req-7".into(),
            tool_name: "Write".into(),
            input: json!({"path": "a.txt"}),
        })
    );
}

#[test]
fn other_inbound_control_requests_are_skipped() {
    let msg = parse(&json!({
        "type": "control_request",
        "request_id": "req-8",
        "request": {"subtype": "hook_callback"}
    }));
    assert_eq!(msg, None);
}

#[test]
fn control_response_success_and_error() {
    let ok = parse(&json!({
        "type": "control_response",
        "response": {"subtype": "success", "request_id": "ctl-1"}
    }));
    assert_eq!(
        ok,
        Some(InboundMessage::ControlResponse {
            request_id: "ctl-1".into(),
            error: None,
        })
    );

    let failed = parse(&json!({
        "type": "control_response",
        "response": {"subtype": "error", "request_id": "ctl-2", "error": "busy"}
    }));
    assert_eq!(
        failed,
        Some(InboundMessage::ControlResponse {
            request_id: "ctl-2".into(),
            error: Some("busy".into()),
        })
    );
}

#[test]
fn result_defaults_subtype_to_success() {
    let msg = parse(&json!({"type": "result", "result": "done"}));
    let Some(InboundMessage::Result {
        subtype,
        result,
        is_error,
        ..
    }) = msg
    else {
        panic!("expected result");
    };
    assert_eq!(subtype, "success");
    assert_eq!(result.as_deref(), Some("done"));
    assert!(!is_error);
}

#[test]
fn blank_and_unknown_lines_are_skipped() {
    assert_eq!(parse_line("s1", "").unwrap(), None);
    assert_eq!(parse_line("s1", "   ").unwrap(), None);
    assert_eq!(
        parse_line("s1", r#"{"type":"stream_event","event":{}}"#).unwrap(),
        None
    );
}

#[test]
fn malformed_json_is_a_protocol_error() {
    let err = parse_line("s1", "{not json").expect_err("must fail");
    assert!(matches!(&err, AppError::Protocol(msg) if msg.starts_with("malformed json")));
}

#[test]
fn missing_required_field_is_a_protocol_error() {
    let err = parse_line(
        "s1",
        r#"{"type":"control_request","request_id":"r","request":{"subtype":"can_use_tool"}}"#,
    )
    .expect_err("tool_name is required");
    assert!(
        matches!(&err, AppError::Protocol(msg) if msg.starts_with("invalid control_request message")),
        "unexpected error: {err}"
    );
}
