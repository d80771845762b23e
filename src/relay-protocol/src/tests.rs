//! Runtime decoding tests.

use pretty_assertions::assert_eq;
use serde_json::json;

use crate::runtime::{ControlRequest, SdkUserMessage};
use crate::{ControlResponse, RuntimeEvent, SdkLine, decode_sdk_line};

fn decode(value: serde_json::Value) -> RuntimeEvent {
    RuntimeEvent::from_sdk_value(&value)
}

#[test]
fn test_system_init() {
    let event = decode(json!({
        "type": "system",
        "subtype": "init",
        "session_id": "sess-1",
        "tools": ["Bash", "Read"],
        "model": "claude-sonnet",
        "cwd": "/tmp"
    }));
    assert_eq!(
        event,
        RuntimeEvent::SessionInit {
            session_id: "sess-1".to_string(),
            tools: vec!["Bash".to_string(), "Read".to_string()],
        }
    );
}

#[test]
fn test_system_init_without_tools() {
    let event = decode(json!({"type": "system", "subtype": "init", "session_id": "s", "tools": null}));
    assert_eq!(
        event,
        RuntimeEvent::SessionInit {
            session_id: "s".to_string(),
            tools: vec![],
        }
    );
}

#[test]
fn test_other_system_subtypes_ignored() {
    let event = decode(json!({"type": "system", "subtype": "status", "status": "compacting"}));
    assert_eq!(event, RuntimeEvent::Other);
}

#[test]
fn test_stream_events() {
    assert_eq!(
        decode(json!({
            "type": "stream_event",
            "event": {"type": "message_start", "message": {"id": "msg_1", "role": "assistant"}}
        })),
        RuntimeEvent::MessageStart
    );

    assert_eq!(
        decode(json!({
            "type": "stream_event",
            "event": {
                "type": "content_block_delta",
                "index": 0,
                "delta": {"type": "text_delta", "text": "Hel"}
            }
        })),
        RuntimeEvent::TextDelta {
            text: "Hel".to_string()
        }
    );

    assert_eq!(
        decode(json!({
            "type": "stream_event",
            "event": {
                "type": "content_block_start",
                "index": 1,
                "content_block": {"type": "tool_use", "id": "toolu_1", "name": "Bash", "input": {}}
            }
        })),
        RuntimeEvent::ToolStart {
            id: "toolu_1".to_string(),
            name: "Bash".to_string(),
            index: Some(1),
        }
    );

    assert_eq!(
        decode(json!({"type": "stream_event", "event": {"type": "content_block_stop", "index": 1}})),
        RuntimeEvent::BlockStop { index: Some(1) }
    );
}

#[test]
fn test_non_text_deltas_and_text_blocks_ignored() {
    assert_eq!(
        decode(json!({
            "type": "stream_event",
            "event": {
                "type": "content_block_delta",
                "index": 1,
                "delta": {"type": "input_json_delta", "partial_json": "{\"cmd\""}
            }
        })),
        RuntimeEvent::Other
    );
    assert_eq!(
        decode(json!({
            "type": "stream_event",
            "event": {
                "type": "content_block_start",
                "index": 0,
                "content_block": {"type": "text", "text": ""}
            }
        })),
        RuntimeEvent::Other
    );
}

#[test]
fn test_assistant_and_result() {
    assert_eq!(
        decode(json!({
            "type": "assistant",
            "message": {"role": "assistant", "content": [{"type": "text", "text": "Hi"}]}
        })),
        RuntimeEvent::AssistantMessage {
            content: vec![json!({"type": "text", "text": "Hi"})],
        }
    );

    assert_eq!(
        decode(json!({
            "type": "result",
            "subtype": "success",
            "result": "Hi",
            "total_cost_usd": 0.0042,
            "is_error": false
        })),
        RuntimeEvent::Result {
            text: "Hi".to_string(),
            cost: 0.0042,
            is_error: false,
        }
    );

    // Error results carry no text and may omit the cost.
    assert_eq!(
        decode(json!({"type": "result", "subtype": "error_during_execution", "is_error": true})),
        RuntimeEvent::Result {
            text: String::new(),
            cost: 0.0,
            is_error: true,
        }
    );
}

#[test]
fn test_failures() {
    assert_eq!(
        decode(json!({
            "type": "stream_event",
            "event": {"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}
        })),
        RuntimeEvent::Failure {
            message: "Overloaded".to_string()
        }
    );
    assert_eq!(
        decode(json!({"type": "error", "message": "boom"})),
        RuntimeEvent::Failure {
            message: "boom".to_string()
        }
    );
}

#[test]
fn test_unrecognized_shapes_are_ignored() {
    assert_eq!(decode(json!({"type": "user", "message": {}})), RuntimeEvent::Other);
    assert_eq!(decode(json!({"type": "assistant"})), RuntimeEvent::Other);
    assert_eq!(decode(json!({"no_type": true})), RuntimeEvent::Other);
    assert_eq!(decode(json!(42)), RuntimeEvent::Other);
    assert_eq!(
        decode(json!({"type": "stream_event", "event": {"type": "ping"}})),
        RuntimeEvent::Other
    );
}

#[test]
fn test_decode_sdk_line() {
    assert_eq!(decode_sdk_line("   "), None);
    assert_eq!(decode_sdk_line("Warning: something"), None);

    assert_eq!(
        decode_sdk_line(
            r#"{"type":"control_response","response":{"subtype":"success","request_id":"req-1"}}"#
        ),
        Some(SdkLine::Control(ControlResponse {
            request_id: "req-1".to_string(),
            outcome: Ok(()),
        }))
    );
    assert_eq!(
        decode_sdk_line(
            r#"{"type":"control_response","response":{"subtype":"error","request_id":"req-2","error":"no turn"}}"#
        ),
        Some(SdkLine::Control(ControlResponse {
            request_id: "req-2".to_string(),
            outcome: Err("no turn".to_string()),
        }))
    );
    assert_eq!(
        decode_sdk_line(r#"{"type":"result","result":"ok","total_cost_usd":1.5}"#),
        Some(SdkLine::Event(RuntimeEvent::Result {
            text: "ok".to_string(),
            cost: 1.5,
            is_error: false,
        }))
    );
}

#[test]
fn test_outbound_lines() {
    let user = serde_json::to_value(SdkUserMessage::new("hello")).unwrap();
    assert_eq!(
        user,
        json!({
            "type": "user",
            "session_id": "",
            "parent_tool_use_id": null,
            "message": {"role": "user", "content": "hello"}
        })
    );

    let interrupt = serde_json::to_value(ControlRequest::interrupt("req-9")).unwrap();
    assert_eq!(
        interrupt,
        json!({
            "type": "control_request",
            "request_id": "req-9",
            "request": {"subtype": "interrupt"}
        })
    );
}

#[test]
fn test_ends_turn() {
    assert!(
        RuntimeEvent::Result {
            text: String::new(),
            cost: 0.0,
            is_error: false
        }
        .ends_turn()
    );
    assert!(
        RuntimeEvent::Failure {
            message: "x".to_string()
        }
        .ends_turn()
    );
    assert!(!RuntimeEvent::MessageStart.ends_turn());
}
