//! Unit tests for the agent stream codec.

use agent_relay::agent::codec::{decode_stream, encode_user_message};

#[test]
fn encode_produces_single_newline_terminated_record() {
    let line = encode_user_message("line one\nline \"two\"");

    assert!(line.ends_with('\n'));
    assert_eq!(line.matches('\n').count(), 1, "embedded newlines are escaped");

    let value: serde_json::Value = serde_json::from_str(line.trim_end()).expect("valid json");
    assert_eq!(value["type"], "user");
    assert_eq!(value["content"], "line one\nline \"two\"");
}

#[test]
fn result_event_wins_over_trailing_garbage() {
    let raw = concat!(
        r#"{"type":"system","subtype":"init"}"#,
        "\n",
        r#"{"type":"result","result":"final answer"}"#,
        "\n",
        "not json at all\n",
        r#"{"type":"assistant","message":{"content":[{"type":"text","text":"late"}]}}"#,
        "\n",
    );

    assert_eq!(decode_stream(raw).as_deref(), Some("final answer"));
}

#[test]
fn assistant_fragments_are_concatenated() {
    let raw = concat!(
        r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Hel"}]}}"#,
        "\n",
        r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t1"},{"type":"text","text":"lo"}]}}"#,
        "\n",
    );

    assert_eq!(decode_stream(raw).as_deref(), Some("Hello"));
}

#[test]
fn accumulated_text_is_trimmed() {
    let raw = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"  padded \n"}]}}"#;
    assert_eq!(decode_stream(raw).as_deref(), Some("padded"));
}

#[test]
fn empty_or_malformed_stream_decodes_to_none() {
    assert_eq!(decode_stream(""), None);
    assert_eq!(decode_stream("\n\n   \n"), None);
    assert_eq!(decode_stream("{broken\nplain text output\n"), None);
    assert_eq!(decode_stream(r#"{"type":"system"}"#), None);
}

#[test]
fn empty_result_falls_back_to_assistant_text() {
    let raw = concat!(
        r#"{"type":"assistant","message":{"content":[{"type":"text","text":"partial"}]}}"#,
        "\n",
        r#"{"type":"result","result":""}"#,
        "\n",
    );

    assert_eq!(decode_stream(raw).as_deref(), Some("partial"));
}

#[test]
fn assistant_without_message_is_ignored() {
    let raw = concat!(
        r#"{"type":"assistant"}"#,
        "\n",
        r#"{"type":"result","result":"done"}"#,
    );
    assert_eq!(decode_stream(raw).as_deref(), Some("done"));
}

#[test]
fn malformed_content_item_keeps_sibling_text() {
    let raw = concat!(
        r#"{"type":"assistant","message":{"content":[{"text":"no type"},{"type":"text","text":"kept"},{"type":"text","text":42}]}}"#,
        "\n",
    );

    assert_eq!(decode_stream(raw).as_deref(), Some("kept"));
}
