//! Line-delimited JSON codec for the agent's stream protocol.
//!
//! # Outbound
//!
//! One user message is one record, `{"type":"user","content":"…"}\n`.
//!
//! # Inbound
//!
//! The agent prints a stream of event records, one per line:
//!
//! | `type`      | Handling                                               |
//! |-------------|--------------------------------------------------------|
//! | `result`    | Terminal: a non-empty `result` string ends the scan    |
//! | `assistant` | `text` content items are accumulated in order          |
//! | *(other)*   | Skipped                                                |
//!
//! Blank and malformed lines are dropped silently. A terminal event is not
//! guaranteed (the process may be killed first), so accumulated assistant
//! text is the fallback answer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Outbound record written to the agent's stdin.
#[derive(Debug, Serialize)]
struct OutboundRecord<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    content: &'a str,
}

/// Inbound event record (agent → server).
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    /// Final answer of one invocation.
    Result {
        #[serde(default)]
        result: Option<String>,
    },
    /// Assistant message carrying content items.
    Assistant {
        #[serde(default)]
        message: AssistantMessage,
    },
    /// System, user echo, tool events and anything newer.
    #[serde(other)]
    Other,
}

/// Content items stay untyped so one odd item cannot drop its siblings.
#[derive(Debug, Default, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Vec<Value>,
}

/// Text of a `{"type":"text","text":"…"}` content item.
fn text_of(item: &Value) -> Option<&str> {
    if item.get("type").and_then(Value::as_str) != Some("text") {
        return None;
    }
    item.get("text").and_then(Value::as_str)
}

/// Encode `message` as one newline-terminated user record.
#[must_use]
pub fn encode_user_message(message: &str) -> String {
    let record = OutboundRecord {
        kind: "user",
        content: message,
    };
    // Serialising a struct of two strings cannot fail.
    let mut line = serde_json::to_string(&record).unwrap_or_default();
    line.push('\n');
    line
}

/// Extract the answer from a captured agent event stream.
///
/// Returns `None` when the stream holds no structured content at all, which
/// the caller treats as "fall back to raw output" rather than as an error or
/// as an empty answer.
#[must_use]
pub fn decode_stream(raw: &str) -> Option<String> {
    let mut accumulated = String::new();

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event = match serde_json::from_str::<StreamEvent>(line) {
            Ok(event) => event,
            Err(err) => {
                debug!(error = %err, "agent stream: skipping undecodable line");
                continue;
            }
        };

        match event {
            StreamEvent::Result {
                result: Some(result),
            } if !result.is_empty() => return Some(result),
            StreamEvent::Assistant { message } => {
                for text in message.content.iter().filter_map(text_of) {
                    accumulated.push_str(text);
                }
            }
            StreamEvent::Result { .. } | StreamEvent::Other => {}
        }
    }

    let trimmed = accumulated.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}
