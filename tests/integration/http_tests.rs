//! Integration tests for the HTTP and WebSocket surface.
//!
//! Each test serves the router on an ephemeral port with a simulated agent
//! and an in-process fake provider.

use futures_util::{SinkExt, Stream, StreamExt};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use agent_relay::http::serve_on;

use super::test_helpers::{
    provider_config, test_app_state, test_broker, FakeLauncher, FakeProvider,
};

struct TestServer {
    base_url: String,
    ws_url: String,
    ct: CancellationToken,
    _root: tempfile::TempDir,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.ct.cancel();
    }
}

/// Serve the app on `127.0.0.1:0` with providers `alpha` (enabled) and
/// `off` (disabled).
async fn spawn_server() -> TestServer {
    let root = tempfile::tempdir().expect("tempdir");
    let launcher = FakeLauncher::new([
        ("alpha", FakeProvider::with_tools(&["read", "write"])),
        ("off", FakeProvider::with_tools(&["x"])),
    ]);
    let broker = test_broker(
        vec![provider_config("alpha", true), provider_config("off", false)],
        launcher,
    );
    let state = test_app_state(root.path(), broker);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral");
    let addr = listener.local_addr().expect("local addr");
    let ct = CancellationToken::new();
    let server_ct = ct.clone();
    tokio::spawn(async move {
        let _ = serve_on(state, listener, server_ct).await;
    });

    TestServer {
        base_url: format!("http://{addr}"),
        ws_url: format!("ws://{addr}"),
        ct,
        _root: root,
    }
}

async fn get_json(url: &str) -> (StatusCode, Value) {
    let resp = reqwest::get(url).await.expect("GET");
    let status = resp.status();
    (status, resp.json().await.expect("json body"))
}

async fn post_json(url: &str, body: &Value) -> (StatusCode, Value) {
    let resp = reqwest::Client::new()
        .post(url)
        .json(body)
        .send()
        .await
        .expect("POST");
    let status = resp.status();
    (status, resp.json().await.expect("json body"))
}

// ── Service endpoints ────────────────────────────────────────

#[tokio::test]
async fn health_reports_service() {
    let server = spawn_server().await;

    let (status, body) = get_json(&format!("{}/health", server.base_url)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "healthy", "service": "agent-relay"}));

    let (status, body) = get_json(&format!("{}/", server.base_url)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].is_string());
}

// ── Chat and sessions ────────────────────────────────────────

#[tokio::test]
async fn chat_then_inspect_and_delete_session() {
    let server = spawn_server().await;

    let (status, result) = post_json(
        &format!("{}/api/chat", server.base_url),
        &json!({"message": "hello", "session_id": "s1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["success"], true);
    assert_eq!(result["session_id"], "s1");
    assert!(result["response"].as_str().expect("text").contains("s1"));

    let (_, listing) = get_json(&format!("{}/api/sessions", server.base_url)).await;
    let sessions = listing["sessions"].as_array().expect("sessions array");
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["message_count"], 2);

    let (status, info) = get_json(&format!("{}/api/sessions/s1", server.base_url)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["session_id"], "s1");
    assert!(info["working_dir"].is_string());

    let client = reqwest::Client::new();
    let deleted = client
        .delete(format!("{}/api/sessions/s1", server.base_url))
        .send()
        .await
        .expect("DELETE");
    assert_eq!(deleted.status(), StatusCode::OK);

    let again = client
        .delete(format!("{}/api/sessions/s1", server.base_url))
        .send()
        .await
        .expect("DELETE");
    assert_eq!(again.status(), StatusCode::NOT_FOUND);

    let (status, body) = get_json(&format!("{}/api/sessions/s1", server.base_url)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Session not found");
}

#[tokio::test]
async fn chat_defaults_session_id() {
    let server = spawn_server().await;

    let (_, result) = post_json(
        &format!("{}/api/chat", server.base_url),
        &json!({"message": "hi"}),
    )
    .await;

    assert_eq!(result["session_id"], "default");
}

// ── Providers ────────────────────────────────────────────────

#[tokio::test]
async fn provider_connect_list_execute_disconnect() {
    let server = spawn_server().await;
    let base = &server.base_url;

    let (_, servers) = get_json(&format!("{base}/api/mcp/servers")).await;
    assert_eq!(servers["servers"]["alpha"]["connected"], false);
    assert_eq!(servers["servers"]["off"]["enabled"], false);

    let (status, body) = post_json(&format!("{base}/api/mcp/servers/alpha/connect"), &json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (_, tools) = get_json(&format!("{base}/api/mcp/tools?server_name=alpha")).await;
    let tools = tools["tools"].as_array().expect("tools array");
    assert_eq!(tools.len(), 2);
    assert!(tools.iter().all(|t| t["server_name"] == "alpha"));

    let (_, resources) = get_json(&format!("{base}/api/mcp/resources")).await;
    assert_eq!(resources["resources"], json!([]));

    let (status, call) = post_json(
        &format!("{base}/api/mcp/tools/execute"),
        &json!({"server_name": "alpha", "tool_name": "read", "arguments": {"input": "f"}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(call["success"], true);
    assert_eq!(call["result"], r#"read:{"input":"f"}"#);

    let (status, _) = post_json(&format!("{base}/api/mcp/servers/alpha/disconnect"), &json!({})).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post_json(&format!("{base}/api/mcp/servers/alpha/disconnect"), &json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn connect_disabled_provider_is_bad_request() {
    let server = spawn_server().await;

    let (status, body) = post_json(
        &format!("{}/api/mcp/servers/off/connect", server.base_url),
        &json!({}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().expect("detail").contains("off"));
}

#[tokio::test]
async fn unconnected_tool_call_is_ok_with_failure_body() {
    let server = spawn_server().await;

    let (status, call) = post_json(
        &format!("{}/api/mcp/tools/execute", server.base_url),
        &json!({"server_name": "alpha", "tool_name": "read"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(call["success"], false);
    assert!(call["result"].is_null());

    let (status, read) = post_json(
        &format!("{}/api/mcp/resources/get", server.base_url),
        &json!({"server_name": "alpha", "uri": "x://y"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(read["success"], false);
}

// ── WebSocket ────────────────────────────────────────────────

#[tokio::test]
async fn websocket_answers_each_frame() {
    let server = spawn_server().await;
    let (mut socket, _) = tokio_tungstenite::connect_async(format!("{}/ws/client-1", server.ws_url))
        .await
        .expect("ws connect");

    socket
        .send(Message::text(json!({"message": "hi", "session_id": "ws1"}).to_string()))
        .await
        .expect("send");
    let reply = next_json(&mut socket).await;
    assert_eq!(reply["type"], "response");
    assert_eq!(reply["data"]["success"], true);
    assert_eq!(reply["data"]["session_id"], "ws1");

    socket.send(Message::text("not json")).await.expect("send");
    let reply = next_json(&mut socket).await;
    assert_eq!(reply["type"], "error");
    assert!(reply["error"].is_string());

    socket
        .send(Message::text(json!({"message": "again"}).to_string()))
        .await
        .expect("send");
    let reply = next_json(&mut socket).await;
    assert_eq!(reply["data"]["session_id"], "default");

    socket.close(None).await.expect("close");
}

async fn next_json<S>(socket: &mut S) -> Value
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let frame = socket.next().await.expect("frame").expect("ws frame");
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).expect("json frame");
        }
    }
}
