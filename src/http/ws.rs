//! WebSocket chat channel at `/ws/{client_id}`.
//!
//! Each inbound text frame is a [`ChatRequest`]; the reply is sent on the
//! same socket before the next frame is read, so responses on one socket
//! keep request order.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use serde_json::{json, Value};
use tracing::{debug, info, info_span, warn, Instrument};

use super::routes::ChatRequest;
use super::AppState;

pub(super) async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Response {
    let span = info_span!("ws_client", client_id = %client_id);
    ws.on_upgrade(move |socket| handle_socket(socket, state, client_id).instrument(span))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, client_id: String) {
    info!(client_id, "client connected");

    while let Some(frame) = socket.recv().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                warn!(client_id, %err, "websocket receive failed");
                break;
            }
        };

        let reply = reply_for(&state, text.as_str()).await;
        if let Err(err) = socket.send(Message::Text(reply.to_string().into())).await {
            debug!(client_id, %err, "websocket send failed");
            break;
        }
    }

    info!(client_id, "client disconnected");
}

async fn reply_for(state: &AppState, frame: &str) -> Value {
    match serde_json::from_str::<ChatRequest>(frame) {
        Ok(request) => {
            let result = state
                .agent
                .chat(&request.message, &request.session_id)
                .await;
            json!({ "type": "response", "data": result })
        }
        Err(err) => json!({ "type": "error", "error": format!("invalid message: {err}") }),
    }
}
