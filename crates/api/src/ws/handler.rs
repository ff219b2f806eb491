use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::task::JoinHandle;

use crate::state::AppState;
use crate::ws::events::InboundEvent;
use crate::ws::session::{Flow, Session};

/// HTTP handler that upgrades the connection to WebSocket.
///
/// After the upgrade the connection is registered with `WsManager` and
/// driven by a sender task, the receive loop below, and at most one
/// calculation task.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Manage a single WebSocket connection after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Registers the connection with `WsManager` and greets the client.
///   2. Spawns a sender task that forwards messages from the manager channel.
///   3. Dispatches inbound events on the current task.
///   4. On disconnect: unregisters and aborts the calculation, whose
///      workspace guard then removes the session's workspace.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, "WebSocket connected");

    let ws_manager = Arc::clone(&state.ws_manager);
    let mut rx = ws_manager.add(conn_id.clone()).await;

    let (mut sink, mut stream) = socket.split();

    // Sender task: forward channel messages to the WebSocket sink until the
    // server closes the connection.
    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let session = Session::new(state, &conn_id);
    session.greet().await;
    let mut calculation: Option<JoinHandle<()>> = None;

    // Receiver loop: dispatch inbound events.
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<InboundEvent>(text.as_str()) {
                Ok(InboundEvent::SendModel(submission)) => {
                    if let Some(task) = session.submit(Flow::Initial, submission).await {
                        calculation = Some(task);
                    }
                }
                Ok(InboundEvent::SendModelUpdate(submission)) => {
                    if let Some(task) = session.submit(Flow::Update, submission).await {
                        calculation = Some(task);
                    }
                }
                Ok(InboundEvent::Message(data)) => {
                    tracing::info!(conn_id = %conn_id, %data, "Client message");
                }
                Err(e) => {
                    tracing::debug!(conn_id = %conn_id, error = %e, "Ignoring malformed WebSocket frame");
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    // Clean up: stop outbound traffic first so an interrupted calculation
    // cannot emit anything, then cancel it.
    ws_manager.remove(&conn_id).await;
    if let Some(task) = calculation {
        task.abort();
        let _ = task.await;
    }
    session.abandon().await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, "WebSocket disconnected");
}
