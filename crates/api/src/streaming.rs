//! WebSocket push of poll updates.
//!
//! A client connects to `/ws/polls/{id}`, is subscribed to that poll and
//! gets its current state right away. Afterwards every committed change to
//! the poll is pushed as a [`PollUpdateMessage`](livepoll_core::PollUpdateMessage).

#![allow(missing_docs)]

use axum::{
    extract::{
        Path, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::middleware::AppState;

/// Client-to-server message.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Switch the subscription to another poll.
    Subscribe {
        #[serde(rename = "pollId")]
        poll_id: String,
    },
    /// Keepalive.
    Ping,
}

/// Server-to-client control message.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    /// Answer to a ping.
    Pong,
    /// A client message could not be handled.
    Error { message: String },
}

/// WebSocket handler for poll updates.
pub async fn poll_stream_handler(
    ws: WebSocketUpgrade,
    Path(poll_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    debug!(poll_id = %poll_id, "New poll stream connection");

    ws.on_upgrade(move |socket| handle_socket(socket, poll_id, state))
}

/// Handle a WebSocket connection.
async fn handle_socket(socket: WebSocket, poll_id: String, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    match state.poll_service.get_poll(&poll_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            debug!(poll_id = %poll_id, "Stream requested for unknown poll");
            let frame = CloseFrame {
                code: close_code::POLICY,
                reason: "poll not found".into(),
            };
            let _ = sender.send(Message::Close(Some(frame))).await;
            return;
        }
        Err(e) => {
            error!(poll_id = %poll_id, error = %e, "Failed to load poll for stream");
            let frame = CloseFrame {
                code: close_code::ERROR,
                reason: "internal error".into(),
            };
            let _ = sender.send(Message::Close(Some(frame))).await;
            return;
        }
    }

    let (connection, mut updates) = state.hub.register().await;
    state.hub.subscribe(connection, &poll_id).await;
    if let Err(e) = state.hub.send_snapshot(connection, &poll_id).await {
        warn!(poll_id = %poll_id, error = %e, "Failed to send initial snapshot");
    }

    info!(connection_id = %connection, poll_id = %poll_id, "Poll stream established");

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_client_message(&state, connection, &text).await;
                        if let Some(reply) = reply {
                            let json = serde_json::to_string(&reply).unwrap_or_default();
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(connection_id = %connection, "Client closed connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(connection_id = %connection, error = %e, "WebSocket error");
                        break;
                    }
                }
            }

            Some(json) = updates.recv() => {
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.hub.unsubscribe(connection).await;
    info!(connection_id = %connection, "Poll stream closed");
}

/// Handle a client message.
async fn handle_client_message(
    state: &AppState,
    connection: livepoll_core::ConnectionId,
    text: &str,
) -> Option<ServerMessage> {
    let msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(error = %e, "Failed to parse client message");
            return Some(ServerMessage::Error {
                message: "unrecognised message".to_string(),
            });
        }
    };

    match msg {
        ClientMessage::Ping => Some(ServerMessage::Pong),
        ClientMessage::Subscribe { poll_id } => {
            match state.poll_service.get_poll(&poll_id).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    return Some(ServerMessage::Error {
                        message: format!("poll not found: {poll_id}"),
                    });
                }
                Err(e) => {
                    error!(poll_id = %poll_id, error = %e, "Failed to load poll for subscription");
                    return Some(ServerMessage::Error {
                        message: "internal error".to_string(),
                    });
                }
            }

            state.hub.subscribe(connection, &poll_id).await;
            if let Err(e) = state.hub.send_snapshot(connection, &poll_id).await {
                warn!(poll_id = %poll_id, error = %e, "Failed to send snapshot");
            }
            None
        }
    }
}
