//! WebSocket Module
//!
//! Streams a user's committed session and stats changes to browser clients,
//! the remote change-feed as seen from outside the process.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::api::AppState;
use crate::database::{ChangeFeed, ChangeStream};
use crate::models::ChangeFilter;

/// Upgrade to a WebSocket streaming the user's change events as JSON text
pub async fn change_feed_socket(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let stream = state.engine.feed().subscribe(ChangeFilter::user(user_id.as_str()));
    ws.protocols(["pomodoro-sync"])
        .on_upgrade(move |socket| handle_connection(socket, user_id, stream))
}

async fn handle_connection(socket: WebSocket, user_id: String, mut changes: ChangeStream) {
    let connection_id = Uuid::new_v4().to_string();
    info!(connection_id = %connection_id, user_id = %user_id, "Change-feed client connected");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(e) = sender.send(Message::Pong(payload)).await {
                            error!(connection_id = %connection_id, error = %e, "Error sending pong");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(connection_id = %connection_id, "Change-feed client disconnected");
                        break;
                    }
                    // Clients only listen; other frames are ignored
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(connection_id = %connection_id, error = %e, "WebSocket error");
                        break;
                    }
                }
            }

            change = changes.next() => {
                let Some(event) = change else {
                    debug!(connection_id = %connection_id, "Change-feed closed");
                    break;
                };
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if let Err(e) = sender.send(Message::Text(json)).await {
                            error!(connection_id = %connection_id, error = %e, "Error sending change");
                            break;
                        }
                    }
                    Err(e) => error!(error = %e, "Failed to encode change event"),
                }
            }
        }
    }

    let _ = sender.close().await;
}
