//! WebSocket notification handlers
//!
//! Each socket is registered with the notifier for its lifetime. A send task
//! drains the connection's queue into the socket while a receive task applies
//! subscribe requests; whichever ends first tears down the other.

use axum::{
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;
use waterwatch_core::domain::event::Subscription;
use waterwatch_core::dto::notify::{ClientMessage, ServerMessage};

use crate::context::AppState;
use crate::notify::{ConnectionId, Notifier};

/// GET /ws
/// General connection; the client subscribes with `{"action": "subscribe", ...}`
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, None))
}

/// GET /ws/{entity_type}/{entity_id}
/// Connection pre-subscribed to a single entity
pub async fn ws_entity_handler(
    ws: WebSocketUpgrade,
    Path((entity_type, entity_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let subscription = Subscription::Entity {
        entity_type,
        entity_id,
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, Some(subscription)))
}

async fn handle_socket(socket: WebSocket, state: AppState, initial: Option<Subscription>) {
    let id: ConnectionId = Uuid::new_v4();
    let notifier = state.notifier().clone();
    let mut outbound = notifier.connect(id);
    if let Some(subscription) = initial {
        notifier.subscribe(id, subscription);
    }

    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        // Ends when the notifier drops this connection or the socket closes
        while let Some(message) = outbound.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode server message: {}", e);
                    continue;
                }
            };
            if let Err(e) = sender.send(Message::Text(text.into())).await {
                debug!(connection_id = %id, "WebSocket send failed: {}", e);
                break;
            }
        }
    });

    let recv_notifier = notifier.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => handle_client_message(&recv_notifier, id, text.as_str()),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    notifier.disconnect(id);
    info!(connection_id = %id, "WebSocket closed");
}

fn handle_client_message(notifier: &Notifier, id: ConnectionId, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => {
            notifier.subscribe(id, message.subscription());
        }
        Err(e) => {
            debug!(connection_id = %id, "Rejected client message: {}", e);
            notifier.send_to(
                id,
                ServerMessage::system_error(
                    "invalid_message",
                    format!("could not parse message: {}", e),
                    json!({ "received": text }),
                ),
            );
        }
    }
}
