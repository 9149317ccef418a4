use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use super::InventoryEvent;
use crate::app_state::AppState;
use crate::middleware::Authenticated;

pub async fn inventory_feed(
    ws: WebSocketUpgrade,
    Authenticated(principal): Authenticated,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let rx = state.events.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, rx, principal.company_id))
}

/// The next event for `company_id`, skipping other companies' events and
/// lagged gaps. `None` once the channel closes.
pub async fn next_company_event(
    rx: &mut broadcast::Receiver<InventoryEvent>,
    company_id: Uuid,
) -> Option<InventoryEvent> {
    loop {
        match rx.recv().await {
            Ok(event) if event.company_id() == company_id => return Some(event),
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Inventory feed subscriber lagged");
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

async fn handle_socket(socket: WebSocket, mut rx: broadcast::Receiver<InventoryEvent>, company_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();

    // The feed is one-way; inbound frames are only watched for the close.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = next_company_event(&mut rx, company_id).await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut recv_task => send_task.abort(),
        _ = &mut send_task => recv_task.abort(),
    }
}
