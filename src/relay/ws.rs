use std::collections::HashSet;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use sqlx::PgPool;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::relay::protocol::{private_counterpart, ClientEvent, ServerEvent};
use crate::relay::{reservation_room, user_room, Relay};
use crate::AppState;

const OUTBOUND_BUFFER: usize = 64;

pub async fn relay_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();

    // Single writer task; room subscriptions funnel into it.
    let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
    let writer = tokio::spawn(async move {
        while let Some(payload) = out_rx.recv().await {
            if sink.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    let mut joined: HashSet<String> = HashSet::new();
    let mut forwarders: Vec<JoinHandle<()>> = Vec::new();

    while let Some(Ok(msg)) = stream.next().await {
        let Ok(event) = serde_json::from_slice::<ClientEvent>(&msg.into_data()) else {
            continue;
        };

        match event {
            ClientEvent::JoinRoom { room_id } => {
                join_room(&state.relay, &mut joined, &mut forwarders, &out_tx, room_id);
            }
            ClientEvent::JoinReservation { reservation_id } => {
                let key = reservation_room(reservation_id);
                join_room(&state.relay, &mut joined, &mut forwarders, &out_tx, key);
            }
            ClientEvent::JoinUserRoom { user_id } => {
                let key = user_room(user_id);
                join_room(&state.relay, &mut joined, &mut forwarders, &out_tx, key);
            }
            ClientEvent::Message { room_id, text, sender_id, sender_name, mode } => {
                if mode != "private" {
                    continue;
                }
                private_message(&state, &room_id, text, sender_id, sender_name).await;
            }
            ClientEvent::ReservationMessage { reservation_id, text, sender_id, sender_name } => {
                reservation_message(&state, reservation_id, text, sender_id, sender_name).await;
            }
            ClientEvent::TriggerUpdate { reservation_id } => {
                state.relay.emit(
                    &reservation_room(reservation_id),
                    &ServerEvent::ReservationUpdate { reservation_id },
                );
            }
        }
    }

    // Connection teardown tears down every room membership with it.
    writer.abort();
    for task in forwarders {
        task.abort();
    }
}

fn join_room(
    relay: &Relay,
    joined: &mut HashSet<String>,
    forwarders: &mut Vec<JoinHandle<()>>,
    out: &mpsc::Sender<String>,
    key: String,
) {
    if !joined.insert(key.clone()) {
        return;
    }
    let mut rx = relay.room(&key).subscribe();
    let out = out.clone();
    forwarders.push(tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(payload) => {
                    if out.send(payload).await.is_err() {
                        break;
                    }
                }
                // Slow consumer skipped some events; chat is best-effort.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }));
}

/// Persist a reservation chat message, then fan it out. Broadcast happens only
/// after a successful insert; on failure the error is logged and nothing is
/// sent (the sender gets no explicit failure ack).
async fn reservation_message(
    state: &AppState,
    reservation_id: Uuid,
    text: String,
    sender_id: Uuid,
    sender_name: String,
) {
    let timestamp = Utc::now();
    let persisted = sqlx::query(
        "INSERT INTO reservation_messages (reservation_id, sender_id, body, created_at)
         VALUES ($1, $2, $3, $4)",
    )
    .bind(reservation_id)
    .bind(sender_id)
    .bind(&text)
    .bind(timestamp)
    .execute(&state.db)
    .await;

    if let Err(e) = persisted {
        tracing::error!(%reservation_id, "failed to persist reservation message: {e}");
        return;
    }

    state.relay.emit(
        &reservation_room(reservation_id),
        &ServerEvent::Message { sender: sender_name, text, timestamp },
    );
}

/// Persist a private chat message and fan it out to the pair room.
async fn private_message(
    state: &AppState,
    room_id: &str,
    text: String,
    sender_id: Uuid,
    sender_name: String,
) {
    let Some(receiver_id) = private_counterpart(room_id, sender_id) else {
        tracing::warn!(room_id, "dropping private message with malformed room key");
        return;
    };

    let saved = insert_private_message(&state.db, sender_id, receiver_id, &text).await;
    let message = match saved {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(room_id, "failed to persist private message: {e}");
            return;
        }
    };

    state.relay.emit(
        room_id,
        &ServerEvent::Message {
            sender: sender_name,
            text: message.content,
            timestamp: message.created_at,
        },
    );
}

async fn insert_private_message(
    db: &PgPool,
    sender_id: Uuid,
    receiver_id: Uuid,
    content: &str,
) -> Result<crate::models::message::Message, sqlx::Error> {
    sqlx::query_as(
        "INSERT INTO messages (sender_id, receiver_id, content)
         VALUES ($1, $2, $3)
         RETURNING id, sender_id, receiver_id, content, created_at",
    )
    .bind(sender_id)
    .bind(receiver_id)
    .bind(content)
    .fetch_one(db)
    .await
}
