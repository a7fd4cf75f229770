use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::middleware::AuthUser;
use crate::error::AppError;
use crate::models::message::ChatMessage;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/messages", get(history))
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    user_id: Option<Uuid>,
}

/// Private chat history with one friend, both directions, oldest first.
/// Senders come back normalized; the relay only delivers messages sent while
/// connected, so clients rebuild from here on (re)mount.
async fn history(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<ChatMessage>>, AppError> {
    let friend_id = params
        .user_id
        .ok_or_else(|| AppError::BadRequest("user_id missing".into()))?;

    let rows: Vec<(Uuid, String, String, DateTime<Utc>)> = sqlx::query_as(
        "SELECT m.sender_id, u.username, m.content, m.created_at
         FROM messages m JOIN users u ON u.id = m.sender_id
         WHERE (m.sender_id = $1 AND m.receiver_id = $2)
            OR (m.sender_id = $2 AND m.receiver_id = $1)
         ORDER BY m.created_at",
    )
    .bind(auth.user_id)
    .bind(friend_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(
        rows.into_iter()
            .map(|(sender_id, sender_name, text, timestamp)| ChatMessage {
                sender_id,
                sender_name,
                text,
                timestamp,
            })
            .collect(),
    ))
}
