use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize)]
#[allow(dead_code)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Normalized chat message: senders are resolved to `{sender_id, sender_name}`
/// at the retrieval boundary, for both private and reservation chat.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub sender_id: Uuid,
    pub sender_name: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}
