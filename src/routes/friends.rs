use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;
use uuid::Uuid;

use crate::auth::middleware::AuthUser;
use crate::error::AppError;
use crate::models::friend::{friendship_pair, FriendRequest, FriendRequestView, SendFriendRequest};
use crate::models::user::UserBrief;
use crate::relay::protocol::ServerEvent;
use crate::relay::user_room;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/friend-requests", post(send_request).get(list_requests))
        .route("/api/friend-requests/{id}/accept", post(accept_request))
        .route("/api/friend-requests/{id}/reject", post(reject_request))
        .route("/api/friends", get(list_friends))
        .route("/api/friends/{friend_id}", delete(remove_friend))
}

async fn send_request(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<SendFriendRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let sender_id = auth.user_id;
    let receiver_id = body.receiver;

    if sender_id == receiver_id {
        return Err(AppError::BadRequest(
            "You cannot send a friend request to yourself".into(),
        ));
    }

    let receiver: Option<UserBrief> =
        sqlx::query_as("SELECT id, username, email FROM users WHERE id = $1")
            .bind(receiver_id)
            .fetch_optional(&state.db)
            .await?;
    let receiver = receiver.ok_or_else(|| AppError::NotFound("User not found".into()))?;

    let (duplicate,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM friend_requests
         WHERE (sender_id = $1 AND receiver_id = $2)
            OR (sender_id = $2 AND receiver_id = $1)",
    )
    .bind(sender_id)
    .bind(receiver_id)
    .fetch_one(&state.db)
    .await?;
    if duplicate > 0 {
        return Err(AppError::Conflict(
            "A friend request between these users already exists".into(),
        ));
    }

    let (lo, hi) = friendship_pair(sender_id, receiver_id);
    let (already_friends,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM friendships WHERE user_lo = $1 AND user_hi = $2",
    )
    .bind(lo)
    .bind(hi)
    .fetch_one(&state.db)
    .await?;
    if already_friends > 0 {
        return Err(AppError::Conflict("You are already friends with this user".into()));
    }

    let request = sqlx::query_as::<_, FriendRequest>(
        "INSERT INTO friend_requests (sender_id, receiver_id)
         VALUES ($1, $2)
         RETURNING id, sender_id, receiver_id, created_at",
    )
    .bind(sender_id)
    .bind(receiver_id)
    .fetch_one(&state.db)
    .await?;

    // Targeted notification to the receiver's user room.
    state.relay.emit(
        &user_room(receiver_id),
        &ServerEvent::FriendRequest {
            request_id: request.id,
            sender_id,
            sender_name: auth.username.clone(),
        },
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "friend_request": FriendRequestView {
                id: request.id,
                sender: UserBrief {
                    id: sender_id,
                    username: auth.username,
                    email: String::new(),
                },
                receiver,
                created_at: request.created_at,
            }
        })),
    ))
}

async fn list_requests(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let rows: Vec<(Uuid, Uuid, String, String, Uuid, String, String, chrono::DateTime<chrono::Utc>)> =
        sqlx::query_as(
            "SELECT fr.id,
                    s.id, s.username, s.email,
                    r.id, r.username, r.email,
                    fr.created_at
             FROM friend_requests fr
             JOIN users s ON s.id = fr.sender_id
             JOIN users r ON r.id = fr.receiver_id
             WHERE fr.sender_id = $1 OR fr.receiver_id = $1
             ORDER BY fr.created_at DESC",
        )
        .bind(auth.user_id)
        .fetch_all(&state.db)
        .await?;

    let mut received = Vec::new();
    let mut sent = Vec::new();
    for (id, sid, s_name, s_email, rid, r_name, r_email, created_at) in rows {
        let view = FriendRequestView {
            id,
            sender: UserBrief { id: sid, username: s_name, email: s_email },
            receiver: UserBrief { id: rid, username: r_name, email: r_email },
            created_at,
        };
        if view.receiver.id == auth.user_id {
            received.push(view);
        } else {
            sent.push(view);
        }
    }

    Ok(Json(json!({ "received": received, "sent": sent })))
}

async fn load_request(state: &AppState, id: Uuid) -> Result<FriendRequest, AppError> {
    sqlx::query_as::<_, FriendRequest>(
        "SELECT id, sender_id, receiver_id, created_at FROM friend_requests WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| {
        AppError::NotFound("Friend request not found (it may already be processed)".into())
    })
}

async fn accept_request(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let request = load_request(&state, id).await?;
    if request.receiver_id != auth.user_id {
        return Err(AppError::Forbidden(
            "Only the receiver can accept this friend request".into(),
        ));
    }

    // Friendship insert and request cleanup commit together.
    let mut tx = state.db.begin().await?;

    let (lo, hi) = friendship_pair(request.sender_id, request.receiver_id);
    sqlx::query(
        "INSERT INTO friendships (user_lo, user_hi) VALUES ($1, $2)
         ON CONFLICT (user_lo, user_hi) DO NOTHING",
    )
    .bind(lo)
    .bind(hi)
    .execute(&mut *tx)
    .await?;

    // Drop this request and any mirrored reverse request.
    sqlx::query(
        "DELETE FROM friend_requests
         WHERE id = $1
            OR (sender_id = $2 AND receiver_id = $3)",
    )
    .bind(request.id)
    .bind(request.receiver_id)
    .bind(request.sender_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Json(json!({ "message": "Friend request accepted" })))
}

async fn reject_request(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let request = load_request(&state, id).await?;
    if request.receiver_id != auth.user_id {
        return Err(AppError::Forbidden(
            "Only the receiver can reject this friend request".into(),
        ));
    }

    sqlx::query(
        "DELETE FROM friend_requests
         WHERE id = $1
            OR (sender_id = $2 AND receiver_id = $3)",
    )
    .bind(request.id)
    .bind(request.receiver_id)
    .bind(request.sender_id)
    .execute(&state.db)
    .await?;

    Ok(Json(json!({ "message": "Friend request rejected" })))
}

async fn list_friends(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<UserBrief>>, AppError> {
    let friends: Vec<UserBrief> = sqlx::query_as(
        "SELECT u.id, u.username, u.email FROM users u
         JOIN friendships f ON (f.user_lo = $1 AND f.user_hi = u.id)
                            OR (f.user_hi = $1 AND f.user_lo = u.id)
         ORDER BY u.username",
    )
    .bind(auth.user_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(friends))
}

/// Symmetric and idempotent: removing a non-friend succeeds quietly.
async fn remove_friend(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(friend_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE id = $1")
        .bind(friend_id)
        .fetch_optional(&state.db)
        .await?;
    if exists.is_none() {
        return Err(AppError::NotFound("User not found".into()));
    }

    let (lo, hi) = friendship_pair(auth.user_id, friend_id);
    sqlx::query("DELETE FROM friendships WHERE user_lo = $1 AND user_hi = $2")
        .bind(lo)
        .bind(hi)
        .execute(&state.db)
        .await?;

    Ok(Json(json!({ "message": "Friend removed" })))
}
