use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::auth::password;
use crate::error::AppError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/test/seed-admin", post(seed_admin))
}

#[derive(Debug, Deserialize)]
struct SeedAdminRequest {
    username: String,
    email: String,
    password: String,
}

/// Bootstrap route for a fresh database: creates the first admin account.
/// Refuses once any admin exists.
async fn seed_admin(
    State(state): State<AppState>,
    Json(body): Json<SeedAdminRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let (admins,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE role = 'admin'")
        .fetch_one(&state.db)
        .await?;
    if admins > 0 {
        return Err(AppError::Conflict("An admin account already exists".into()));
    }

    if body.password.len() < 6 {
        return Err(AppError::BadRequest(
            "Password must be at least 6 characters".into(),
        ));
    }

    let password_hash = password::hash_password(&body.password)?;
    let (id,): (uuid::Uuid,) = sqlx::query_as(
        "INSERT INTO users (username, email, password_hash, role)
         VALUES ($1, $2, $3, 'admin')
         RETURNING id",
    )
    .bind(body.username.trim())
    .bind(body.email.trim().to_lowercase())
    .bind(&password_hash)
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(json!({ "user_id": id }))))
}
