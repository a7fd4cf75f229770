use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::middleware::AuthUser;
use crate::error::AppError;
use crate::models::user::UserBrief;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/users/search", get(search))
        .route("/api/users/{id}", get(profile))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    query: Option<String>,
}

#[derive(Debug, Serialize)]
struct SearchResult {
    id: Uuid,
    name: String,
    email: String,
}

/// `%` and `_` are LIKE wildcards; a literal search for them must not match
/// every user.
fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

async fn search(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<SearchResult>>, AppError> {
    let q = params
        .query
        .as_deref()
        .map(|q| q.trim().to_lowercase())
        .unwrap_or_default();
    if q.is_empty() {
        return Ok(Json(vec![]));
    }

    let users: Vec<UserBrief> = sqlx::query_as(
        "SELECT id, username, email FROM users
         WHERE role <> 'admin'
           AND (username ILIKE '%' || $1 || '%' OR email ILIKE '%' || $1 || '%')",
    )
    .bind(escape_like(&q))
    .fetch_all(&state.db)
    .await?;

    let mut results: Vec<SearchResult> = users
        .into_iter()
        .map(|u| SearchResult { id: u.id, name: u.username, email: u.email })
        .collect();

    // Prefix matches first, then shorter names.
    results.sort_by(|a, b| {
        let a_name = a.name.to_lowercase();
        let b_name = b.name.to_lowercase();
        b_name
            .starts_with(&q)
            .cmp(&a_name.starts_with(&q))
            .then_with(|| a_name.len().cmp(&b_name.len()))
    });

    Ok(Json(results))
}

#[derive(Debug, Serialize)]
struct ProfileResponse {
    id: Uuid,
    username: String,
    email: String,
    bio: String,
    avatar: String,
    friends: Vec<UserBrief>,
}

async fn profile(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ProfileResponse>, AppError> {
    let row: Option<(Uuid, String, String, String, String)> = sqlx::query_as(
        "SELECT id, username, email, bio, avatar FROM users WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&state.db)
    .await?;

    let (id, username, email, bio, avatar) =
        row.ok_or_else(|| AppError::NotFound("User not found".into()))?;

    let friends: Vec<UserBrief> = sqlx::query_as(
        "SELECT u.id, u.username, u.email FROM users u
         JOIN friendships f ON (f.user_lo = $1 AND f.user_hi = u.id)
                            OR (f.user_hi = $1 AND f.user_lo = u.id)
         ORDER BY u.username",
    )
    .bind(id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(ProfileResponse { id, username, email, bio, avatar, friends }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_wildcards_are_escaped_in_search_terms() {
        assert_eq!(escape_like("ana"), "ana");
        assert_eq!(escape_like("100%"), "100\\%");
        assert_eq!(escape_like("a_b"), "a\\_b");
        assert_eq!(escape_like("back\\slash"), "back\\\\slash");
        assert_eq!(escape_like("%"), "\\%");
    }
}
