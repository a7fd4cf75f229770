use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::middleware::AuthUser;
use crate::error::AppError;
use crate::models::field::{CreateFieldRequest, Field, UpdateFieldRequest};
use crate::models::user::UserBrief;
use crate::slots::{day_slots, ReservedSpan, SlotStatus};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/fields", get(list_fields).post(create_field))
        .route("/api/fields/available", get(available_fields))
        .route(
            "/api/fields/{id}",
            get(get_field).patch(update_field).delete(delete_field),
        )
        .route("/api/fields/{id}/slots", get(field_slots))
        .route("/api/fields/{id}/reservations", get(field_reservations))
}

async fn list_fields(State(state): State<AppState>) -> Result<Json<Vec<Field>>, AppError> {
    let fields = sqlx::query_as::<_, Field>("SELECT * FROM fields ORDER BY name")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(fields))
}

async fn get_field(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Field>, AppError> {
    let field = sqlx::query_as::<_, Field>("SELECT * FROM fields WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Field not found".into()))?;
    Ok(Json(field))
}

async fn create_field(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateFieldRequest>,
) -> Result<(StatusCode, Json<Field>), AppError> {
    if !auth.is_admin() {
        return Err(AppError::Forbidden("Only admins can create fields".into()));
    }
    if body.price_per_hour <= 0 {
        return Err(AppError::BadRequest("Hourly price must be positive".into()));
    }

    let field = sqlx::query_as::<_, Field>(
        "INSERT INTO fields (name, location, sport_type, price_per_hour, description,
                             latitude, longitude, images, owner_id)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         RETURNING *",
    )
    .bind(&body.name)
    .bind(&body.location)
    .bind(&body.sport_type)
    .bind(body.price_per_hour)
    .bind(&body.description)
    .bind(body.latitude)
    .bind(body.longitude)
    .bind(&body.images)
    .bind(auth.user_id)
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(field)))
}

async fn owned_field(db: &PgPool, id: Uuid, auth: &AuthUser) -> Result<Field, AppError> {
    let field = sqlx::query_as::<_, Field>("SELECT * FROM fields WHERE id = $1")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| AppError::NotFound("Field not found".into()))?;
    if field.owner_id != Some(auth.user_id) {
        return Err(AppError::Forbidden("You do not own this field".into()));
    }
    Ok(field)
}

async fn update_field(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateFieldRequest>,
) -> Result<Json<Field>, AppError> {
    owned_field(&state.db, id, &auth).await?;

    if body.price_per_hour.is_some_and(|p| p <= 0) {
        return Err(AppError::BadRequest("Hourly price must be positive".into()));
    }

    let field = sqlx::query_as::<_, Field>(
        "UPDATE fields SET
           name = COALESCE($1, name),
           location = COALESCE($2, location),
           sport_type = COALESCE($3, sport_type),
           price_per_hour = COALESCE($4, price_per_hour),
           description = COALESCE($5, description),
           latitude = COALESCE($6, latitude),
           longitude = COALESCE($7, longitude),
           images = COALESCE($8, images),
           updated_at = now()
         WHERE id = $9 RETURNING *",
    )
    .bind(&body.name)
    .bind(&body.location)
    .bind(&body.sport_type)
    .bind(body.price_per_hour)
    .bind(&body.description)
    .bind(body.latitude)
    .bind(body.longitude)
    .bind(&body.images)
    .bind(id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(field))
}

async fn delete_field(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    owned_field(&state.db, id, &auth).await?;

    sqlx::query("DELETE FROM fields WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct DateParam {
    date: Option<String>,
}

fn parse_date(raw: Option<&str>) -> Result<NaiveDate, AppError> {
    match raw {
        None | Some("today") => Ok(Utc::now().date_naive()),
        Some(s) => s
            .parse()
            .map_err(|_| AppError::BadRequest("Invalid date, expected YYYY-MM-DD".into())),
    }
}

/// Reserved spans for one field and day, counting active reservations and
/// pending ones that have not yet expired.
pub async fn reserved_spans(
    db: &PgPool,
    field_id: Uuid,
    date: NaiveDate,
) -> Result<Vec<ReservedSpan>, AppError> {
    let rows: Vec<(NaiveTime, i32)> = sqlx::query_as(
        "SELECT start_time, duration_hours FROM reservations
         WHERE field_id = $1 AND reserved_date = $2
           AND (status = 'active' OR (status = 'pending' AND expires_at >= now()))",
    )
    .bind(field_id)
    .bind(date)
    .fetch_all(db)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(start, hours)| ReservedSpan::new(start, hours))
        .collect())
}

async fn field_slots(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<DateParam>,
) -> Result<Json<Vec<SlotStatus>>, AppError> {
    let date = parse_date(params.date.as_deref())?;

    // 404 before computing an empty timetable for a ghost field
    let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM fields WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?;
    if exists.is_none() {
        return Err(AppError::NotFound("Field not found".into()));
    }

    let spans = reserved_spans(&state.db, id, date).await?;
    Ok(Json(day_slots(&spans)))
}

async fn available_fields(
    State(state): State<AppState>,
    Query(params): Query<DateParam>,
) -> Result<Json<Vec<Field>>, AppError> {
    let date = parse_date(params.date.as_deref())?;

    let fields = sqlx::query_as::<_, Field>(
        "SELECT f.* FROM fields f
         WHERE NOT EXISTS (
             SELECT 1 FROM reservations r
             WHERE r.field_id = f.id AND r.reserved_date = $1
         )
         ORDER BY f.name",
    )
    .bind(date)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(fields))
}

#[derive(Debug, serde::Serialize)]
struct FieldReservationRow {
    id: Uuid,
    owner: UserBrief,
    reserved_date: NaiveDate,
    start_time: NaiveTime,
    duration_hours: i32,
    status: crate::models::reservation::EffectiveStatus,
}

#[derive(Debug, serde::Serialize)]
struct FieldReservationsResponse {
    field: Field,
    reservations: Vec<FieldReservationRow>,
}

/// Owning admin's dashboard: every reservation ever made on the field.
async fn field_reservations(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<FieldReservationsResponse>, AppError> {
    if !auth.is_admin() {
        return Err(AppError::Unauthorized);
    }
    let field = owned_field(&state.db, id, &auth).await?;

    let now = Utc::now();
    let rows: Vec<(Uuid, Uuid, String, String, NaiveDate, NaiveTime, i32,
        crate::models::reservation::ReservationStatus)> = sqlx::query_as(
        "SELECT r.id, u.id, u.username, u.email, r.reserved_date, r.start_time,
                r.duration_hours, r.status
         FROM reservations r JOIN users u ON u.id = r.owner_id
         WHERE r.field_id = $1
         ORDER BY r.reserved_date DESC, r.start_time DESC",
    )
    .bind(id)
    .fetch_all(&state.db)
    .await?;

    let reservations = rows
        .into_iter()
        .map(|(rid, uid, username, email, date, start, hours, status)| FieldReservationRow {
            id: rid,
            owner: UserBrief { id: uid, username, email },
            reserved_date: date,
            start_time: start,
            duration_hours: hours,
            status: crate::models::reservation::derive_status(status, date, start, hours, now),
        })
        .collect();

    Ok(Json(FieldReservationsResponse { field, reservations }))
}
