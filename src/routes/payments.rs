use std::collections::HashMap;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::auth::middleware::AuthUser;
use crate::error::AppError;
use crate::models::field::Field;
use crate::models::reservation::{Reservation, ReservationStatus};
use crate::payments::checkout_amount;
use crate::payments::gateway::{CheckoutSession, CheckoutSessionParams};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/payments/checkout", post(checkout))
        .route("/api/payments/verify", post(verify))
}

#[derive(Debug, Deserialize)]
struct CheckoutRequest {
    reservation_id: Option<Uuid>,
    /// Client-proposed amount; never trusted, always recomputed server-side.
    #[allow(dead_code)]
    amount: Option<i64>,
}

async fn checkout(
    State(state): State<AppState>,
    _auth: AuthUser,
    Json(body): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let reservation_id = body
        .reservation_id
        .ok_or_else(|| AppError::BadRequest("Missing reservation_id".into()))?;

    let reservation =
        sqlx::query_as::<_, Reservation>("SELECT * FROM reservations WHERE id = $1")
            .bind(reservation_id)
            .fetch_optional(&state.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Reservation not found".into()))?;

    let field = sqlx::query_as::<_, Field>("SELECT * FROM fields WHERE id = $1")
        .bind(reservation.field_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Field not found".into()))?;

    let now = Utc::now();
    if reservation.status != ReservationStatus::Pending {
        return Err(AppError::BadRequest("Reservation is not awaiting payment".into()));
    }
    if reservation.is_expired(now) {
        return Err(AppError::Expired("Reservation hold has expired".into()));
    }

    let amount = checkout_amount(field.price_per_hour, reservation.duration_hours as i64);
    if amount <= 0 {
        return Err(AppError::BadRequest("Invalid computed amount".into()));
    }

    let mut metadata = HashMap::new();
    metadata.insert("reservation_id".into(), reservation.id.to_string());
    metadata.insert("user_id".into(), reservation.owner_id.to_string());
    metadata.insert("field_id".into(), field.id.to_string());
    metadata.insert("date".into(), reservation.reserved_date.to_string());
    metadata.insert("start_time".into(), reservation.start_time.format("%H:%M").to_string());
    metadata.insert("duration".into(), reservation.duration_hours.to_string());
    metadata.insert("is_public".into(), if reservation.is_public { "1" } else { "0" }.into());

    let origin = &state.config.public_origin;
    let session = state
        .gateway
        .create_checkout_session(&CheckoutSessionParams {
            amount_minor: amount,
            currency: state.config.payment_currency.clone(),
            product_name: format!(
                "Reservation {} on {}",
                field.name, reservation.reserved_date
            ),
            success_url: format!(
                "{origin}/payment-success?session_id={{CHECKOUT_SESSION_ID}}&fieldId={}",
                field.id
            ),
            cancel_url: format!("{origin}/fields/{}", field.id),
            metadata,
        })
        .await?;

    // Remember the session handle: it is the idempotency key on verify.
    sqlx::query("UPDATE reservations SET checkout_session_id = $1 WHERE id = $2")
        .bind(&session.id)
        .bind(reservation.id)
        .execute(&state.db)
        .await?;

    Ok((StatusCode::CREATED, Json(json!({ "session_id": session.id }))))
}

#[derive(Debug, Deserialize)]
struct VerifyRequest {
    session_id: String,
}

async fn verify(
    State(state): State<AppState>,
    Json(body): Json<VerifyRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if body.session_id.is_empty() {
        return Err(AppError::BadRequest("session_id is required".into()));
    }

    let session = state.gateway.retrieve_session(&body.session_id).await?;
    if !session.is_paid() {
        return Err(AppError::PaymentIncomplete(format!(
            "Payment not completed: {}",
            session.payment_status
        )));
    }

    let now = Utc::now();
    let by_session = sqlx::query_as::<_, Reservation>(
        "SELECT * FROM reservations WHERE checkout_session_id = $1",
    )
    .bind(&session.id)
    .fetch_optional(&state.db)
    .await?;

    let reservation = match by_session {
        Some(r) => settle(&state, r, &session.id, now).await?,
        // A second checkout on the same hold overwrites the stored session id,
        // so the first session no longer matches any row. The reservation it
        // was opened for is named in the session metadata; promote that row
        // instead of minting a duplicate for the same slot.
        None => match reservation_from_metadata(&state, &session).await? {
            Some(r) => settle(&state, r, &session.id, now).await?,
            // Gateway-driven creation path: the reservation is truly gone,
            // rebuild it from session metadata. The unique session column
            // keeps this idempotent under concurrent verifies.
            None => create_from_session(&state, &session).await?,
        },
    };

    Ok(Json(json!({
        "reservation_id": reservation.id,
        "status": "active",
    })))
}

/// What a paid session means for the reservation it references.
#[derive(Debug, PartialEq, Eq)]
enum Settlement {
    AlreadyActive,
    Promote,
}

fn settlement(reservation: &Reservation, now: DateTime<Utc>) -> Result<Settlement, AppError> {
    if reservation.status == ReservationStatus::Active {
        return Ok(Settlement::AlreadyActive);
    }
    // Expiry wins over a late payment confirmation.
    if reservation.is_expired(now) {
        return Err(AppError::Expired(
            "Reservation hold expired before payment was confirmed".into(),
        ));
    }
    Ok(Settlement::Promote)
}

async fn settle(
    state: &AppState,
    reservation: Reservation,
    session_id: &str,
    now: DateTime<Utc>,
) -> Result<Reservation, AppError> {
    match settlement(&reservation, now)? {
        Settlement::AlreadyActive => Ok(reservation),
        Settlement::Promote => Ok(sqlx::query_as::<_, Reservation>(
            "UPDATE reservations
             SET status = 'active', expires_at = NULL, checkout_session_id = $1,
                 updated_at = now()
             WHERE id = $2
             RETURNING *",
        )
        .bind(session_id)
        .bind(reservation.id)
        .fetch_one(&state.db)
        .await?),
    }
}

async fn reservation_from_metadata(
    state: &AppState,
    session: &CheckoutSession,
) -> Result<Option<Reservation>, AppError> {
    let Some(raw) = session.metadata.get("reservation_id") else {
        return Ok(None);
    };
    let id: Uuid = raw
        .parse()
        .map_err(|_| AppError::BadRequest("Invalid reservation_id in session metadata".into()))?;
    Ok(
        sqlx::query_as::<_, Reservation>("SELECT * FROM reservations WHERE id = $1")
            .bind(id)
            .fetch_optional(&state.db)
            .await?,
    )
}

fn meta<'a>(session: &'a CheckoutSession, key: &str) -> Result<&'a str, AppError> {
    session
        .metadata
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| AppError::BadRequest(format!("Missing {key} in session metadata")))
}

async fn create_from_session(
    state: &AppState,
    session: &CheckoutSession,
) -> Result<Reservation, AppError> {
    let owner_id: Uuid = meta(session, "user_id")?
        .parse()
        .map_err(|_| AppError::BadRequest("Invalid user_id in session metadata".into()))?;
    let field_id: Uuid = meta(session, "field_id")?
        .parse()
        .map_err(|_| AppError::BadRequest("Invalid field_id in session metadata".into()))?;
    let date: NaiveDate = meta(session, "date")?
        .parse()
        .map_err(|_| AppError::BadRequest("Invalid date in session metadata".into()))?;
    let start_time = NaiveTime::parse_from_str(meta(session, "start_time")?, "%H:%M")
        .map_err(|_| AppError::BadRequest("Invalid start_time in session metadata".into()))?;
    let duration: i32 = meta(session, "duration")?
        .parse()
        .map_err(|_| AppError::BadRequest("Invalid duration in session metadata".into()))?;
    let is_public = meta(session, "is_public").map(|v| v == "1").unwrap_or(false);

    sqlx::query(
        "INSERT INTO reservations
             (field_id, owner_id, reserved_date, start_time, duration_hours,
              is_public, status, checkout_session_id)
         VALUES ($1, $2, $3, $4, $5, $6, 'active', $7)
         ON CONFLICT (checkout_session_id) DO NOTHING",
    )
    .bind(field_id)
    .bind(owner_id)
    .bind(date)
    .bind(start_time)
    .bind(duration)
    .bind(is_public)
    .bind(&session.id)
    .execute(&state.db)
    .await?;

    // Re-read so a concurrent verify that won the insert still resolves here.
    sqlx::query_as::<_, Reservation>(
        "SELECT * FROM reservations WHERE checkout_session_id = $1",
    )
    .bind(&session.id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::Internal("Reservation missing after gateway insert".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn reservation(
        status: ReservationStatus,
        expires_at: Option<DateTime<Utc>>,
        session: Option<&str>,
    ) -> Reservation {
        let now = Utc::now();
        Reservation {
            id: Uuid::new_v4(),
            field_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            reserved_date: now.date_naive(),
            start_time: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
            duration_hours: 1,
            is_public: false,
            status,
            expires_at,
            checkout_session_id: session.map(String::from),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn paid_session_on_active_row_changes_nothing() {
        let r = reservation(ReservationStatus::Active, None, Some("cs_1"));
        assert_eq!(settlement(&r, Utc::now()).unwrap(), Settlement::AlreadyActive);
    }

    #[test]
    fn paid_session_promotes_a_live_hold() {
        let now = Utc::now();
        let r = reservation(
            ReservationStatus::Pending,
            Some(now + Duration::minutes(1)),
            Some("cs_1"),
        );
        assert_eq!(settlement(&r, now).unwrap(), Settlement::Promote);
    }

    #[test]
    fn paid_session_cannot_revive_a_lapsed_hold() {
        let now = Utc::now();
        let r = reservation(
            ReservationStatus::Pending,
            Some(now - Duration::minutes(1)),
            Some("cs_1"),
        );
        assert!(matches!(settlement(&r, now), Err(AppError::Expired(_))));
    }

    // A stale session (its id no longer stored on the row) must still resolve
    // to the reservation named in its metadata, never to a fresh insert.
    #[test]
    fn stale_session_still_names_its_reservation() {
        let r = reservation(ReservationStatus::Pending, None, Some("cs_2"));
        let session: CheckoutSession = serde_json::from_str(&format!(
            r#"{{"id":"cs_1","payment_status":"paid","metadata":{{"reservation_id":"{}"}}}}"#,
            r.id
        ))
        .unwrap();
        let named: Uuid = session.metadata["reservation_id"].parse().unwrap();
        assert_eq!(named, r.id);
        assert_ne!(session.id, r.checkout_session_id.clone().unwrap());
        assert_eq!(settlement(&r, Utc::now()).unwrap(), Settlement::Promote);
    }
}
