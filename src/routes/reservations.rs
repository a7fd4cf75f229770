use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::middleware::AuthUser;
use crate::error::AppError;
use crate::models::message::ChatMessage;
use crate::models::reservation::{
    check_accept, check_invite, check_join, check_kick, check_leave, pending_expiry,
    AcceptAction, CreateReservationRequest, EffectiveStatus, FieldBrief, InviteRequest,
    KickRequest, LeaveAction, MemberKind, Reservation, ReservationDetail, ReservationResponse,
    Standing, UpdateReservationRequest,
};
use crate::models::user::UserBrief;
use crate::relay::protocol::ServerEvent;
use crate::relay::reservation_room;
use crate::routes::fields::reserved_spans;
use crate::slots::{within_business_hours, ReservedSpan};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/reservations", get(list).post(create))
        .route("/api/reservations/{id}", get(detail).patch(update))
        .route("/api/reservations/{id}/invite", post(invite))
        .route("/api/reservations/{id}/accept", post(accept))
        .route("/api/reservations/{id}/decline", post(decline))
        .route("/api/reservations/{id}/join", post(join))
        .route("/api/reservations/{id}/kick", post(kick))
        .route("/api/reservations/{id}/leave", delete(leave))
}

// --- Shared lookups ---------------------------------------------------------

async fn load(db: &PgPool, id: Uuid) -> Result<Reservation, AppError> {
    sqlx::query_as::<_, Reservation>("SELECT * FROM reservations WHERE id = $1")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| AppError::NotFound("Reservation not found".into()))
}

async fn standing_of(
    db: &PgPool,
    reservation: &Reservation,
    user_id: Uuid,
) -> Result<Standing, AppError> {
    if user_id == reservation.owner_id {
        return Ok(Standing { is_owner: true, membership: None });
    }
    let kind: Option<(MemberKind,)> = sqlx::query_as(
        "SELECT kind FROM reservation_members WHERE reservation_id = $1 AND user_id = $2",
    )
    .bind(reservation.id)
    .bind(user_id)
    .fetch_optional(db)
    .await?;
    Ok(Standing { is_owner: false, membership: kind.map(|(k,)| k) })
}

/// Batch-resolve field names, owners and member sets for a page of
/// reservations.
async fn to_responses(
    db: &PgPool,
    reservations: Vec<Reservation>,
) -> Result<Vec<ReservationResponse>, AppError> {
    if reservations.is_empty() {
        return Ok(vec![]);
    }
    let now = Utc::now();

    let field_ids: Vec<Uuid> = reservations.iter().map(|r| r.field_id).collect();
    let owner_ids: Vec<Uuid> = reservations.iter().map(|r| r.owner_id).collect();
    let reservation_ids: Vec<Uuid> = reservations.iter().map(|r| r.id).collect();

    let field_names: HashMap<Uuid, String> =
        sqlx::query_as::<_, (Uuid, String)>("SELECT id, name FROM fields WHERE id = ANY($1)")
            .bind(&field_ids)
            .fetch_all(db)
            .await?
            .into_iter()
            .collect();

    let owners: HashMap<Uuid, UserBrief> = sqlx::query_as::<_, UserBrief>(
        "SELECT id, username, email FROM users WHERE id = ANY($1)",
    )
    .bind(&owner_ids)
    .fetch_all(db)
    .await?
    .into_iter()
    .map(|u| (u.id, u))
    .collect();

    let member_rows: Vec<(Uuid, MemberKind, Uuid, String, String)> = sqlx::query_as(
        "SELECT m.reservation_id, m.kind, u.id, u.username, u.email
         FROM reservation_members m JOIN users u ON u.id = m.user_id
         WHERE m.reservation_id = ANY($1)
         ORDER BY m.added_at",
    )
    .bind(&reservation_ids)
    .fetch_all(db)
    .await?;

    let mut members: HashMap<Uuid, (Vec<UserBrief>, Vec<UserBrief>)> = HashMap::new();
    for (rid, kind, uid, username, email) in member_rows {
        let entry = members.entry(rid).or_default();
        let brief = UserBrief { id: uid, username, email };
        match kind {
            MemberKind::Participant => entry.0.push(brief),
            MemberKind::Invite => entry.1.push(brief),
        }
    }

    Ok(reservations
        .into_iter()
        .map(|r| {
            let (participants, invites) = members.remove(&r.id).unwrap_or_default();
            ReservationResponse {
                id: r.id,
                field: FieldBrief {
                    id: r.field_id,
                    name: field_names.get(&r.field_id).cloned().unwrap_or_default(),
                },
                owner: owners.get(&r.owner_id).cloned().unwrap_or(UserBrief {
                    id: r.owner_id,
                    username: String::new(),
                    email: String::new(),
                }),
                reserved_date: r.reserved_date,
                start_time: r.start_time,
                duration_hours: r.duration_hours,
                is_public: r.is_public,
                status: r.effective_status(now),
                participants,
                invites,
            }
        })
        .collect())
}

fn notify_update(state: &AppState, reservation_id: Uuid) {
    state.relay.emit(
        &reservation_room(reservation_id),
        &ServerEvent::ReservationUpdate { reservation_id },
    );
}

// --- Listing ----------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ListParams {
    field: Option<Uuid>,
    date: Option<NaiveDate>,
    #[serde(default)]
    public: bool,
    #[serde(default)]
    mine: bool,
    #[serde(default)]
    invited: bool,
}

/// Occupancy projection for the anonymous timetable: no owner, participant or
/// invitee identities leave the server.
#[derive(Debug, Serialize)]
struct TimetableEntry {
    id: Uuid,
    reserved_date: NaiveDate,
    start_time: NaiveTime,
    duration_hours: i32,
    status: EffectiveStatus,
}

async fn list(
    State(state): State<AppState>,
    auth: Option<AuthUser>,
    Query(params): Query<ListParams>,
) -> Result<Response, AppError> {
    // Timetable lookup: anonymous, one field and day.
    if let (Some(field_id), Some(date)) = (params.field, params.date) {
        let rows = sqlx::query_as::<_, Reservation>(
            "SELECT * FROM reservations WHERE field_id = $1 AND reserved_date = $2
             ORDER BY start_time",
        )
        .bind(field_id)
        .bind(date)
        .fetch_all(&state.db)
        .await?;
        let now = Utc::now();
        let entries: Vec<TimetableEntry> = rows
            .into_iter()
            .map(|r| TimetableEntry {
                id: r.id,
                reserved_date: r.reserved_date,
                start_time: r.start_time,
                duration_hours: r.duration_hours,
                status: r.effective_status(now),
            })
            .collect();
        return Ok(Json(entries).into_response());
    }

    if params.public {
        let rows = sqlx::query_as::<_, Reservation>(
            "SELECT * FROM reservations WHERE is_public AND status = 'active'
             ORDER BY reserved_date, start_time",
        )
        .fetch_all(&state.db)
        .await?;
        let now = Utc::now();
        let rows = rows
            .into_iter()
            .filter(|r| r.effective_status(now) == EffectiveStatus::Active)
            .collect();
        return Ok(Json(to_responses(&state.db, rows).await?).into_response());
    }

    let auth = auth.ok_or(AppError::Unauthorized)?;
    let now = Utc::now();

    let rows = if params.invited {
        sqlx::query_as::<_, Reservation>(
            "SELECT r.* FROM reservations r
             WHERE EXISTS (SELECT 1 FROM reservation_members m
                           WHERE m.reservation_id = r.id AND m.user_id = $1
                             AND m.kind = 'invite')
             ORDER BY r.reserved_date, r.start_time",
        )
        .bind(auth.user_id)
        .fetch_all(&state.db)
        .await?
    } else {
        sqlx::query_as::<_, Reservation>(
            "SELECT r.* FROM reservations r
             WHERE r.owner_id = $1
                OR EXISTS (SELECT 1 FROM reservation_members m
                           WHERE m.reservation_id = r.id AND m.user_id = $1
                             AND m.kind = 'participant')
             ORDER BY r.reserved_date, r.start_time",
        )
        .bind(auth.user_id)
        .fetch_all(&state.db)
        .await?
    };

    let rows: Vec<Reservation> = rows
        .into_iter()
        .filter(|r| match r.effective_status(now) {
            EffectiveStatus::Completed => false,
            EffectiveStatus::Pending => (params.mine || params.invited) && !r.is_expired(now),
            EffectiveStatus::Active => true,
        })
        .collect();

    Ok(Json(to_responses(&state.db, rows).await?).into_response())
}

// --- Creation ---------------------------------------------------------------

fn parse_start_time(raw: &str) -> Result<NaiveTime, AppError> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| AppError::BadRequest("Invalid start time, expected HH:MM".into()))
}

async fn create(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateReservationRequest>,
) -> Result<(StatusCode, Json<ReservationResponse>), AppError> {
    let (Some(field_id), Some(reserved_date), Some(start_raw), Some(duration)) =
        (body.field_id, body.reserved_date, body.start_time, body.duration)
    else {
        return Err(AppError::BadRequest("Missing reservation data".into()));
    };
    let start_time = parse_start_time(&start_raw)?;
    if duration < 1 {
        return Err(AppError::BadRequest("Duration must be at least one hour".into()));
    }

    let field_exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM fields WHERE id = $1")
        .bind(field_id)
        .fetch_optional(&state.db)
        .await?;
    if field_exists.is_none() {
        return Err(AppError::NotFound("Field not found".into()));
    }

    let requested = ReservedSpan::new(start_time, duration);
    if !within_business_hours(&requested) {
        return Err(AppError::BadRequest(
            "Reservation must fall within opening hours (08:00-22:00)".into(),
        ));
    }

    // Server-side overlap check against active and live-pending reservations.
    let spans = reserved_spans(&state.db, field_id, reserved_date).await?;
    if spans.iter().any(|span| span.overlaps(&requested)) {
        return Err(AppError::Conflict(
            "The requested time slot is already booked".into(),
        ));
    }

    let reservation = sqlx::query_as::<_, Reservation>(
        "INSERT INTO reservations
             (field_id, owner_id, reserved_date, start_time, duration_hours, status, expires_at)
         VALUES ($1, $2, $3, $4, $5, 'pending', $6)
         RETURNING *",
    )
    .bind(field_id)
    .bind(auth.user_id)
    .bind(reserved_date)
    .bind(start_time)
    .bind(duration)
    .bind(pending_expiry(Utc::now()))
    .fetch_one(&state.db)
    .await?;

    let mut responses = to_responses(&state.db, vec![reservation]).await?;
    Ok((StatusCode::CREATED, Json(responses.remove(0))))
}

// --- Detail and visibility --------------------------------------------------

async fn detail(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ReservationDetail>, AppError> {
    let reservation = load(&state.db, id).await?;
    let standing = standing_of(&state.db, &reservation, auth.user_id).await?;
    if !standing.is_owner && standing.membership != Some(MemberKind::Participant) {
        return Err(AppError::Forbidden(
            "You do not have access to this reservation".into(),
        ));
    }

    let messages: Vec<(Uuid, String, String, chrono::DateTime<Utc>)> = sqlx::query_as(
        "SELECT m.sender_id, u.username, m.body, m.created_at
         FROM reservation_messages m JOIN users u ON u.id = m.sender_id
         WHERE m.reservation_id = $1
         ORDER BY m.created_at",
    )
    .bind(id)
    .fetch_all(&state.db)
    .await?;

    let mut responses = to_responses(&state.db, vec![reservation]).await?;
    Ok(Json(ReservationDetail {
        reservation: responses.remove(0),
        messages: messages
            .into_iter()
            .map(|(sender_id, sender_name, text, timestamp)| ChatMessage {
                sender_id,
                sender_name,
                text,
                timestamp,
            })
            .collect(),
    }))
}

async fn update(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateReservationRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let reservation = load(&state.db, id).await?;
    if reservation.owner_id != auth.user_id {
        return Err(AppError::Forbidden(
            "Only the organizer can change visibility".into(),
        ));
    }

    sqlx::query("UPDATE reservations SET is_public = $1, updated_at = now() WHERE id = $2")
        .bind(body.is_public)
        .bind(id)
        .execute(&state.db)
        .await?;

    notify_update(&state, id);
    Ok(Json(json!({ "success": true, "is_public": body.is_public })))
}

// --- Participant/invite mutations -------------------------------------------

async fn invite(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<InviteRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let identifier = body.identifier.trim();
    if identifier.is_empty() {
        return Err(AppError::BadRequest("Email or username is required".into()));
    }

    let target: Option<UserBrief> = sqlx::query_as(
        "SELECT id, username, email FROM users
         WHERE lower(email) = lower($1) OR username = $1",
    )
    .bind(identifier)
    .fetch_optional(&state.db)
    .await?;
    let target = target.ok_or_else(|| AppError::NotFound("User not found".into()))?;

    let reservation = load(&state.db, id).await?;
    let actor = standing_of(&state.db, &reservation, auth.user_id).await?;
    let target_standing = standing_of(&state.db, &reservation, target.id).await?;
    check_invite(actor, target_standing)?;

    sqlx::query(
        "INSERT INTO reservation_members (reservation_id, user_id, kind)
         VALUES ($1, $2, 'invite')",
    )
    .bind(id)
    .bind(target.id)
    .execute(&state.db)
    .await?;

    let invites: Vec<UserBrief> = sqlx::query_as(
        "SELECT u.id, u.username, u.email
         FROM reservation_members m JOIN users u ON u.id = m.user_id
         WHERE m.reservation_id = $1 AND m.kind = 'invite'
         ORDER BY m.added_at",
    )
    .bind(id)
    .fetch_all(&state.db)
    .await?;

    notify_update(&state, id);
    Ok(Json(json!({ "invited_user": target, "invites": invites })))
}

async fn accept(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let reservation = load(&state.db, id).await?;
    let actor = standing_of(&state.db, &reservation, auth.user_id).await?;

    match check_accept(actor, reservation.is_public)? {
        AcceptAction::PromoteInvite => {
            sqlx::query(
                "UPDATE reservation_members SET kind = 'participant'
                 WHERE reservation_id = $1 AND user_id = $2",
            )
            .bind(id)
            .bind(auth.user_id)
            .execute(&state.db)
            .await?;
        }
        AcceptAction::JoinPublic => {
            sqlx::query(
                "INSERT INTO reservation_members (reservation_id, user_id, kind)
                 VALUES ($1, $2, 'participant')
                 ON CONFLICT (reservation_id, user_id) DO UPDATE SET kind = 'participant'",
            )
            .bind(id)
            .bind(auth.user_id)
            .execute(&state.db)
            .await?;
        }
        AcceptAction::NoOp => {}
    }

    notify_update(&state, id);
    Ok(Json(json!({ "message": "Invitation accepted successfully" })))
}

async fn decline(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    // Idempotent: declining when not invited is a no-op.
    load(&state.db, id).await?;
    sqlx::query(
        "DELETE FROM reservation_members
         WHERE reservation_id = $1 AND user_id = $2 AND kind = 'invite'",
    )
    .bind(id)
    .bind(auth.user_id)
    .execute(&state.db)
    .await?;

    notify_update(&state, id);
    Ok(Json(json!({ "success": true })))
}

async fn join(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let reservation = load(&state.db, id).await?;
    let actor = standing_of(&state.db, &reservation, auth.user_id).await?;
    check_join(actor, reservation.is_public, reservation.effective_status(Utc::now()))?;

    // An invitee joining a public reservation counts as accepting.
    sqlx::query(
        "INSERT INTO reservation_members (reservation_id, user_id, kind)
         VALUES ($1, $2, 'participant')
         ON CONFLICT (reservation_id, user_id) DO UPDATE SET kind = 'participant'",
    )
    .bind(id)
    .bind(auth.user_id)
    .execute(&state.db)
    .await?;

    notify_update(&state, id);
    Ok(Json(json!({ "message": "Joined reservation successfully" })))
}

async fn kick(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<KickRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let reservation = load(&state.db, id).await?;
    let actor = standing_of(&state.db, &reservation, auth.user_id).await?;
    let target = standing_of(&state.db, &reservation, body.user_id).await?;
    check_kick(actor, target)?;

    sqlx::query(
        "DELETE FROM reservation_members
         WHERE reservation_id = $1 AND user_id = $2 AND kind = 'participant'",
    )
    .bind(id)
    .bind(body.user_id)
    .execute(&state.db)
    .await?;

    notify_update(&state, id);
    Ok(Json(json!({ "message": "Participant removed" })))
}

async fn leave(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let reservation = load(&state.db, id).await?;
    let actor = standing_of(&state.db, &reservation, auth.user_id).await?;

    let message = match check_leave(actor)? {
        LeaveAction::Dissolve => {
            // Members and messages go with it via cascade.
            sqlx::query("DELETE FROM reservations WHERE id = $1")
                .bind(id)
                .execute(&state.db)
                .await?;
            "Reservation deleted"
        }
        LeaveAction::RemoveParticipant => {
            sqlx::query(
                "DELETE FROM reservation_members
                 WHERE reservation_id = $1 AND user_id = $2 AND kind = 'participant'",
            )
            .bind(id)
            .bind(auth.user_id)
            .execute(&state.db)
            .await?;
            "You left the reservation"
        }
    };

    notify_update(&state, id);
    Ok(Json(json!({ "message": message })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timetable_entries_expose_no_member_identities() {
        let entry = TimetableEntry {
            id: Uuid::new_v4(),
            reserved_date: "2026-01-10".parse().unwrap(),
            start_time: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
            duration_hours: 2,
            status: EffectiveStatus::Active,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("owner").is_none());
        assert!(json.get("participants").is_none());
        assert!(json.get("invites").is_none());
        assert_eq!(json["status"], "active");
        assert_eq!(json["duration_hours"], 2);
    }
}
