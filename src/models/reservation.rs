use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::user::UserBrief;

/// How long a freshly created reservation holds its slot before payment.
pub const PENDING_TTL_MINUTES: i64 = 2;

pub fn pending_expiry(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::minutes(PENDING_TTL_MINUTES)
}

/// Stored status. `completed` is never written to the database; it is derived
/// at read time by [`derive_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "reservation_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Active,
}

/// Status as reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectiveStatus {
    Pending,
    Active,
    Completed,
}

/// The single place where "completed" is computed. An active reservation whose
/// booked interval has fully elapsed reads as completed; pending reservations
/// are governed by `expires_at`, not by the booked interval.
pub fn derive_status(
    status: ReservationStatus,
    reserved_date: NaiveDate,
    start_time: NaiveTime,
    duration_hours: i32,
    now: DateTime<Utc>,
) -> EffectiveStatus {
    match status {
        ReservationStatus::Pending => EffectiveStatus::Pending,
        ReservationStatus::Active => {
            let end = reserved_date.and_time(start_time) + Duration::hours(duration_hours as i64);
            if end <= now.naive_utc() {
                EffectiveStatus::Completed
            } else {
                EffectiveStatus::Active
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "member_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MemberKind {
    Participant,
    Invite,
}

#[derive(Debug, Clone, FromRow)]
pub struct Reservation {
    pub id: Uuid,
    pub field_id: Uuid,
    pub owner_id: Uuid,
    pub reserved_date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_hours: i32,
    pub is_public: bool,
    pub status: ReservationStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub checkout_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn effective_status(&self, now: DateTime<Utc>) -> EffectiveStatus {
        derive_status(
            self.status,
            self.reserved_date,
            self.start_time,
            self.duration_hours,
            now,
        )
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Pending
            && self.expires_at.is_some_and(|at| at < now)
    }
}

// --- Participant/invite set policy -----------------------------------------
//
// Pure decisions over the current membership state. The handlers apply the
// matching row mutations; the `reservation_members` primary key keeps the
// participant and invite sets disjoint.

/// A user's relation to a reservation, from the acting side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Standing {
    pub is_owner: bool,
    pub membership: Option<MemberKind>,
}

pub fn check_invite(actor: Standing, target: Standing) -> Result<(), AppError> {
    if !actor.is_owner {
        return Err(AppError::Forbidden(
            "Only the organizer can send invitations".into(),
        ));
    }
    if target.is_owner || target.membership.is_some() {
        return Err(AppError::Conflict(
            "User is already a participant or invited".into(),
        ));
    }
    Ok(())
}

/// Outcome of an accept: either an invite is promoted, or a public reservation
/// admits the user directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptAction {
    PromoteInvite,
    JoinPublic,
    /// Already a participant; nothing to change.
    NoOp,
}

pub fn check_accept(actor: Standing, is_public: bool) -> Result<AcceptAction, AppError> {
    if actor.is_owner {
        return Err(AppError::Conflict(
            "The organizer is already part of the reservation".into(),
        ));
    }
    match actor.membership {
        Some(MemberKind::Invite) => Ok(AcceptAction::PromoteInvite),
        Some(MemberKind::Participant) => Ok(AcceptAction::NoOp),
        None if is_public => Ok(AcceptAction::JoinPublic),
        None => Err(AppError::Forbidden("No invitation for this user".into())),
    }
}

pub fn check_join(
    actor: Standing,
    is_public: bool,
    status: EffectiveStatus,
) -> Result<(), AppError> {
    if status != EffectiveStatus::Active {
        return Err(AppError::NotFound("Reservation not available".into()));
    }
    if !is_public {
        return Err(AppError::Forbidden("Reservation is not public".into()));
    }
    if actor.is_owner || actor.membership == Some(MemberKind::Participant) {
        return Err(AppError::Conflict("Already joined".into()));
    }
    Ok(())
}

pub fn check_kick(actor: Standing, target: Standing) -> Result<(), AppError> {
    if !actor.is_owner {
        return Err(AppError::Forbidden(
            "Only the organizer can remove participants".into(),
        ));
    }
    if target.membership != Some(MemberKind::Participant) {
        return Err(AppError::NotFound("User is not a participant".into()));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveAction {
    /// The owner cannot leave without dissolving the whole reservation.
    Dissolve,
    RemoveParticipant,
}

pub fn check_leave(actor: Standing) -> Result<LeaveAction, AppError> {
    if actor.is_owner {
        Ok(LeaveAction::Dissolve)
    } else if actor.membership == Some(MemberKind::Participant) {
        Ok(LeaveAction::RemoveParticipant)
    } else {
        Err(AppError::Forbidden(
            "You are not involved in this reservation".into(),
        ))
    }
}

// --- Request/response shapes ------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateReservationRequest {
    pub field_id: Option<Uuid>,
    pub reserved_date: Option<NaiveDate>,
    /// "HH:MM" wall-clock start.
    pub start_time: Option<String>,
    pub duration: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateReservationRequest {
    pub is_public: bool,
}

#[derive(Debug, Deserialize)]
pub struct InviteRequest {
    /// Email (case-insensitive) or exact username.
    pub identifier: String,
}

#[derive(Debug, Deserialize)]
pub struct KickRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct FieldBrief {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct ReservationResponse {
    pub id: Uuid,
    pub field: FieldBrief,
    pub owner: UserBrief,
    pub reserved_date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_hours: i32,
    pub is_public: bool,
    pub status: EffectiveStatus,
    pub participants: Vec<UserBrief>,
    pub invites: Vec<UserBrief>,
}

#[derive(Debug, Serialize)]
pub struct ReservationDetail {
    #[serde(flatten)]
    pub reservation: ReservationResponse,
    pub messages: Vec<crate::models::message::ChatMessage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn time(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    fn at(s: &str) -> DateTime<Utc> {
        format!("{s}:00Z").parse().unwrap()
    }

    const NOBODY: Standing = Standing { is_owner: false, membership: None };
    const OWNER: Standing = Standing { is_owner: true, membership: None };
    const INVITED: Standing = Standing { is_owner: false, membership: Some(MemberKind::Invite) };
    const PARTICIPANT: Standing =
        Standing { is_owner: false, membership: Some(MemberKind::Participant) };

    #[test]
    fn pending_never_reads_as_completed() {
        let got = derive_status(
            ReservationStatus::Pending,
            date("2026-01-10"),
            time("14:00"),
            2,
            at("2026-03-01T00:00"),
        );
        assert_eq!(got, EffectiveStatus::Pending);
    }

    #[test]
    fn active_becomes_completed_once_interval_elapses() {
        let d = date("2026-01-10");
        let t = time("14:00");
        // still running at 15:59
        assert_eq!(
            derive_status(ReservationStatus::Active, d, t, 2, at("2026-01-10T15:59")),
            EffectiveStatus::Active
        );
        // done at 16:00 sharp
        assert_eq!(
            derive_status(ReservationStatus::Active, d, t, 2, at("2026-01-10T16:00")),
            EffectiveStatus::Completed
        );
    }

    #[test]
    fn invite_requires_owner_and_fresh_target() {
        assert!(check_invite(OWNER, NOBODY).is_ok());
        assert!(matches!(
            check_invite(NOBODY, NOBODY),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            check_invite(OWNER, INVITED),
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            check_invite(OWNER, PARTICIPANT),
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            check_invite(OWNER, OWNER),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn accept_promotes_invite_or_admits_public_joiner() {
        assert_eq!(check_accept(INVITED, false).unwrap(), AcceptAction::PromoteInvite);
        assert_eq!(check_accept(NOBODY, true).unwrap(), AcceptAction::JoinPublic);
        assert_eq!(check_accept(PARTICIPANT, false).unwrap(), AcceptAction::NoOp);
        assert!(matches!(
            check_accept(NOBODY, false),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn join_requires_active_public_and_nonmember() {
        assert!(check_join(NOBODY, true, EffectiveStatus::Active).is_ok());
        assert!(matches!(
            check_join(NOBODY, true, EffectiveStatus::Pending),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            check_join(NOBODY, false, EffectiveStatus::Active),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            check_join(PARTICIPANT, true, EffectiveStatus::Active),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn kick_is_owner_only_and_targets_participants() {
        assert!(check_kick(OWNER, PARTICIPANT).is_ok());
        assert!(matches!(
            check_kick(PARTICIPANT, PARTICIPANT),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            check_kick(OWNER, INVITED),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn owner_leave_dissolves_participant_leave_removes() {
        assert_eq!(check_leave(OWNER).unwrap(), LeaveAction::Dissolve);
        assert_eq!(check_leave(PARTICIPANT).unwrap(), LeaveAction::RemoveParticipant);
        assert!(matches!(check_leave(NOBODY), Err(AppError::Forbidden(_))));
        assert!(matches!(check_leave(INVITED), Err(AppError::Forbidden(_))));
    }

    #[test]
    fn expiry_only_applies_to_pending() {
        let now = at("2026-01-10T12:00");
        let mk = |status, expires_at| Reservation {
            id: Uuid::new_v4(),
            field_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            reserved_date: date("2026-01-10"),
            start_time: time("14:00"),
            duration_hours: 1,
            is_public: false,
            status,
            expires_at,
            checkout_session_id: None,
            created_at: now,
            updated_at: now,
        };
        assert!(mk(ReservationStatus::Pending, Some(at("2026-01-10T11:59"))).is_expired(now));
        assert!(!mk(ReservationStatus::Pending, Some(at("2026-01-10T12:01"))).is_expired(now));
        assert!(!mk(ReservationStatus::Active, Some(at("2026-01-10T11:59"))).is_expired(now));
    }
}
