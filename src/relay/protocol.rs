//! Wire protocol of the messaging relay. Events are JSON objects tagged by
//! `event`, matching what the web client sends and expects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Join an arbitrary room by key; private chats use the sorted-pair key.
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: String },
    /// Join a reservation's room. No authorization is performed here; the
    /// page/API layer is assumed to have gated access already.
    #[serde(rename_all = "camelCase")]
    JoinReservation { reservation_id: Uuid },
    /// Subscribe to targeted per-user notifications.
    #[serde(rename_all = "camelCase")]
    JoinUserRoom { user_id: Uuid },
    /// Private chat message; only processed when `mode == "private"`.
    #[serde(rename_all = "camelCase")]
    Message {
        room_id: String,
        text: String,
        sender_id: Uuid,
        sender_name: String,
        mode: String,
    },
    /// Chat message in a reservation room.
    #[serde(rename_all = "camelCase")]
    ReservationMessage {
        reservation_id: Uuid,
        text: String,
        sender_id: Uuid,
        sender_name: String,
    },
    /// Broadcast-only signal: other clients should re-fetch reservation state
    /// after an out-of-band HTTP mutation.
    #[serde(rename = "reservation:trigger-update")]
    #[serde(rename_all = "camelCase")]
    TriggerUpdate { reservation_id: Uuid },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ServerEvent {
    /// A chat message rendered for display (both room kinds).
    #[serde(rename_all = "camelCase")]
    Message {
        sender: String,
        text: String,
        timestamp: DateTime<Utc>,
    },
    /// Reservation state changed; clients re-fetch.
    #[serde(rename = "reservation:update")]
    #[serde(rename_all = "camelCase")]
    ReservationUpdate { reservation_id: Uuid },
    /// Targeted notification: someone sent the room's user a friend request.
    #[serde(rename = "friend-request")]
    #[serde(rename_all = "camelCase")]
    FriendRequest {
        request_id: Uuid,
        sender_id: Uuid,
        sender_name: String,
    },
}

/// For a two-part private room key `{a}_{b}`, the participant that is not the
/// sender. Malformed keys yield `None` and the message is dropped.
pub fn private_counterpart(room_id: &str, sender_id: Uuid) -> Option<Uuid> {
    let (a, b) = room_id.split_once('_')?;
    let a: Uuid = a.parse().ok()?;
    let b: Uuid = b.parse().ok()?;
    Some(if sender_id == a { b } else { a })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_parse_from_wire_names() {
        let ev: ClientEvent =
            serde_json::from_str(r#"{"event":"joinRoom","roomId":"abc_def"}"#).unwrap();
        assert_eq!(ev, ClientEvent::JoinRoom { room_id: "abc_def".into() });

        let id = Uuid::new_v4();
        let ev: ClientEvent = serde_json::from_str(&format!(
            r#"{{"event":"reservation:trigger-update","reservationId":"{id}"}}"#
        ))
        .unwrap();
        assert_eq!(ev, ClientEvent::TriggerUpdate { reservation_id: id });

        let sender = Uuid::new_v4();
        let ev: ClientEvent = serde_json::from_str(&format!(
            r#"{{"event":"message","roomId":"x_y","text":"hi","senderId":"{sender}","senderName":"Ana","mode":"private"}}"#
        ))
        .unwrap();
        match ev {
            ClientEvent::Message { mode, sender_id, .. } => {
                assert_eq!(mode, "private");
                assert_eq!(sender_id, sender);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn server_events_serialize_with_wire_names() {
        let id = Uuid::new_v4();
        let json =
            serde_json::to_value(ServerEvent::ReservationUpdate { reservation_id: id }).unwrap();
        assert_eq!(json["event"], "reservation:update");
        assert_eq!(json["reservationId"], id.to_string());
    }

    #[test]
    fn counterpart_is_the_other_half_of_the_pair() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let key = format!("{a}_{b}");
        assert_eq!(private_counterpart(&key, a), Some(b));
        assert_eq!(private_counterpart(&key, b), Some(a));
        assert_eq!(private_counterpart("garbage", a), None);
        assert_eq!(private_counterpart(&format!("{a}_nope"), a), None);
    }
}
