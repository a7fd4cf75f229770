//! Realtime fan-out over per-room broadcast channels.
//!
//! The registry is an explicit value inside `AppState`; HTTP handlers that need
//! to notify connected clients emit through it rather than through any global.
//! Rooms are process-local: a multi-instance deployment would need an external
//! pub/sub layer in front of this.

pub mod protocol;
pub mod ws;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use uuid::Uuid;

use protocol::ServerEvent;

const ROOM_CAPACITY: usize = 64;

pub fn reservation_room(id: Uuid) -> String {
    format!("reservation:{id}")
}

pub fn user_room(id: Uuid) -> String {
    format!("user:{id}")
}

#[derive(Clone, Default)]
pub struct Relay {
    rooms: Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sender for a room, creating the channel on first use.
    pub fn room(&self, key: &str) -> broadcast::Sender<String> {
        let mut rooms = self.rooms.lock().unwrap();
        rooms
            .entry(key.to_string())
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .clone()
    }

    /// Broadcast an event to everyone currently in the room. A room with no
    /// listeners is dropped from the registry.
    pub fn emit(&self, key: &str, event: &ServerEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("failed to encode relay event: {e}");
                return;
            }
        };
        let mut rooms = self.rooms.lock().unwrap();
        if let Some(tx) = rooms.get(key) {
            if tx.send(payload).is_err() {
                rooms.remove(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_reaches_every_subscriber_in_the_room() {
        let relay = Relay::new();
        let mut rx_a = relay.room("reservation:r1").subscribe();
        let mut rx_b = relay.room("reservation:r1").subscribe();
        let mut rx_other = relay.room("reservation:r2").subscribe();

        let id = Uuid::new_v4();
        relay.emit("reservation:r1", &ServerEvent::ReservationUpdate { reservation_id: id });

        let got_a: serde_json::Value = serde_json::from_str(&rx_a.recv().await.unwrap()).unwrap();
        let got_b: serde_json::Value = serde_json::from_str(&rx_b.recv().await.unwrap()).unwrap();
        assert_eq!(got_a["event"], "reservation:update");
        assert_eq!(got_a, got_b);
        assert!(rx_other.try_recv().is_err());
    }

    #[test]
    fn empty_room_is_pruned_on_emit() {
        let relay = Relay::new();
        {
            let _rx = relay.room("user:u1").subscribe();
        }
        relay.emit(
            "user:u1",
            &ServerEvent::ReservationUpdate { reservation_id: Uuid::new_v4() },
        );
        assert!(relay.rooms.lock().unwrap().get("user:u1").is_none());
    }
}
