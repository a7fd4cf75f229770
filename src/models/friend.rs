use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::user::UserBrief;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct FriendRequest {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A request as shown to the receiving or sending side, with the counterpart
/// resolved to display data.
#[derive(Debug, Serialize)]
pub struct FriendRequestView {
    pub id: Uuid,
    pub sender: UserBrief,
    pub receiver: UserBrief,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct SendFriendRequest {
    pub receiver: Uuid,
}

/// Friendships are stored once per unordered pair.
pub fn friendship_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a < b { (a, b) } else { (b, a) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(friendship_pair(a, b), friendship_pair(b, a));
        let (lo, hi) = friendship_pair(a, b);
        assert!(lo < hi);
    }
}
