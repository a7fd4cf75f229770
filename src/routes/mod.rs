pub mod auth;
pub mod fields;
pub mod friends;
pub mod messages;
pub mod payments;
pub mod reservations;
pub mod seed;
pub mod users;

use axum::Router;

use crate::AppState;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .merge(auth::router())
        .merge(users::router())
        .merge(fields::router())
        .merge(reservations::router())
        .merge(payments::router())
        .merge(friends::router())
        .merge(messages::router())
        .merge(seed::router())
}
