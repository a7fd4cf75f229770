pub mod field;
pub mod friend;
pub mod message;
pub mod reservation;
pub mod user;
