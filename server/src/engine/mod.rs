pub mod agenda;
pub mod envelope;
pub mod hub;
pub mod identity;
pub mod media;
pub mod optimistic;
pub mod permissions;
pub mod rate_limiter;
pub mod room_session;
pub mod stage;
pub mod transport;
pub mod validation;
