pub mod app_state;
pub mod auth_middleware;
pub mod identity_webhook;
pub mod rate_limit;
pub mod rest_api;
pub mod route_gate;
pub mod router;
pub mod ws_handler;
