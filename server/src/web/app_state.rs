use std::sync::Arc;

use sqlx::SqlitePool;

use crate::auth::config::{AuthConfig, RtcConfig};
use crate::engine::hub::ChannelHub;

/// Shared state handed to every axum handler.
pub struct AppState {
    pub db: SqlitePool,
    pub hub: Arc<ChannelHub>,
    pub auth_config: AuthConfig,
    pub rtc_config: RtcConfig,
}
