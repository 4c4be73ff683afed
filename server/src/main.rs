use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use podium_server::config::ServerConfig;
use podium_server::db::pool::{create_pool, run_migrations};
use podium_server::engine::hub::ChannelHub;
use podium_server::web::app_state::AppState;
use podium_server::web::rate_limit::ApiRateLimiters;
use podium_server::web::router::build_router;

/// Rate-limiter entries idle this long are forgotten.
const LIMITER_IDLE: Duration = Duration::from_secs(600);

#[derive(Parser)]
#[command(name = "podium-server", about = "Live debate rooms: REST API and messaging relay")]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "podium.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load(&cli.config)?;

    let pool = create_pool(&config.database.url)
        .await
        .context("failed to connect to database")?;
    run_migrations(&pool)
        .await
        .context("failed to run database migrations")?;

    let rtc_config = config.to_rtc_config();
    if rtc_config.credentials().is_none() {
        tracing::warn!("RTC_APP_ID / RTC_APP_CERTIFICATE not set; token issuance will fail");
    }

    let hub = Arc::new(ChannelHub::new());
    let app_state = Arc::new(AppState {
        db: pool,
        hub: hub.clone(),
        auth_config: config.to_auth_config(),
        rtc_config,
    });

    let rate_limiters = Arc::new(ApiRateLimiters::default());
    let sweeper = rate_limiters.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(LIMITER_IDLE);
        loop {
            interval.tick().await;
            sweeper.cleanup(LIMITER_IDLE);
            hub.cleanup(LIMITER_IDLE);
        }
    });

    let app = build_router(app_state, rate_limiters, &config.server.static_dir);

    let web_addr = &config.server.web_address;
    info!("Podium server starting on {}", web_addr);

    let listener = tokio::net::TcpListener::bind(web_addr)
        .await
        .with_context(|| format!("failed to bind web listener on {web_addr}"))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")?;

    Ok(())
}
