use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Context;
use dotenv::dotenv;
use secrecy::ExposeSecret;
use tracing::{info, warn};

use rider_training_backend::{
    app::create_router,
    app_state::AppState,
    bootstrap, config,
    db::{self, PgStore, Store},
    security::TokenService,
    services::{FaceEngine, RemoteFaceEngine, UnavailableFaceEngine},
    telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let telemetry = telemetry::init_telemetry(None).await?;
    let config = config::init()?.clone();

    let pool = db::init_pool(&config.database).await?;
    let store: Arc<dyn Store> = Arc::new(PgStore::new(
        pool,
        config.database.lock_timeout_ms,
        config.database.statement_timeout_ms,
    ));

    let company = bootstrap::ensure_company_and_admin(store.as_ref(), &config.bootstrap).await?;
    info!(company_id = %company.id, name = %company.name, "Company ready");

    let ttl = time::Duration::minutes(config.auth.token_ttl_minutes);
    let tokens = match &config.auth.token_secret {
        Some(secret) if !secret.expose_secret().is_empty() => TokenService::new(secret, ttl),
        _ => {
            warn!("AUTH_TOKEN_SECRET not set; tokens will not survive a restart");
            TokenService::ephemeral(ttl).context("Failed to generate token secret")?
        }
    };

    let face_engine: Arc<dyn FaceEngine> = match &config.biometric.face_engine_url {
        Some(url) => Arc::new(
            RemoteFaceEngine::new(url, StdDuration::from_secs(config.biometric.face_engine_timeout_secs))
                .context("Failed to configure face engine")?,
        ),
        None => {
            warn!("FACE_ENGINE_URL not set; face verification will report the service unavailable");
            Arc::new(UnavailableFaceEngine)
        }
    };

    let addr = config.server_addr();
    let state = AppState::new(config, store, Arc::new(tokens), face_engine);
    let app = create_router(state);

    info!("{} listening on {}", env!("CARGO_PKG_NAME"), addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Failed to serve application")?;

    telemetry.shutdown().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
