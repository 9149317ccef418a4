use axum::{extract::State, middleware, routing::get, Json, Router};
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tower_http::cors::CorsLayer;

use crate::{
    app_state::AppState,
    middleware::tracing::observability_middleware,
    modules::{
        admin::routes::admin_routes, auth::routes::auth_routes, biometrics::routes::biometric_routes,
        certificates::routes::certificate_routes, company::routes::company_routes,
        sessions::routes::session_routes,
    },
    websocket::websocket_routes,
};

pub fn create_router(state: AppState) -> Router {
    let upload_limit = state.env.biometric.upload_limit_bytes;

    Router::new()
        .route("/", get(hello))
        .route("/health", get(health_check))
        .merge(auth_routes())
        .merge(company_routes())
        .merge(certificate_routes())
        .merge(session_routes())
        .merge(biometric_routes(upload_limit))
        .merge(websocket_routes())
        .nest("/admin", admin_routes())
        .route_layer(middleware::from_fn(observability_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn hello() -> &'static str {
    "Rider Training Backend says hello!\n"
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let db_status = match state.store.ping().await {
        Ok(()) => "healthy",
        Err(e) => {
            tracing::info!("Database health check failed: {}", e);
            "unhealthy"
        }
    };

    let telemetry_health = crate::telemetry::telemetry_health_check();

    Json(json!({
        "status": "ok",
        "timestamp": OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
        "version": env!("CARGO_PKG_VERSION"),
        "services": {
            "database": db_status,
            "telemetry": telemetry_health
        }
    }))
}
