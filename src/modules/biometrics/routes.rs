use axum::{extract::DefaultBodyLimit, routing::post, Router};

use super::handlers::verify_face;
use crate::app_state::AppState;

pub fn biometric_routes(upload_limit_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/verify-face", post(verify_face))
        .layer(DefaultBodyLimit::max(upload_limit_bytes))
}
