use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{inventory, next_certificate, receive_batch};
use crate::app_state::AppState;

pub fn certificate_routes() -> Router<AppState> {
    Router::new()
        .route("/certificates/batch", post(receive_batch))
        .route("/certificates/next/{session_type}", get(next_certificate))
        .route("/certificates/inventory", get(inventory))
}
