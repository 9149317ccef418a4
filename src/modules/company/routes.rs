use axum::{routing::get, Router};

use super::handlers::{get_company, training_stats, update_company};
use crate::app_state::AppState;

pub fn company_routes() -> Router<AppState> {
    Router::new()
        .route("/company", get(get_company).put(update_company))
        .route("/stats", get(training_stats))
}
