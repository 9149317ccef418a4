use axum::{routing::{get, patch}, Router};

use super::handlers::{company_sessions, list_users, update_user};
use crate::app_state::AppState;

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/{id}", patch(update_user))
        .route("/sessions/all", get(company_sessions))
}
