use axum::{routing::get, Router};

use super::inventory_feed;
use crate::app_state::AppState;

pub fn websocket_routes() -> Router<AppState> {
    Router::new().route("/ws/inventory", get(inventory_feed))
}
