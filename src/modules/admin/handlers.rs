use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::{SessionSummary, UpdateUser, User};
use crate::error::AppResult;
use crate::middleware::Authenticated;

pub async fn list_users(State(state): State<AppState>, Authenticated(principal): Authenticated) -> AppResult<Json<Vec<User>>> {
    Ok(Json(state.accounts.list_users(&principal).await?))
}

pub async fn update_user(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(user_id): Path<Uuid>,
    Json(input): Json<UpdateUser>,
) -> AppResult<Json<User>> {
    Ok(Json(state.accounts.update_user(&principal, user_id, input).await?))
}

pub async fn company_sessions(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
) -> AppResult<Json<Vec<SessionSummary>>> {
    Ok(Json(state.sessions.company_sessions(&principal).await?))
}
