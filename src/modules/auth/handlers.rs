use axum::{extract::State, http::StatusCode, Json};

use crate::app_state::AppState;
use crate::db::{NewUser, User, UserLogin};
use crate::error::AppResult;
use crate::middleware::Authenticated;
use crate::services::AuthResponse;

/// Admin-only: create an account in the admin's company.
pub async fn register(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Json(input): Json<NewUser>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    let response = state.accounts.register(&principal, input).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn login(State(state): State<AppState>, Json(input): Json<UserLogin>) -> AppResult<Json<AuthResponse>> {
    Ok(Json(state.accounts.login(input).await?))
}

pub async fn me(State(state): State<AppState>, Authenticated(principal): Authenticated) -> AppResult<Json<User>> {
    Ok(Json(state.accounts.me(&principal).await?))
}
