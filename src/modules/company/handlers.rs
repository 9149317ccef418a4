use axum::{extract::State, Json};

use crate::app_state::AppState;
use crate::db::{Company, TrainingStats, UpdateCompany};
use crate::error::AppResult;
use crate::middleware::Authenticated;

pub async fn get_company(State(state): State<AppState>, Authenticated(principal): Authenticated) -> AppResult<Json<Company>> {
    Ok(Json(state.accounts.company(&principal).await?))
}

pub async fn update_company(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Json(input): Json<UpdateCompany>,
) -> AppResult<Json<Company>> {
    Ok(Json(state.accounts.update_company(&principal, input).await?))
}

pub async fn training_stats(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
) -> AppResult<Json<TrainingStats>> {
    Ok(Json(state.sessions.training_stats(&principal).await?))
}
