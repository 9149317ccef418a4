use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::app_state::AppState;
use crate::db::{BatchSummary, NewCertificateBatch, NextCertificate};
use crate::error::{AppError, AppResult};
use crate::middleware::Authenticated;
use crate::services::ReceivedBatch;
use crate::websocket::InventoryEvent;

#[derive(Debug, Serialize)]
pub struct InventoryResponse {
    pub batches: Vec<BatchSummary>,
}

pub async fn receive_batch(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Json(input): Json<NewCertificateBatch>,
) -> AppResult<(StatusCode, Json<ReceivedBatch>)> {
    let batch = state.inventory.receive_batch(&principal, input).await?;
    state.publish(InventoryEvent::BatchReceived {
        company_id: principal.company_id,
        batch: batch.clone(),
    });
    Ok((StatusCode::CREATED, Json(batch)))
}

pub async fn next_certificate(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(session_type): Path<String>,
) -> AppResult<Json<NextCertificate>> {
    state
        .inventory
        .allocate_next(&principal, &session_type)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No {session_type} certificates available")))
}

pub async fn inventory(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
) -> AppResult<Json<InventoryResponse>> {
    let batches = state.inventory.inventory_report(&principal).await?;
    Ok(Json(InventoryResponse { batches }))
}
