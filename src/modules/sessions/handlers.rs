use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::{
    CompletionSummary, NewStudent, NewTrainingSession, ReplaceTaskTemplate, SessionDetail, SessionSummary,
    StudentWithTasks, TaskMarkResult, TaskScope, TaskTemplate, TaskUpdate, TrainingSession,
};
use crate::error::AppResult;
use crate::middleware::Authenticated;
use crate::websocket::InventoryEvent;

pub async fn create_session(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Json(input): Json<NewTrainingSession>,
) -> AppResult<(StatusCode, Json<TrainingSession>)> {
    let session = state.sessions.create_session(&principal, input).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn active_sessions(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
) -> AppResult<Json<Vec<SessionSummary>>> {
    Ok(Json(state.sessions.active_sessions(&principal).await?))
}

pub async fn get_session(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(session_id): Path<Uuid>,
) -> AppResult<Json<SessionDetail>> {
    Ok(Json(state.sessions.session_detail(&principal, session_id).await?))
}

pub async fn enroll_student(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(session_id): Path<Uuid>,
    Json(input): Json<NewStudent>,
) -> AppResult<(StatusCode, Json<StudentWithTasks>)> {
    let student = state.sessions.enroll_student(&principal, session_id, input).await?;
    Ok((StatusCode::CREATED, Json(student)))
}

/// Mark one task for every student in the session.
pub async fn mark_session_task(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(session_id): Path<Uuid>,
    Json(update): Json<TaskUpdate>,
) -> AppResult<Json<TaskMarkResult>> {
    let result = state
        .sessions
        .set_task(&principal, TaskScope::Session(session_id), update)
        .await?;
    Ok(Json(result))
}

/// Per-student override. The task in the path wins over any `task_id` in the body.
pub async fn mark_student_task(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path((student_id, task_id)): Path<(Uuid, String)>,
    Json(mut update): Json<TaskUpdate>,
) -> AppResult<Json<TaskMarkResult>> {
    update.task_id = task_id;
    let result = state
        .sessions
        .set_task(&principal, TaskScope::Student(student_id), update)
        .await?;
    Ok(Json(result))
}

pub async fn complete_session(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(session_id): Path<Uuid>,
) -> AppResult<Json<CompletionSummary>> {
    let summary = state.sessions.complete_session(&principal, session_id).await?;
    state.publish(InventoryEvent::SessionCompleted {
        company_id: principal.company_id,
        summary: summary.clone(),
    });
    Ok(Json(summary))
}

pub async fn get_task_template(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(session_type): Path<String>,
) -> AppResult<Json<Vec<TaskTemplate>>> {
    Ok(Json(state.sessions.task_template(&principal, &session_type).await?))
}

pub async fn replace_task_template(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(session_type): Path<String>,
    Json(input): Json<ReplaceTaskTemplate>,
) -> AppResult<Json<Vec<TaskTemplate>>> {
    Ok(Json(
        state
            .sessions
            .replace_task_template(&principal, &session_type, input)
            .await?,
    ))
}
