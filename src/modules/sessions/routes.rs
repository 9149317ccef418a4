use axum::{
    routing::{get, post, put},
    Router,
};

use super::handlers::{
    active_sessions, complete_session, create_session, enroll_student, get_session, get_task_template,
    mark_session_task, mark_student_task, replace_task_template,
};
use crate::app_state::AppState;

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/active", get(active_sessions))
        .route("/sessions/{id}", get(get_session))
        .route("/sessions/{id}/students", post(enroll_student))
        .route("/sessions/{id}/tasks/complete", put(mark_session_task))
        .route("/sessions/{id}/complete", post(complete_session))
        .route("/students/{id}/tasks/{task_id}", put(mark_student_task))
        .route(
            "/task-templates/{session_type}",
            get(get_task_template).put(replace_task_template),
        )
}
