use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::db::DatabaseError;
use crate::services::{AccountError, BiometricError, GateError, InventoryError, SessionError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    InternalServerError(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AppError {
    fn status_and_message(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Database(err) => match err {
                DatabaseError::NotFound => (StatusCode::NOT_FOUND, "Resource not found"),
                DatabaseError::Duplicate(_) => (StatusCode::CONFLICT, "Resource already exists"),
                DatabaseError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "Invalid input data"),
                DatabaseError::Contention(_) | DatabaseError::ConnectionError(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "Service unavailable")
                }
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred",
                ),
            },
            AppError::Authentication(_) => (StatusCode::UNAUTHORIZED, "Authentication failed"),
            AppError::Authorization(_) => (StatusCode::FORBIDDEN, "Access denied"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "Validation error"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "Resource not found"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "Resource conflict"),
            AppError::InternalServerError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal server error occurred",
            ),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "Bad request"),
            AppError::ServiceUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service unavailable",
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = self.status_and_message();

        // Server-side failures and storage errors keep their detail in the logs only.
        let body = if status.is_server_error() || matches!(self, AppError::Database(_)) {
            if status.is_server_error() {
                tracing::error!(status = status.as_u16(), error = %self, "Request failed");
            } else {
                tracing::warn!(status = status.as_u16(), error = %self, "Request rejected by the database");
            }
            Json(json!({
                "error": {
                    "message": error_message,
                }
            }))
        } else {
            Json(json!({
                "error": {
                    "message": error_message,
                    "details": self.to_string(),
                }
            }))
        };

        (status, body).into_response()
    }
}

impl From<GateError> for AppError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::Unauthenticated | GateError::UserNotFound => AppError::Authentication(err.to_string()),
            GateError::Forbidden(_) => AppError::Authorization(err.to_string()),
            GateError::Store(err) => AppError::Database(err),
        }
    }
}

impl From<InventoryError> for AppError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::Gate(err) => err.into(),
            InventoryError::Store(err) => AppError::Database(err),
            InventoryError::Validation(msg) => AppError::Validation(msg),
            InventoryError::NotFound(_) => AppError::NotFound(err.to_string()),
            InventoryError::NotSessionOwner => AppError::Authorization(err.to_string()),
            InventoryError::Overlap { .. }
            | InventoryError::AlreadyIssued { .. }
            | InventoryError::AlreadyCertified { .. }
            | InventoryError::SessionClosed(_) => AppError::Conflict(err.to_string()),
            InventoryError::RetriesExhausted { .. } => AppError::ServiceUnavailable(err.to_string()),
            InventoryError::CountMismatch { .. } => AppError::InternalServerError(err.to_string()),
        }
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Gate(err) => err.into(),
            SessionError::Inventory(err) => err.into(),
            SessionError::Store(err) => AppError::Database(err),
            SessionError::Validation(msg) => AppError::Validation(msg),
            SessionError::NotFound(_) => AppError::NotFound(err.to_string()),
            SessionError::NotOwner => AppError::Authorization(err.to_string()),
            SessionError::SessionClosed(_) => AppError::Conflict(err.to_string()),
        }
    }
}

impl From<AccountError> for AppError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::Gate(err) => err.into(),
            AccountError::Store(err) => AppError::Database(err),
            AccountError::Validation(msg) => AppError::Validation(msg),
            AccountError::InvalidCredentials => AppError::Authentication(err.to_string()),
            AccountError::DuplicateEmail(_) => AppError::Conflict(err.to_string()),
            AccountError::NotFound(_) => AppError::NotFound(err.to_string()),
            AccountError::Password(_) | AccountError::Token(_) | AccountError::Background(_) => {
                AppError::InternalServerError(err.to_string())
            }
        }
    }
}

impl From<BiometricError> for AppError {
    fn from(err: BiometricError) -> Self {
        match err {
            BiometricError::InvalidImage { .. } => AppError::BadRequest(err.to_string()),
            BiometricError::NoFaceDetected(_) | BiometricError::EncodingFailed(_) => {
                AppError::Validation(err.to_string())
            }
            BiometricError::Engine(_) | BiometricError::EncodingMismatch { .. } => {
                AppError::ServiceUnavailable(err.to_string())
            }
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::PhotoSide;

    #[test]
    fn domain_errors_map_onto_http_statuses() {
        let cases: Vec<(AppError, StatusCode)> = vec![
            (GateError::Unauthenticated.into(), StatusCode::UNAUTHORIZED),
            (GateError::Forbidden("Admin").into(), StatusCode::FORBIDDEN),
            (
                InventoryError::AlreadyIssued { certificate_number: 7 }.into(),
                StatusCode::CONFLICT,
            ),
            (
                InventoryError::RetriesExhausted { session_type: "CBT".into() }.into(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (SessionError::SessionClosed(uuid::Uuid::nil()).into(), StatusCode::CONFLICT),
            (SessionError::NotOwner.into(), StatusCode::FORBIDDEN),
            (InventoryError::NotSessionOwner.into(), StatusCode::FORBIDDEN),
            (InventoryError::SessionClosed(uuid::Uuid::nil()).into(), StatusCode::CONFLICT),
            (
                InventoryError::AlreadyCertified { student_id: uuid::Uuid::nil(), certificate_number: 3 }.into(),
                StatusCode::CONFLICT,
            ),
            (AccountError::DuplicateEmail("a@b.c".into()).into(), StatusCode::CONFLICT),
            (BiometricError::NoFaceDetected(PhotoSide::License).into(), StatusCode::BAD_REQUEST),
            (
                BiometricError::EncodingMismatch { student: 128, license: 64 }.into(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                DatabaseError::Contention("lock timeout".into()).into(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn database_errors_do_not_leak_constraint_names() {
        let err = AppError::Database(DatabaseError::Duplicate(
            "duplicate key value violates unique constraint \"users_company_email_key\"".into(),
        ));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = body_text(response).await;
        assert!(body.contains("Resource already exists"));
        assert!(!body.contains("users_company_email_key"));
        assert!(!body.contains("details"));
    }

    #[tokio::test]
    async fn domain_conflicts_still_explain_themselves() {
        let err: AppError = InventoryError::AlreadyIssued { certificate_number: 42 }.into();
        let body = body_text(err.into_response()).await;
        assert!(body.contains("Certificate 42 has already been issued"));
    }
}
