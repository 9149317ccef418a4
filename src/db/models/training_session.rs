use serde::{Deserialize, Serialize};
use sqlx::types::Uuid;
use time::OffsetDateTime;
use validator::Validate;

use super::Student;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "session_status", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    InProgress,
    Completed,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct TrainingSession {
    pub id: Uuid,
    pub company_id: Uuid,
    pub instructor_id: Uuid,
    pub session_type: String,
    pub location: Option<String>,
    pub site_code: Option<String>,
    pub notes: Option<String>,
    pub status: SessionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

impl TrainingSession {
    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::InProgress
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct NewTrainingSession {
    #[validate(length(min = 1, max = 32, message = "Session type must be 1-32 characters"))]
    pub session_type: String,
    pub location: Option<String>,
    pub site_code: Option<String>,
    pub notes: Option<String>,
}

/// Session listing row with its instructor and roster size.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct SessionSummary {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub session: TrainingSession,
    pub instructor_name: String,
    pub student_count: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionFilter {
    pub company_id: Uuid,
    pub instructor_id: Option<Uuid>,
    pub status: Option<SessionStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: TrainingSession,
    pub students: Vec<Student>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionSummary {
    pub session_id: Uuid,
    pub total_students: usize,
    pub certificates_issued: usize,
    /// Students who met every requirement but found no certificate in stock.
    pub stock_shortfall: usize,
}
