use serde::{Deserialize, Serialize};
use sqlx::types::Uuid;
use time::OffsetDateTime;
use validator::Validate;

use super::StudentTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "training_outcome", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrainingOutcome {
    Pass,
    Incomplete,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Student {
    pub id: Uuid,
    pub session_id: Uuid,
    pub name: String,
    pub license_number: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<String>,
    pub bike_type: Option<String>,
    pub training_outcome: Option<TrainingOutcome>,
    pub match_score: Option<f64>,
    pub verified: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewStudent {
    #[validate(length(min = 1, message = "Name must not be empty"))]
    pub name: String,
    #[validate(length(min = 1, message = "License number must not be empty"))]
    pub license_number: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<String>,
    pub bike_type: Option<String>,
}

impl NewStudent {
    pub fn into_student(self, session_id: Uuid) -> Student {
        Student {
            id: Uuid::now_v7(),
            session_id,
            name: self.name,
            license_number: self.license_number,
            email: self.email,
            phone: self.phone,
            date_of_birth: self.date_of_birth,
            bike_type: self.bike_type,
            training_outcome: None,
            match_score: None,
            verified: false,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentWithTasks {
    #[serde(flatten)]
    pub student: Student,
    pub tasks: Vec<StudentTask>,
}

#[derive(Debug, Clone, Default, PartialEq, sqlx::FromRow, Serialize)]
pub struct TrainingStats {
    pub total_students: i64,
    pub verified_students: i64,
    pub students_today: i64,
    pub average_match_score: f64,
    pub certificates_issued: i64,
    pub active_sessions: i64,
}
