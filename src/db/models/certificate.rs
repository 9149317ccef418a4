use serde::{Deserialize, Serialize};
use sqlx::types::Uuid;
use time::OffsetDateTime;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "batch_status", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Active,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "certificate_status", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificateStatus {
    Available,
    Issued,
}

/// A physically received block of sequential certificate numbers.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct CertificateBatch {
    pub id: Uuid,
    pub company_id: Uuid,
    pub session_type: String,
    pub start_number: i64,
    pub end_number: i64,
    pub batch_size: i64,
    pub certificates_remaining: i64,
    pub status: BatchStatus,
    pub received_by: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
}

impl CertificateBatch {
    /// Whether `[start, end]` shares at least one number with this batch.
    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        self.start_number <= end && start <= self.end_number
    }

    pub fn contains(&self, number: i64) -> bool {
        (self.start_number..=self.end_number).contains(&number)
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Certificate {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub company_id: Uuid,
    pub session_type: String,
    pub certificate_number: i64,
    pub status: CertificateStatus,
    pub student_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub instructor_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub issue_date: Option<OffsetDateTime>,
}

/// Who a certificate is being issued to, and by whom.
#[derive(Debug, Clone, Copy)]
pub struct IssueStamp {
    pub student_id: Uuid,
    pub session_id: Uuid,
    pub instructor_id: Uuid,
    pub issued_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedCertificate {
    pub certificate_id: Uuid,
    pub batch_id: Uuid,
    pub certificate_number: i64,
    pub session_type: String,
    pub student_id: Uuid,
    pub session_id: Uuid,
    pub instructor_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub issue_date: OffsetDateTime,
    pub batch_remaining: i64,
}

fn default_batch_size() -> i64 {
    25
}

#[derive(Debug, Deserialize, Validate)]
pub struct NewCertificateBatch {
    #[validate(length(min = 1, max = 32, message = "Session type must be 1-32 characters"))]
    pub session_type: String,
    #[validate(range(min = 0, message = "Certificate numbers cannot be negative"))]
    pub start_certificate_number: i64,
    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1, max = 100000, message = "Batch size must be between 1 and 100000"))]
    pub batch_size: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub session_type: String,
    pub start_number: i64,
    pub end_number: i64,
    pub batch_size: i64,
    pub certificates_remaining: i64,
    pub certificates_issued: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
}

impl From<&CertificateBatch> for BatchSummary {
    fn from(batch: &CertificateBatch) -> Self {
        Self {
            batch_id: batch.id,
            session_type: batch.session_type.clone(),
            start_number: batch.start_number,
            end_number: batch.end_number,
            batch_size: batch.batch_size,
            certificates_remaining: batch.certificates_remaining,
            certificates_issued: batch.batch_size - batch.certificates_remaining,
            received_at: batch.received_at,
        }
    }
}

/// The certificate the next issuance would hand out, with its batch's stock.
#[derive(Debug, Clone, Serialize)]
pub struct NextCertificate {
    #[serde(flatten)]
    pub certificate: Certificate,
    pub certificates_remaining: i64,
}
