//! Transactional contract between the core services and the relational store.
//!
//! Every operation runs inside a [`StoreTx`] obtained from [`Store::begin`].
//! Dropping a transaction without calling [`StoreTx::commit`] rolls it back,
//! so a failure anywhere in an operation leaves no partial state behind.

use async_trait::async_trait;
use sqlx::types::Uuid;
use time::OffsetDateTime;

use super::error::DbResult;
use super::models::{
    BatchStatus, Certificate, CertificateBatch, Company, IssueStamp, SessionFilter,
    SessionSummary, Student, StudentTask, TaskChange, TaskProgress, TaskTemplate,
    TrainingOutcome, TrainingSession, TrainingStats, User,
};

#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn begin(&self) -> DbResult<Box<dyn StoreTx>>;

    /// Cheap liveness probe used by the health endpoint.
    async fn ping(&self) -> DbResult<()>;
}

#[async_trait]
pub trait StoreTx: Send {
    // Companies
    async fn find_company(&mut self, company_id: Uuid) -> DbResult<Option<Company>>;
    async fn first_company(&mut self) -> DbResult<Option<Company>>;
    async fn insert_company(&mut self, company: &Company) -> DbResult<()>;
    async fn update_company(&mut self, company: &Company) -> DbResult<()>;

    // Users
    async fn find_user(&mut self, user_id: Uuid) -> DbResult<Option<User>>;
    /// Users with this email across all companies, matched case-insensitively.
    async fn find_users_by_email(&mut self, email: &str) -> DbResult<Vec<User>>;
    /// Fails with `Duplicate` when the company already has a user with this email.
    async fn insert_user(&mut self, user: &User) -> DbResult<()>;
    async fn update_user(&mut self, user: &User) -> DbResult<()>;
    async fn record_login(&mut self, user_id: Uuid, at: OffsetDateTime) -> DbResult<()>;
    async fn list_users(&mut self, company_id: Uuid) -> DbResult<Vec<User>>;
    async fn count_admins(&mut self, company_id: Uuid) -> DbResult<i64>;

    // Certificate inventory
    async fn find_overlapping_batch(
        &mut self,
        company_id: Uuid,
        session_type: &str,
        start_number: i64,
        end_number: i64,
    ) -> DbResult<Option<CertificateBatch>>;
    /// Inserts the batch row and one AVAILABLE certificate per number in its range.
    async fn insert_batch(&mut self, batch: &CertificateBatch) -> DbResult<()>;
    async fn find_batch(&mut self, batch_id: Uuid) -> DbResult<Option<CertificateBatch>>;
    async fn find_certificate(&mut self, certificate_id: Uuid) -> DbResult<Option<Certificate>>;
    /// The ISSUED certificate held by a student, if any.
    async fn certificate_for_student(&mut self, student_id: Uuid) -> DbResult<Option<Certificate>>;
    /// Lowest-numbered AVAILABLE certificate among ACTIVE batches.
    async fn next_available_certificate(
        &mut self,
        company_id: Uuid,
        session_type: &str,
    ) -> DbResult<Option<Certificate>>;
    /// Conditional AVAILABLE -> ISSUED transition. `None` when the certificate
    /// was not AVAILABLE at the time of the write.
    async fn mark_certificate_issued(
        &mut self,
        certificate_id: Uuid,
        stamp: &IssueStamp,
    ) -> DbResult<Option<Certificate>>;
    /// Decrements the batch counter. `None` when it was already zero.
    async fn decrement_batch_remaining(&mut self, batch_id: Uuid) -> DbResult<Option<CertificateBatch>>;
    async fn count_available_certificates(&mut self, batch_id: Uuid) -> DbResult<i64>;
    async fn set_batch_status(&mut self, batch_id: Uuid, status: BatchStatus) -> DbResult<()>;
    async fn active_batches(&mut self, company_id: Uuid) -> DbResult<Vec<CertificateBatch>>;
    /// Sum of `certificates_remaining` over ACTIVE batches of a session type.
    async fn remaining_stock(&mut self, company_id: Uuid, session_type: &str) -> DbResult<i64>;

    // Task templates
    async fn task_template(&mut self, company_id: Uuid, session_type: &str) -> DbResult<Vec<TaskTemplate>>;
    async fn replace_task_template(
        &mut self,
        company_id: Uuid,
        session_type: &str,
        tasks: &[TaskTemplate],
    ) -> DbResult<()>;

    // Sessions
    async fn insert_session(&mut self, session: &TrainingSession) -> DbResult<()>;
    /// Loads a session and holds it against concurrent mutation until commit.
    async fn find_session(&mut self, session_id: Uuid) -> DbResult<Option<TrainingSession>>;
    async fn mark_session_completed(&mut self, session_id: Uuid, at: OffsetDateTime) -> DbResult<()>;
    async fn list_sessions(&mut self, filter: SessionFilter) -> DbResult<Vec<SessionSummary>>;

    // Students
    async fn insert_student(&mut self, student: &Student) -> DbResult<()>;
    async fn find_student(&mut self, student_id: Uuid) -> DbResult<Option<Student>>;
    async fn list_students(&mut self, session_id: Uuid) -> DbResult<Vec<Student>>;
    async fn set_training_outcome(&mut self, student_id: Uuid, outcome: TrainingOutcome) -> DbResult<()>;
    async fn record_match(&mut self, student_id: Uuid, match_score: f64, verified: bool) -> DbResult<()>;

    // Student checklists
    async fn insert_student_tasks(&mut self, tasks: &[StudentTask]) -> DbResult<()>;
    async fn student_tasks(&mut self, student_id: Uuid) -> DbResult<Vec<StudentTask>>;
    /// Applies a change to the matching task of every student in the session.
    /// Leaves `override_reason` untouched. Returns the number of rows changed.
    async fn update_session_task(&mut self, session_id: Uuid, change: &TaskChange) -> DbResult<u64>;
    async fn update_student_task(
        &mut self,
        student_id: Uuid,
        change: &TaskChange,
        override_reason: Option<&str>,
    ) -> DbResult<Option<StudentTask>>;
    /// Completion counts for every student of the session, including students without tasks.
    async fn task_progress(&mut self, session_id: Uuid) -> DbResult<Vec<TaskProgress>>;

    // Reports
    async fn training_stats(&mut self, company_id: Uuid, since: OffsetDateTime) -> DbResult<TrainingStats>;

    async fn commit(self: Box<Self>) -> DbResult<()>;
}
