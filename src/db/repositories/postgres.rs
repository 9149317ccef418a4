use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{CertificateRepository, SessionRepository, UserRepository};
use crate::db::error::DbResult;
use crate::db::models::{
    BatchStatus, Certificate, CertificateBatch, Company, IssueStamp, SessionFilter,
    SessionSummary, Student, StudentTask, TaskChange, TaskProgress, TaskTemplate,
    TrainingOutcome, TrainingSession, TrainingStats, User,
};
use crate::db::store::{Store, StoreTx};

/// PostgreSQL-backed store. Every transaction carries local lock and
/// statement timeouts so contention surfaces as a retryable error.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout_ms: u64,
    statement_timeout_ms: u64,
}

impl PgStore {
    pub fn new(pool: PgPool, lock_timeout_ms: u64, statement_timeout_ms: u64) -> Self {
        Self {
            pool,
            lock_timeout_ms,
            statement_timeout_ms,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> DbResult<Box<dyn StoreTx>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT set_config('lock_timeout', $1, true), set_config('statement_timeout', $2, true)")
            .bind(format!("{}ms", self.lock_timeout_ms))
            .bind(format!("{}ms", self.statement_timeout_ms))
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn ping(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn find_company(&mut self, company_id: Uuid) -> DbResult<Option<Company>> {
        UserRepository::get_company(&mut self.tx, company_id).await
    }

    async fn first_company(&mut self) -> DbResult<Option<Company>> {
        UserRepository::first_company(&mut self.tx).await
    }

    async fn insert_company(&mut self, company: &Company) -> DbResult<()> {
        UserRepository::create_company(&mut self.tx, company).await
    }

    async fn update_company(&mut self, company: &Company) -> DbResult<()> {
        UserRepository::update_company(&mut self.tx, company).await
    }

    async fn find_user(&mut self, user_id: Uuid) -> DbResult<Option<User>> {
        UserRepository::get_user_by_id(&mut self.tx, user_id).await
    }

    async fn find_users_by_email(&mut self, email: &str) -> DbResult<Vec<User>> {
        UserRepository::get_users_by_email(&mut self.tx, email).await
    }

    async fn insert_user(&mut self, user: &User) -> DbResult<()> {
        UserRepository::create_user(&mut self.tx, user).await
    }

    async fn update_user(&mut self, user: &User) -> DbResult<()> {
        UserRepository::update_user(&mut self.tx, user).await
    }

    async fn record_login(&mut self, user_id: Uuid, at: OffsetDateTime) -> DbResult<()> {
        UserRepository::touch_last_login(&mut self.tx, user_id, at).await
    }

    async fn list_users(&mut self, company_id: Uuid) -> DbResult<Vec<User>> {
        UserRepository::list_users(&mut self.tx, company_id).await
    }

    async fn count_admins(&mut self, company_id: Uuid) -> DbResult<i64> {
        UserRepository::count_admins(&mut self.tx, company_id).await
    }

    async fn find_overlapping_batch(
        &mut self,
        company_id: Uuid,
        session_type: &str,
        start_number: i64,
        end_number: i64,
    ) -> DbResult<Option<CertificateBatch>> {
        // Serialize receipts per company and session type so two overlapping
        // deliveries cannot both pass the check.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1::TEXT || ':' || $2))")
            .bind(company_id.to_string())
            .bind(session_type)
            .execute(&mut *self.tx)
            .await?;
        CertificateRepository::find_overlapping_batch(&mut self.tx, company_id, session_type, start_number, end_number)
            .await
    }

    async fn insert_batch(&mut self, batch: &CertificateBatch) -> DbResult<()> {
        CertificateRepository::create_batch(&mut self.tx, batch).await
    }

    async fn find_batch(&mut self, batch_id: Uuid) -> DbResult<Option<CertificateBatch>> {
        CertificateRepository::find_batch(&mut self.tx, batch_id).await
    }

    async fn find_certificate(&mut self, certificate_id: Uuid) -> DbResult<Option<Certificate>> {
        CertificateRepository::find_certificate(&mut self.tx, certificate_id).await
    }

    async fn certificate_for_student(&mut self, student_id: Uuid) -> DbResult<Option<Certificate>> {
        CertificateRepository::issued_to_student(&mut self.tx, student_id).await
    }

    async fn next_available_certificate(
        &mut self,
        company_id: Uuid,
        session_type: &str,
    ) -> DbResult<Option<Certificate>> {
        CertificateRepository::next_available(&mut self.tx, company_id, session_type).await
    }

    async fn mark_certificate_issued(
        &mut self,
        certificate_id: Uuid,
        stamp: &IssueStamp,
    ) -> DbResult<Option<Certificate>> {
        CertificateRepository::mark_issued(&mut self.tx, certificate_id, stamp).await
    }

    async fn decrement_batch_remaining(&mut self, batch_id: Uuid) -> DbResult<Option<CertificateBatch>> {
        CertificateRepository::decrement_remaining(&mut self.tx, batch_id).await
    }

    async fn count_available_certificates(&mut self, batch_id: Uuid) -> DbResult<i64> {
        CertificateRepository::count_available(&mut self.tx, batch_id).await
    }

    async fn set_batch_status(&mut self, batch_id: Uuid, status: BatchStatus) -> DbResult<()> {
        CertificateRepository::set_batch_status(&mut self.tx, batch_id, status).await
    }

    async fn active_batches(&mut self, company_id: Uuid) -> DbResult<Vec<CertificateBatch>> {
        CertificateRepository::active_batches(&mut self.tx, company_id).await
    }

    async fn remaining_stock(&mut self, company_id: Uuid, session_type: &str) -> DbResult<i64> {
        CertificateRepository::remaining_stock(&mut self.tx, company_id, session_type).await
    }

    async fn task_template(&mut self, company_id: Uuid, session_type: &str) -> DbResult<Vec<TaskTemplate>> {
        SessionRepository::task_template(&mut self.tx, company_id, session_type).await
    }

    async fn replace_task_template(
        &mut self,
        company_id: Uuid,
        session_type: &str,
        tasks: &[TaskTemplate],
    ) -> DbResult<()> {
        SessionRepository::replace_task_template(&mut self.tx, company_id, session_type, tasks).await
    }

    async fn insert_session(&mut self, session: &TrainingSession) -> DbResult<()> {
        SessionRepository::create_session(&mut self.tx, session).await
    }

    async fn find_session(&mut self, session_id: Uuid) -> DbResult<Option<TrainingSession>> {
        SessionRepository::lock_session(&mut self.tx, session_id).await
    }

    async fn mark_session_completed(&mut self, session_id: Uuid, at: OffsetDateTime) -> DbResult<()> {
        SessionRepository::mark_completed(&mut self.tx, session_id, at).await
    }

    async fn list_sessions(&mut self, filter: SessionFilter) -> DbResult<Vec<SessionSummary>> {
        SessionRepository::list_sessions(&mut self.tx, filter).await
    }

    async fn insert_student(&mut self, student: &Student) -> DbResult<()> {
        SessionRepository::create_student(&mut self.tx, student).await
    }

    async fn find_student(&mut self, student_id: Uuid) -> DbResult<Option<Student>> {
        SessionRepository::get_student(&mut self.tx, student_id).await
    }

    async fn list_students(&mut self, session_id: Uuid) -> DbResult<Vec<Student>> {
        SessionRepository::list_students(&mut self.tx, session_id).await
    }

    async fn set_training_outcome(&mut self, student_id: Uuid, outcome: TrainingOutcome) -> DbResult<()> {
        SessionRepository::set_outcome(&mut self.tx, student_id, outcome).await
    }

    async fn record_match(&mut self, student_id: Uuid, match_score: f64, verified: bool) -> DbResult<()> {
        SessionRepository::record_match(&mut self.tx, student_id, match_score, verified).await
    }

    async fn insert_student_tasks(&mut self, tasks: &[StudentTask]) -> DbResult<()> {
        SessionRepository::create_student_tasks(&mut self.tx, tasks).await
    }

    async fn student_tasks(&mut self, student_id: Uuid) -> DbResult<Vec<StudentTask>> {
        SessionRepository::student_tasks(&mut self.tx, student_id).await
    }

    async fn update_session_task(&mut self, session_id: Uuid, change: &TaskChange) -> DbResult<u64> {
        SessionRepository::update_session_task(&mut self.tx, session_id, change).await
    }

    async fn update_student_task(
        &mut self,
        student_id: Uuid,
        change: &TaskChange,
        override_reason: Option<&str>,
    ) -> DbResult<Option<StudentTask>> {
        SessionRepository::update_student_task(&mut self.tx, student_id, change, override_reason).await
    }

    async fn task_progress(&mut self, session_id: Uuid) -> DbResult<Vec<TaskProgress>> {
        SessionRepository::task_progress(&mut self.tx, session_id).await
    }

    async fn training_stats(&mut self, company_id: Uuid, since: OffsetDateTime) -> DbResult<TrainingStats> {
        SessionRepository::training_stats(&mut self.tx, company_id, since).await
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
