//! Allocation under lost races: a transaction whose conditional write keeps
//! losing to another issuer.

mod common;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use time::OffsetDateTime;
use uuid::Uuid;

use common::{TestApp, SESSION_TYPE};
use rider_training_backend::db::{
    BatchStatus, Certificate, CertificateBatch, CertificateStatus, Company, DbResult, IssueStamp, NewStudent,
    NewTrainingSession, SessionFilter, SessionSummary, Store, Student, StudentTask, StoreTx, TaskChange,
    TaskProgress, TaskTemplate, TrainingOutcome, TrainingSession, TrainingStats, User,
};
use rider_training_backend::error::AppError;
use rider_training_backend::services::InventoryError;

/// How the other issuer interferes with `mark_certificate_issued`.
enum Rival {
    /// Really issues one candidate to each of these students, in order,
    /// before this transaction's write lands.
    Takes(Vec<Uuid>),
    /// Reports every conditional write as lost without changing anything.
    AlwaysWins,
}

struct RacingTx {
    inner: Box<dyn StoreTx>,
    rival: Rival,
    lost_writes: usize,
}

impl RacingTx {
    fn new(inner: Box<dyn StoreTx>, rival: Rival) -> Self {
        Self {
            inner,
            rival,
            lost_writes: 0,
        }
    }
}

#[async_trait]
impl StoreTx for RacingTx {
    async fn find_company(&mut self, company_id: Uuid) -> DbResult<Option<Company>> {
        self.inner.find_company(company_id).await
    }
    async fn first_company(&mut self) -> DbResult<Option<Company>> {
        self.inner.first_company().await
    }
    async fn insert_company(&mut self, company: &Company) -> DbResult<()> {
        self.inner.insert_company(company).await
    }
    async fn update_company(&mut self, company: &Company) -> DbResult<()> {
        self.inner.update_company(company).await
    }
    async fn find_user(&mut self, user_id: Uuid) -> DbResult<Option<User>> {
        self.inner.find_user(user_id).await
    }
    async fn find_users_by_email(&mut self, email: &str) -> DbResult<Vec<User>> {
        self.inner.find_users_by_email(email).await
    }
    async fn insert_user(&mut self, user: &User) -> DbResult<()> {
        self.inner.insert_user(user).await
    }
    async fn update_user(&mut self, user: &User) -> DbResult<()> {
        self.inner.update_user(user).await
    }
    async fn record_login(&mut self, user_id: Uuid, at: OffsetDateTime) -> DbResult<()> {
        self.inner.record_login(user_id, at).await
    }
    async fn list_users(&mut self, company_id: Uuid) -> DbResult<Vec<User>> {
        self.inner.list_users(company_id).await
    }
    async fn count_admins(&mut self, company_id: Uuid) -> DbResult<i64> {
        self.inner.count_admins(company_id).await
    }
    async fn find_overlapping_batch(
        &mut self,
        company_id: Uuid,
        session_type: &str,
        start_number: i64,
        end_number: i64,
    ) -> DbResult<Option<CertificateBatch>> {
        self.inner
            .find_overlapping_batch(company_id, session_type, start_number, end_number)
            .await
    }
    async fn insert_batch(&mut self, batch: &CertificateBatch) -> DbResult<()> {
        self.inner.insert_batch(batch).await
    }
    async fn find_batch(&mut self, batch_id: Uuid) -> DbResult<Option<CertificateBatch>> {
        self.inner.find_batch(batch_id).await
    }
    async fn find_certificate(&mut self, certificate_id: Uuid) -> DbResult<Option<Certificate>> {
        self.inner.find_certificate(certificate_id).await
    }
    async fn certificate_for_student(&mut self, student_id: Uuid) -> DbResult<Option<Certificate>> {
        self.inner.certificate_for_student(student_id).await
    }
    async fn next_available_certificate(
        &mut self,
        company_id: Uuid,
        session_type: &str,
    ) -> DbResult<Option<Certificate>> {
        self.inner.next_available_certificate(company_id, session_type).await
    }

    async fn mark_certificate_issued(
        &mut self,
        certificate_id: Uuid,
        stamp: &IssueStamp,
    ) -> DbResult<Option<Certificate>> {
        match &self.rival {
            Rival::Takes(students) if self.lost_writes < students.len() => {
                let rival_stamp = IssueStamp {
                    student_id: students[self.lost_writes],
                    ..*stamp
                };
                self.lost_writes += 1;
                if let Some(taken) = self.inner.mark_certificate_issued(certificate_id, &rival_stamp).await? {
                    self.inner.decrement_batch_remaining(taken.batch_id).await?;
                }
                Ok(None)
            }
            Rival::AlwaysWins => {
                self.lost_writes += 1;
                Ok(None)
            }
            Rival::Takes(_) => self.inner.mark_certificate_issued(certificate_id, stamp).await,
        }
    }

    async fn decrement_batch_remaining(&mut self, batch_id: Uuid) -> DbResult<Option<CertificateBatch>> {
        self.inner.decrement_batch_remaining(batch_id).await
    }
    async fn count_available_certificates(&mut self, batch_id: Uuid) -> DbResult<i64> {
        self.inner.count_available_certificates(batch_id).await
    }
    async fn set_batch_status(&mut self, batch_id: Uuid, status: BatchStatus) -> DbResult<()> {
        self.inner.set_batch_status(batch_id, status).await
    }
    async fn active_batches(&mut self, company_id: Uuid) -> DbResult<Vec<CertificateBatch>> {
        self.inner.active_batches(company_id).await
    }
    async fn remaining_stock(&mut self, company_id: Uuid, session_type: &str) -> DbResult<i64> {
        self.inner.remaining_stock(company_id, session_type).await
    }
    async fn task_template(&mut self, company_id: Uuid, session_type: &str) -> DbResult<Vec<TaskTemplate>> {
        self.inner.task_template(company_id, session_type).await
    }
    async fn replace_task_template(
        &mut self,
        company_id: Uuid,
        session_type: &str,
        tasks: &[TaskTemplate],
    ) -> DbResult<()> {
        self.inner.replace_task_template(company_id, session_type, tasks).await
    }
    async fn insert_session(&mut self, session: &TrainingSession) -> DbResult<()> {
        self.inner.insert_session(session).await
    }
    async fn find_session(&mut self, session_id: Uuid) -> DbResult<Option<TrainingSession>> {
        self.inner.find_session(session_id).await
    }
    async fn mark_session_completed(&mut self, session_id: Uuid, at: OffsetDateTime) -> DbResult<()> {
        self.inner.mark_session_completed(session_id, at).await
    }
    async fn list_sessions(&mut self, filter: SessionFilter) -> DbResult<Vec<SessionSummary>> {
        self.inner.list_sessions(filter).await
    }
    async fn insert_student(&mut self, student: &Student) -> DbResult<()> {
        self.inner.insert_student(student).await
    }
    async fn find_student(&mut self, student_id: Uuid) -> DbResult<Option<Student>> {
        self.inner.find_student(student_id).await
    }
    async fn list_students(&mut self, session_id: Uuid) -> DbResult<Vec<Student>> {
        self.inner.list_students(session_id).await
    }
    async fn set_training_outcome(&mut self, student_id: Uuid, outcome: TrainingOutcome) -> DbResult<()> {
        self.inner.set_training_outcome(student_id, outcome).await
    }
    async fn record_match(&mut self, student_id: Uuid, match_score: f64, verified: bool) -> DbResult<()> {
        self.inner.record_match(student_id, match_score, verified).await
    }
    async fn insert_student_tasks(&mut self, tasks: &[StudentTask]) -> DbResult<()> {
        self.inner.insert_student_tasks(tasks).await
    }
    async fn student_tasks(&mut self, student_id: Uuid) -> DbResult<Vec<StudentTask>> {
        self.inner.student_tasks(student_id).await
    }
    async fn update_session_task(&mut self, session_id: Uuid, change: &TaskChange) -> DbResult<u64> {
        self.inner.update_session_task(session_id, change).await
    }
    async fn update_student_task(
        &mut self,
        student_id: Uuid,
        change: &TaskChange,
        override_reason: Option<&str>,
    ) -> DbResult<Option<StudentTask>> {
        self.inner.update_student_task(student_id, change, override_reason).await
    }
    async fn task_progress(&mut self, session_id: Uuid) -> DbResult<Vec<TaskProgress>> {
        self.inner.task_progress(session_id).await
    }
    async fn training_stats(&mut self, company_id: Uuid, since: OffsetDateTime) -> DbResult<TrainingStats> {
        self.inner.training_stats(company_id, since).await
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        self.inner.commit().await
    }
}

async fn session_with_students(app: &TestApp) -> (Uuid, Vec<Uuid>) {
    let session = app
        .state
        .sessions
        .create_session(
            &app.instructor,
            NewTrainingSession {
                session_type: SESSION_TYPE.to_string(),
                location: None,
                site_code: None,
                notes: None,
            },
        )
        .await
        .unwrap();
    let mut ids = Vec::new();
    for name in ["morgan", "riley", "sam"] {
        let enrolled = app
            .state
            .sessions
            .enroll_student(
                &app.instructor,
                session.id,
                NewStudent {
                    name: name.to_string(),
                    license_number: format!("LIC-{name}"),
                    email: None,
                    phone: None,
                    date_of_birth: None,
                    bike_type: None,
                },
            )
            .await
            .unwrap();
        ids.push(enrolled.student.id);
    }
    (session.id, ids)
}

fn stamp(app: &TestApp, session_id: Uuid, student_id: Uuid) -> IssueStamp {
    IssueStamp {
        student_id,
        session_id,
        instructor_id: app.instructor.user_id,
        issued_at: OffsetDateTime::now_utc(),
    }
}

#[tokio::test]
async fn lost_write_moves_on_to_the_next_number() {
    let app = TestApp::spawn().await;
    app.receive(700, 3).await;
    let (session_id, students) = session_with_students(&app).await;
    let (ours, theirs) = (students[0], students[1]);

    let inner = app.state.store.begin().await.unwrap();
    let mut tx = RacingTx::new(inner, Rival::Takes(vec![theirs]));
    let issued = app
        .state
        .inventory
        .allocate_and_issue_in(&mut tx, app.company.id, SESSION_TYPE, &stamp(&app, session_id, ours))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(issued.certificate_number, 701);
    assert_eq!(issued.batch_remaining, 1);
    assert_eq!(tx.lost_writes, 1);
    assert_eq!(app.state.inventory.allocation_retries(), 1);

    let rival_cert = tx.certificate_for_student(theirs).await.unwrap().unwrap();
    assert_eq!(rival_cert.certificate_number, 700);
    assert_eq!(rival_cert.status, CertificateStatus::Issued);
    Box::new(tx).commit().await.unwrap();

    let report = app.state.inventory.inventory_report(&app.admin).await.unwrap();
    assert_eq!(report[0].certificates_remaining, 1);
}

#[tokio::test]
async fn losing_the_last_candidates_reports_a_stock_out() {
    let app = TestApp::spawn().await;
    app.receive(800, 2).await;
    let (session_id, students) = session_with_students(&app).await;
    let ours = students[0];

    let inner = app.state.store.begin().await.unwrap();
    let mut tx = RacingTx::new(inner, Rival::Takes(vec![students[1], students[2]]));
    let outcome = app
        .state
        .inventory
        .allocate_and_issue_in(&mut tx, app.company.id, SESSION_TYPE, &stamp(&app, session_id, ours))
        .await
        .unwrap();

    // The rival drained the stock, so there is nothing left to retry with.
    assert!(outcome.is_none());
    assert_eq!(app.state.inventory.allocation_retries(), 2);
}

#[tokio::test]
async fn retries_are_bounded_by_the_stock_on_hand() {
    let app = TestApp::spawn().await;
    app.receive(900, 3).await;
    let (session_id, students) = session_with_students(&app).await;
    let ours = students[0];

    let inner = app.state.store.begin().await.unwrap();
    let mut tx = RacingTx::new(inner, Rival::AlwaysWins);
    let err = app
        .state
        .inventory
        .allocate_and_issue_in(&mut tx, app.company.id, SESSION_TYPE, &stamp(&app, session_id, ours))
        .await
        .unwrap_err();

    assert!(matches!(&err, InventoryError::RetriesExhausted { session_type } if session_type == SESSION_TYPE));
    assert_eq!(tx.lost_writes, 3);
    assert_eq!(app.state.inventory.allocation_retries(), 3);

    let response = AppError::from(err).into_response();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
