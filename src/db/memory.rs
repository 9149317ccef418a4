//! In-process store with the same transactional contract as PostgreSQL.
//!
//! Transactions are fully serialized: `begin` takes an owned lock on the
//! shared state (bounded by a timeout) and works on a private copy that only
//! replaces the shared state on `commit`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::error::{DatabaseError, DbResult};
use super::models::{
    BatchStatus, Certificate, CertificateBatch, CertificateStatus, Company, IssueStamp,
    SessionFilter, SessionStatus, SessionSummary, Student, StudentTask, TaskChange,
    TaskProgress, TaskTemplate, TrainingOutcome, TrainingSession, TrainingStats, User, UserStatus,
};
use super::store::{Store, StoreTx};

#[derive(Debug, Clone, Default)]
struct State {
    companies: Vec<Company>,
    users: Vec<User>,
    batches: Vec<CertificateBatch>,
    certificates: Vec<Certificate>,
    templates: Vec<TaskTemplate>,
    sessions: Vec<TrainingSession>,
    students: Vec<Student>,
    student_tasks: Vec<StudentTask>,
}

#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    lock_timeout: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl MemoryStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            lock_timeout,
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> DbResult<Box<dyn StoreTx>> {
        let guard = tokio::time::timeout(self.lock_timeout, self.state.clone().lock_owned())
            .await
            .map_err(|_| DatabaseError::Contention("timed out waiting for the store lock".into()))?;
        let working = State::clone(&guard);
        Ok(Box::new(MemoryTx { guard, working }))
    }

    async fn ping(&self) -> DbResult<()> {
        Ok(())
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<State>,
    working: State,
}

impl MemoryTx {
    fn batch_mut(&mut self, batch_id: Uuid) -> Option<&mut CertificateBatch> {
        self.working.batches.iter_mut().find(|b| b.id == batch_id)
    }

    fn batch_is_active(&self, batch_id: Uuid) -> bool {
        self.working
            .batches
            .iter()
            .any(|b| b.id == batch_id && b.status == BatchStatus::Active)
    }

    fn session_student_ids(&self, session_id: Uuid) -> Vec<Uuid> {
        self.working
            .students
            .iter()
            .filter(|s| s.session_id == session_id)
            .map(|s| s.id)
            .collect()
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn find_company(&mut self, company_id: Uuid) -> DbResult<Option<Company>> {
        Ok(self.working.companies.iter().find(|c| c.id == company_id).cloned())
    }

    async fn first_company(&mut self) -> DbResult<Option<Company>> {
        Ok(self.working.companies.iter().min_by_key(|c| c.created_at).cloned())
    }

    async fn insert_company(&mut self, company: &Company) -> DbResult<()> {
        if self.working.companies.iter().any(|c| c.id == company.id) {
            return Err(DatabaseError::Duplicate("companies_pkey".into()));
        }
        self.working.companies.push(company.clone());
        Ok(())
    }

    async fn update_company(&mut self, company: &Company) -> DbResult<()> {
        let existing = self
            .working
            .companies
            .iter_mut()
            .find(|c| c.id == company.id)
            .ok_or(DatabaseError::NotFound)?;
        *existing = company.clone();
        Ok(())
    }

    async fn find_user(&mut self, user_id: Uuid) -> DbResult<Option<User>> {
        Ok(self.working.users.iter().find(|u| u.id == user_id).cloned())
    }

    async fn find_users_by_email(&mut self, email: &str) -> DbResult<Vec<User>> {
        let email = email.to_lowercase();
        Ok(self
            .working
            .users
            .iter()
            .filter(|u| u.email.to_lowercase() == email)
            .cloned()
            .collect())
    }

    async fn insert_user(&mut self, user: &User) -> DbResult<()> {
        let email = user.email.to_lowercase();
        if self
            .working
            .users
            .iter()
            .any(|u| u.company_id == user.company_id && u.email.to_lowercase() == email)
        {
            return Err(DatabaseError::Duplicate("users_company_email_key".into()));
        }
        let mut user = user.clone();
        user.email = email;
        self.working.users.push(user);
        Ok(())
    }

    async fn update_user(&mut self, user: &User) -> DbResult<()> {
        let existing = self
            .working
            .users
            .iter_mut()
            .find(|u| u.id == user.id)
            .ok_or(DatabaseError::NotFound)?;
        existing.name = user.name.clone();
        existing.phone = user.phone.clone();
        existing.instructor_certificate_number = user.instructor_certificate_number.clone();
        existing.status = user.status;
        existing.roles = user.roles.clone();
        existing.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn record_login(&mut self, user_id: Uuid, at: OffsetDateTime) -> DbResult<()> {
        if let Some(user) = self.working.users.iter_mut().find(|u| u.id == user_id) {
            user.last_login = Some(at);
        }
        Ok(())
    }

    async fn list_users(&mut self, company_id: Uuid) -> DbResult<Vec<User>> {
        let mut users: Vec<User> = self
            .working
            .users
            .iter()
            .filter(|u| u.company_id == company_id)
            .cloned()
            .collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(users)
    }

    async fn count_admins(&mut self, company_id: Uuid) -> DbResult<i64> {
        Ok(self
            .working
            .users
            .iter()
            .filter(|u| u.company_id == company_id && u.roles.is_admin() && u.status == UserStatus::Active)
            .count() as i64)
    }

    async fn find_overlapping_batch(
        &mut self,
        company_id: Uuid,
        session_type: &str,
        start_number: i64,
        end_number: i64,
    ) -> DbResult<Option<CertificateBatch>> {
        Ok(self
            .working
            .batches
            .iter()
            .filter(|b| b.company_id == company_id && b.session_type == session_type)
            .filter(|b| b.overlaps(start_number, end_number))
            .min_by_key(|b| b.start_number)
            .cloned())
    }

    async fn insert_batch(&mut self, batch: &CertificateBatch) -> DbResult<()> {
        if batch.end_number - batch.start_number + 1 != batch.batch_size || batch.batch_size <= 0 {
            return Err(DatabaseError::InvalidInput("batch size does not match its range".into()));
        }
        if self.working.batches.iter().any(|b| {
            b.company_id == batch.company_id
                && b.session_type == batch.session_type
                && b.overlaps(batch.start_number, batch.end_number)
        }) {
            return Err(DatabaseError::Duplicate("batch_ranges_disjoint".into()));
        }
        self.working.batches.push(batch.clone());
        self.working
            .certificates
            .extend((batch.start_number..=batch.end_number).map(|number| Certificate {
                id: Uuid::now_v7(),
                batch_id: batch.id,
                company_id: batch.company_id,
                session_type: batch.session_type.clone(),
                certificate_number: number,
                status: CertificateStatus::Available,
                student_id: None,
                session_id: None,
                instructor_id: None,
                issue_date: None,
            }));
        Ok(())
    }

    async fn find_batch(&mut self, batch_id: Uuid) -> DbResult<Option<CertificateBatch>> {
        Ok(self.working.batches.iter().find(|b| b.id == batch_id).cloned())
    }

    async fn find_certificate(&mut self, certificate_id: Uuid) -> DbResult<Option<Certificate>> {
        Ok(self.working.certificates.iter().find(|c| c.id == certificate_id).cloned())
    }

    async fn certificate_for_student(&mut self, student_id: Uuid) -> DbResult<Option<Certificate>> {
        Ok(self
            .working
            .certificates
            .iter()
            .find(|c| c.student_id == Some(student_id) && c.status == CertificateStatus::Issued)
            .cloned())
    }

    async fn next_available_certificate(
        &mut self,
        company_id: Uuid,
        session_type: &str,
    ) -> DbResult<Option<Certificate>> {
        Ok(self
            .working
            .certificates
            .iter()
            .filter(|c| {
                c.company_id == company_id
                    && c.session_type == session_type
                    && c.status == CertificateStatus::Available
                    && self.batch_is_active(c.batch_id)
            })
            .min_by_key(|c| c.certificate_number)
            .cloned())
    }

    async fn mark_certificate_issued(
        &mut self,
        certificate_id: Uuid,
        stamp: &IssueStamp,
    ) -> DbResult<Option<Certificate>> {
        let Some(certificate) = self
            .working
            .certificates
            .iter_mut()
            .find(|c| c.id == certificate_id && c.status == CertificateStatus::Available)
        else {
            return Ok(None);
        };
        certificate.status = CertificateStatus::Issued;
        certificate.student_id = Some(stamp.student_id);
        certificate.session_id = Some(stamp.session_id);
        certificate.instructor_id = Some(stamp.instructor_id);
        certificate.issue_date = Some(stamp.issued_at);
        Ok(Some(certificate.clone()))
    }

    async fn decrement_batch_remaining(&mut self, batch_id: Uuid) -> DbResult<Option<CertificateBatch>> {
        match self.batch_mut(batch_id) {
            Some(batch) if batch.certificates_remaining > 0 => {
                batch.certificates_remaining -= 1;
                Ok(Some(batch.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn count_available_certificates(&mut self, batch_id: Uuid) -> DbResult<i64> {
        Ok(self
            .working
            .certificates
            .iter()
            .filter(|c| c.batch_id == batch_id && c.status == CertificateStatus::Available)
            .count() as i64)
    }

    async fn set_batch_status(&mut self, batch_id: Uuid, status: BatchStatus) -> DbResult<()> {
        let batch = self.batch_mut(batch_id).ok_or(DatabaseError::NotFound)?;
        batch.status = status;
        Ok(())
    }

    async fn active_batches(&mut self, company_id: Uuid) -> DbResult<Vec<CertificateBatch>> {
        let mut batches: Vec<CertificateBatch> = self
            .working
            .batches
            .iter()
            .filter(|b| b.company_id == company_id && b.status == BatchStatus::Active)
            .cloned()
            .collect();
        batches.sort_by(|a, b| {
            a.session_type
                .cmp(&b.session_type)
                .then(a.start_number.cmp(&b.start_number))
        });
        Ok(batches)
    }

    async fn remaining_stock(&mut self, company_id: Uuid, session_type: &str) -> DbResult<i64> {
        Ok(self
            .working
            .batches
            .iter()
            .filter(|b| {
                b.company_id == company_id && b.session_type == session_type && b.status == BatchStatus::Active
            })
            .map(|b| b.certificates_remaining)
            .sum())
    }

    async fn task_template(&mut self, company_id: Uuid, session_type: &str) -> DbResult<Vec<TaskTemplate>> {
        let mut tasks: Vec<TaskTemplate> = self
            .working
            .templates
            .iter()
            .filter(|t| t.company_id == company_id && t.session_type == session_type)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.sequence);
        Ok(tasks)
    }

    async fn replace_task_template(
        &mut self,
        company_id: Uuid,
        session_type: &str,
        tasks: &[TaskTemplate],
    ) -> DbResult<()> {
        self.working
            .templates
            .retain(|t| !(t.company_id == company_id && t.session_type == session_type));
        self.working.templates.extend_from_slice(tasks);
        Ok(())
    }

    async fn insert_session(&mut self, session: &TrainingSession) -> DbResult<()> {
        self.working.sessions.push(session.clone());
        Ok(())
    }

    async fn find_session(&mut self, session_id: Uuid) -> DbResult<Option<TrainingSession>> {
        Ok(self.working.sessions.iter().find(|s| s.id == session_id).cloned())
    }

    async fn mark_session_completed(&mut self, session_id: Uuid, at: OffsetDateTime) -> DbResult<()> {
        let session = self
            .working
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or(DatabaseError::NotFound)?;
        session.status = SessionStatus::Completed;
        session.completed_at = Some(at);
        Ok(())
    }

    async fn list_sessions(&mut self, filter: SessionFilter) -> DbResult<Vec<SessionSummary>> {
        let mut sessions: Vec<SessionSummary> = self
            .working
            .sessions
            .iter()
            .filter(|s| s.company_id == filter.company_id)
            .filter(|s| filter.instructor_id.map_or(true, |id| s.instructor_id == id))
            .filter(|s| filter.status.map_or(true, |status| s.status == status))
            .map(|s| SessionSummary {
                session: s.clone(),
                instructor_name: self
                    .working
                    .users
                    .iter()
                    .find(|u| u.id == s.instructor_id)
                    .map(|u| u.name.clone())
                    .unwrap_or_default(),
                student_count: self.working.students.iter().filter(|st| st.session_id == s.id).count() as i64,
            })
            .collect();
        sessions.sort_by(|a, b| b.session.created_at.cmp(&a.session.created_at));
        Ok(sessions)
    }

    async fn insert_student(&mut self, student: &Student) -> DbResult<()> {
        if !self.working.sessions.iter().any(|s| s.id == student.session_id) {
            return Err(DatabaseError::InvalidInput("student references an unknown session".into()));
        }
        self.working.students.push(student.clone());
        Ok(())
    }

    async fn find_student(&mut self, student_id: Uuid) -> DbResult<Option<Student>> {
        Ok(self.working.students.iter().find(|s| s.id == student_id).cloned())
    }

    async fn list_students(&mut self, session_id: Uuid) -> DbResult<Vec<Student>> {
        Ok(self
            .working
            .students
            .iter()
            .filter(|s| s.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn set_training_outcome(&mut self, student_id: Uuid, outcome: TrainingOutcome) -> DbResult<()> {
        let student = self
            .working
            .students
            .iter_mut()
            .find(|s| s.id == student_id)
            .ok_or(DatabaseError::NotFound)?;
        student.training_outcome = Some(outcome);
        Ok(())
    }

    async fn record_match(&mut self, student_id: Uuid, match_score: f64, verified: bool) -> DbResult<()> {
        let student = self
            .working
            .students
            .iter_mut()
            .find(|s| s.id == student_id)
            .ok_or(DatabaseError::NotFound)?;
        student.match_score = Some(match_score);
        student.verified = verified;
        Ok(())
    }

    async fn insert_student_tasks(&mut self, tasks: &[StudentTask]) -> DbResult<()> {
        for task in tasks {
            if self
                .working
                .student_tasks
                .iter()
                .any(|t| t.student_id == task.student_id && t.task_id == task.task_id)
            {
                return Err(DatabaseError::Duplicate("student_task_unique".into()));
            }
        }
        self.working.student_tasks.extend_from_slice(tasks);
        Ok(())
    }

    async fn student_tasks(&mut self, student_id: Uuid) -> DbResult<Vec<StudentTask>> {
        let mut tasks: Vec<StudentTask> = self
            .working
            .student_tasks
            .iter()
            .filter(|t| t.student_id == student_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.sequence);
        Ok(tasks)
    }

    async fn update_session_task(&mut self, session_id: Uuid, change: &TaskChange) -> DbResult<u64> {
        let students = self.session_student_ids(session_id);
        let mut updated = 0;
        for task in self
            .working
            .student_tasks
            .iter_mut()
            .filter(|t| t.task_id == change.task_id && students.contains(&t.student_id))
        {
            task.completed = change.completed;
            task.completed_at = change.completed_at;
            task.notes = change.notes.clone();
            updated += 1;
        }
        Ok(updated)
    }

    async fn update_student_task(
        &mut self,
        student_id: Uuid,
        change: &TaskChange,
        override_reason: Option<&str>,
    ) -> DbResult<Option<StudentTask>> {
        let Some(task) = self
            .working
            .student_tasks
            .iter_mut()
            .find(|t| t.student_id == student_id && t.task_id == change.task_id)
        else {
            return Ok(None);
        };
        task.completed = change.completed;
        task.completed_at = change.completed_at;
        task.notes = change.notes.clone();
        task.override_reason = override_reason.map(str::to_owned);
        Ok(Some(task.clone()))
    }

    async fn task_progress(&mut self, session_id: Uuid) -> DbResult<Vec<TaskProgress>> {
        Ok(self
            .working
            .students
            .iter()
            .filter(|s| s.session_id == session_id)
            .map(|s| {
                let tasks = self.working.student_tasks.iter().filter(|t| t.student_id == s.id);
                let (total, completed) =
                    tasks.fold((0, 0), |(total, done), t| (total + 1, done + i64::from(t.completed)));
                TaskProgress {
                    student_id: s.id,
                    total_tasks: total,
                    completed_tasks: completed,
                }
            })
            .collect())
    }

    async fn training_stats(&mut self, company_id: Uuid, since: OffsetDateTime) -> DbResult<TrainingStats> {
        let sessions: Vec<&TrainingSession> = self
            .working
            .sessions
            .iter()
            .filter(|s| s.company_id == company_id)
            .collect();
        let students: Vec<&Student> = self
            .working
            .students
            .iter()
            .filter(|st| sessions.iter().any(|s| s.id == st.session_id))
            .collect();
        let scores: Vec<f64> = students.iter().filter_map(|s| s.match_score).collect();

        Ok(TrainingStats {
            total_students: students.len() as i64,
            verified_students: students.iter().filter(|s| s.verified).count() as i64,
            students_today: students.iter().filter(|s| s.created_at >= since).count() as i64,
            average_match_score: if scores.is_empty() {
                0.0
            } else {
                scores.iter().sum::<f64>() / scores.len() as f64
            },
            certificates_issued: self
                .working
                .certificates
                .iter()
                .filter(|c| c.company_id == company_id && c.status == CertificateStatus::Issued)
                .count() as i64,
            active_sessions: sessions.iter().filter(|s| s.is_open()).count() as i64,
        })
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
