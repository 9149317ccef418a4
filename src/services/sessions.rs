//! Training sessions, rosters and per-student checklists.
//!
//! A session is IN_PROGRESS until its instructor completes it; completion is
//! terminal and every later roster or checklist write is rejected. Completing
//! a session grades every student and issues certificates in a single
//! transaction, so a failure part way through leaves the session open and
//! the stock untouched.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use time::{OffsetDateTime, Time};
use uuid::Uuid;
use validator::Validate;

use super::access::{open_owned_session, OwnershipError};
use super::{retry_contended, GateError, InventoryEngine, InventoryError, MatchResult, Principal, Retryable};
use crate::db::{
    CompletionSummary, DatabaseError, IssueStamp, NewStudent, NewTrainingSession, ReplaceTaskTemplate,
    SessionDetail, SessionFilter, SessionStatus, SessionSummary, Store, StudentTask,
    StudentWithTasks, TaskChange, TaskMarkResult, TaskScope, TaskTemplate, TaskUpdate, TrainingOutcome,
    TrainingSession, TrainingStats,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Gate(#[from] GateError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Only the session's instructor may modify it")]
    NotOwner,

    #[error("Session {0} is already completed")]
    SessionClosed(Uuid),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

impl From<OwnershipError> for SessionError {
    fn from(err: OwnershipError) -> Self {
        match err {
            OwnershipError::NotFound => SessionError::NotFound("Training session"),
            OwnershipError::NotOwner => SessionError::NotOwner,
            OwnershipError::Closed(id) => SessionError::SessionClosed(id),
            OwnershipError::Store(err) => SessionError::Store(err),
        }
    }
}

impl Retryable for SessionError {
    fn is_retryable(&self) -> bool {
        match self {
            SessionError::Store(err) | SessionError::Gate(GateError::Store(err)) => err.is_retryable(),
            SessionError::Inventory(err) => err.is_retryable(),
            _ => false,
        }
    }
}

fn validate(input: &impl Validate) -> Result<(), SessionError> {
    input.validate().map_err(|e| SessionError::Validation(e.to_string()))
}

#[derive(Clone)]
pub struct SessionTracker {
    store: Arc<dyn Store>,
    inventory: InventoryEngine,
    max_tx_attempts: u32,
}

impl SessionTracker {
    pub fn new(store: Arc<dyn Store>, inventory: InventoryEngine, max_tx_attempts: u32) -> Self {
        Self {
            store,
            inventory,
            max_tx_attempts: max_tx_attempts.max(1),
        }
    }

    pub async fn create_session(
        &self,
        principal: &Principal,
        input: NewTrainingSession,
    ) -> Result<TrainingSession, SessionError> {
        principal.require_instructor()?;
        validate(&input)?;

        let session = TrainingSession {
            id: Uuid::now_v7(),
            company_id: principal.company_id,
            instructor_id: principal.user_id,
            session_type: input.session_type,
            location: input.location,
            site_code: input.site_code,
            notes: input.notes,
            status: SessionStatus::InProgress,
            created_at: OffsetDateTime::now_utc(),
            completed_at: None,
        };

        let mut tx = self.store.begin().await?;
        tx.insert_session(&session).await?;
        tx.commit().await?;

        tracing::info!(session_id = %session.id, session_type = %session.session_type, "Training session started");
        Ok(session)
    }

    /// Add a student and snapshot the session type's current template as their checklist.
    pub async fn enroll_student(
        &self,
        principal: &Principal,
        session_id: Uuid,
        input: NewStudent,
    ) -> Result<StudentWithTasks, SessionError> {
        principal.require_instructor()?;
        validate(&input)?;
        let input = &input;

        let enrolled = retry_contended("enroll_student", self.max_tx_attempts, || async move {
            let mut tx = self.store.begin().await?;
            let session = open_owned_session(tx.as_mut(), principal, session_id).await?;

            let student = input.clone().into_student(session.id);
            tx.insert_student(&student).await?;

            let template = tx.task_template(session.company_id, &session.session_type).await?;
            let tasks: Vec<StudentTask> = template
                .iter()
                .map(|entry| StudentTask::from_template(student.id, entry))
                .collect();
            tx.insert_student_tasks(&tasks).await?;
            tx.commit().await?;

            Ok::<_, SessionError>(StudentWithTasks { student, tasks })
        })
        .await?;

        tracing::info!(
            session_id = %session_id,
            student_id = %enrolled.student.id,
            tasks = enrolled.tasks.len(),
            "Student enrolled"
        );
        Ok(enrolled)
    }

    /// Mark a task for every student of a session, or for one student as an override.
    pub async fn set_task(
        &self,
        principal: &Principal,
        scope: TaskScope,
        update: TaskUpdate,
    ) -> Result<TaskMarkResult, SessionError> {
        principal.require_instructor()?;
        validate(&update)?;
        let update = &update;

        retry_contended("set_task", self.max_tx_attempts, || async move {
            let mut tx = self.store.begin().await?;
            let change = TaskChange::new(update.task_id.clone(), update.completed, update.notes.clone());

            let result = match scope {
                TaskScope::Session(session_id) => {
                    let session = open_owned_session(tx.as_mut(), principal, session_id).await?;
                    let students_updated = tx.update_session_task(session.id, &change).await?;
                    if students_updated == 0 && !tx.list_students(session.id).await?.is_empty() {
                        return Err(SessionError::NotFound("Task"));
                    }
                    tracing::info!(
                        session_id = %session.id,
                        task_id = %change.task_id,
                        completed = change.completed,
                        students_updated,
                        "Task marked for session"
                    );
                    TaskMarkResult::Bulk {
                        session_id: session.id,
                        task_id: change.task_id.clone(),
                        completed: change.completed,
                        students_updated,
                    }
                }
                TaskScope::Student(student_id) => {
                    let student = tx
                        .find_student(student_id)
                        .await?
                        .ok_or(SessionError::NotFound("Student"))?;
                    open_owned_session(tx.as_mut(), principal, student.session_id).await?;

                    let reason = update.override_reason.as_deref().or(update.notes.as_deref());
                    let task = tx
                        .update_student_task(student.id, &change, reason)
                        .await?
                        .ok_or(SessionError::NotFound("Task"))?;
                    tracing::info!(
                        student_id = %student.id,
                        task_id = %task.task_id,
                        completed = task.completed,
                        "Task overridden for student"
                    );
                    TaskMarkResult::Student(task)
                }
            };

            tx.commit().await?;
            Ok::<_, SessionError>(result)
        })
        .await
    }

    /// Grade every student, issue certificates to those who completed every
    /// task, and close the session.
    pub async fn complete_session(
        &self,
        principal: &Principal,
        session_id: Uuid,
    ) -> Result<CompletionSummary, SessionError> {
        principal.require_instructor()?;

        let summary = retry_contended("complete_session", self.max_tx_attempts, || {
            self.try_complete_session(principal, session_id)
        })
        .await?;

        if summary.stock_shortfall > 0 {
            tracing::warn!(
                session_id = %session_id,
                stock_shortfall = summary.stock_shortfall,
                "Certificate stock ran out while completing session"
            );
        }
        tracing::info!(
            session_id = %session_id,
            total_students = summary.total_students,
            certificates_issued = summary.certificates_issued,
            "Training session completed"
        );
        Ok(summary)
    }

    async fn try_complete_session(
        &self,
        principal: &Principal,
        session_id: Uuid,
    ) -> Result<CompletionSummary, SessionError> {
        let mut tx = self.store.begin().await?;
        let session = open_owned_session(tx.as_mut(), principal, session_id).await?;
        let now = OffsetDateTime::now_utc();

        let progress = tx.task_progress(session.id).await?;
        let mut certificates_issued = 0;
        let mut stock_shortfall = 0;

        for student in &progress {
            let outcome = if !student.all_complete() {
                TrainingOutcome::Incomplete
            } else if let Some(held) = tx.certificate_for_student(student.student_id).await? {
                tracing::debug!(
                    student_id = %student.student_id,
                    certificate_number = held.certificate_number,
                    "Student already certified, no new certificate consumed"
                );
                TrainingOutcome::Pass
            } else {
                let stamp = IssueStamp {
                    student_id: student.student_id,
                    session_id: session.id,
                    instructor_id: principal.user_id,
                    issued_at: now,
                };
                match self
                    .inventory
                    .allocate_and_issue_in(tx.as_mut(), session.company_id, &session.session_type, &stamp)
                    .await?
                {
                    Some(_) => {
                        certificates_issued += 1;
                        TrainingOutcome::Pass
                    }
                    None => {
                        stock_shortfall += 1;
                        TrainingOutcome::Incomplete
                    }
                }
            };
            tx.set_training_outcome(student.student_id, outcome).await?;
        }

        tx.mark_session_completed(session.id, now).await?;
        tx.commit().await?;

        Ok(CompletionSummary {
            session_id: session.id,
            total_students: progress.len(),
            certificates_issued,
            stock_shortfall,
        })
    }

    /// A session of the caller's company with its students.
    pub async fn session_detail(&self, principal: &Principal, session_id: Uuid) -> Result<SessionDetail, SessionError> {
        let mut tx = self.store.begin().await?;
        let session = tx
            .find_session(session_id)
            .await?
            .filter(|s| s.company_id == principal.company_id)
            .ok_or(SessionError::NotFound("Training session"))?;
        let students = tx.list_students(session.id).await?;
        tx.commit().await?;
        Ok(SessionDetail { session, students })
    }

    /// The caller's own sessions that are still in progress.
    pub async fn active_sessions(&self, principal: &Principal) -> Result<Vec<SessionSummary>, SessionError> {
        principal.require_instructor()?;
        self.list(SessionFilter {
            company_id: principal.company_id,
            instructor_id: Some(principal.user_id),
            status: Some(SessionStatus::InProgress),
        })
        .await
    }

    pub async fn company_sessions(&self, principal: &Principal) -> Result<Vec<SessionSummary>, SessionError> {
        principal.require_admin()?;
        self.list(SessionFilter {
            company_id: principal.company_id,
            ..Default::default()
        })
        .await
    }

    async fn list(&self, filter: SessionFilter) -> Result<Vec<SessionSummary>, SessionError> {
        let mut tx = self.store.begin().await?;
        let sessions = tx.list_sessions(filter).await?;
        tx.commit().await?;
        Ok(sessions)
    }

    /// Store a face-match result on a student of one of the caller's open sessions.
    pub async fn record_verification(
        &self,
        principal: &Principal,
        student_id: Uuid,
        result: &MatchResult,
    ) -> Result<(), SessionError> {
        principal.require_instructor()?;

        retry_contended("record_verification", self.max_tx_attempts, || async move {
            let mut tx = self.store.begin().await?;
            let student = tx
                .find_student(student_id)
                .await?
                .ok_or(SessionError::NotFound("Student"))?;
            open_owned_session(tx.as_mut(), principal, student.session_id).await?;
            tx.record_match(student.id, result.match_score, result.is_match).await?;
            tx.commit().await?;
            Ok::<_, SessionError>(())
        })
        .await?;

        tracing::info!(
            student_id = %student_id,
            match_score = result.match_score,
            verified = result.is_match,
            "Face verification recorded"
        );
        Ok(())
    }

    pub async fn task_template(&self, principal: &Principal, session_type: &str) -> Result<Vec<TaskTemplate>, SessionError> {
        let mut tx = self.store.begin().await?;
        let tasks = tx.task_template(principal.company_id, session_type).await?;
        tx.commit().await?;
        Ok(tasks)
    }

    /// Replace the ordered checklist of a session type. Students already
    /// enrolled keep the checklist they were given.
    pub async fn replace_task_template(
        &self,
        principal: &Principal,
        session_type: &str,
        input: ReplaceTaskTemplate,
    ) -> Result<Vec<TaskTemplate>, SessionError> {
        principal.require_admin()?;
        validate(&input)?;
        if session_type.is_empty() || session_type.len() > 32 {
            return Err(SessionError::Validation("Session type must be 1-32 characters".into()));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = input.tasks.iter().find(|t| !seen.insert(t.task_id.as_str())) {
            return Err(SessionError::Validation(format!("Duplicate task id {}", dup.task_id)));
        }

        let tasks: Vec<TaskTemplate> = input
            .tasks
            .into_iter()
            .zip(1..)
            .map(|(task, sequence)| TaskTemplate {
                company_id: principal.company_id,
                session_type: session_type.to_string(),
                task_id: task.task_id,
                task_description: task.task_description,
                sequence,
            })
            .collect();
        let tasks_ref = &tasks;

        retry_contended("replace_task_template", self.max_tx_attempts, || async move {
            let mut tx = self.store.begin().await?;
            tx.replace_task_template(principal.company_id, session_type, tasks_ref).await?;
            tx.commit().await?;
            Ok::<_, SessionError>(())
        })
        .await?;

        tracing::info!(session_type, tasks = tasks.len(), "Task template replaced");
        Ok(tasks)
    }

    /// Company-wide headline numbers; "today" starts at midnight UTC.
    pub async fn training_stats(&self, principal: &Principal) -> Result<TrainingStats, SessionError> {
        let since = OffsetDateTime::now_utc().replace_time(Time::MIDNIGHT);
        let mut tx = self.store.begin().await?;
        let stats = tx.training_stats(principal.company_id, since).await?;
        tx.commit().await?;
        Ok(stats)
    }
}
