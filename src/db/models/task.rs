use serde::{Deserialize, Serialize};
use sqlx::types::Uuid;
use time::OffsetDateTime;
use validator::Validate;

/// One entry of the ordered checklist for a session type.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub company_id: Uuid,
    pub session_type: String,
    pub task_id: String,
    pub task_description: String,
    pub sequence: i32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TemplateTask {
    #[validate(length(min = 1, max = 64, message = "Task id must be 1-64 characters"))]
    pub task_id: String,
    #[validate(length(min = 1, message = "Task description must not be empty"))]
    pub task_description: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReplaceTaskTemplate {
    #[validate(nested)]
    pub tasks: Vec<TemplateTask>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct StudentTask {
    pub id: Uuid,
    pub student_id: Uuid,
    pub task_id: String,
    pub task_description: String,
    pub sequence: i32,
    pub completed: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub notes: Option<String>,
    pub override_reason: Option<String>,
}

impl StudentTask {
    /// Snapshot a template entry into a fresh, incomplete task for a student.
    pub fn from_template(student_id: Uuid, template: &TaskTemplate) -> Self {
        Self {
            id: Uuid::now_v7(),
            student_id,
            task_id: template.task_id.clone(),
            task_description: template.task_description.clone(),
            sequence: template.sequence,
            completed: false,
            completed_at: None,
            notes: None,
            override_reason: None,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct TaskUpdate {
    #[validate(length(min = 1, message = "Task id must not be empty"))]
    pub task_id: String,
    pub completed: bool,
    pub notes: Option<String>,
    pub override_reason: Option<String>,
}

/// The columns a task mark writes, shared by bulk and per-student updates.
#[derive(Debug, Clone)]
pub struct TaskChange {
    pub task_id: String,
    pub completed: bool,
    pub completed_at: Option<OffsetDateTime>,
    pub notes: Option<String>,
}

impl TaskChange {
    pub fn new(task_id: impl Into<String>, completed: bool, notes: Option<String>) -> Self {
        Self {
            task_id: task_id.into(),
            completed,
            completed_at: completed.then(OffsetDateTime::now_utc),
            notes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskScope {
    /// Every student enrolled in the session.
    Session(Uuid),
    /// One student, recorded as an override.
    Student(Uuid),
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TaskMarkResult {
    Bulk {
        session_id: Uuid,
        task_id: String,
        completed: bool,
        students_updated: u64,
    },
    Student(StudentTask),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct TaskProgress {
    pub student_id: Uuid,
    pub total_tasks: i64,
    pub completed_tasks: i64,
}

impl TaskProgress {
    pub fn all_complete(&self) -> bool {
        self.total_tasks > 0 && self.completed_tasks == self.total_tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_requires_at_least_one_task() {
        let id = Uuid::now_v7();
        let progress = |total, completed| TaskProgress {
            student_id: id,
            total_tasks: total,
            completed_tasks: completed,
        };

        assert!(progress(3, 3).all_complete());
        assert!(!progress(3, 2).all_complete());
        assert!(!progress(0, 0).all_complete());
    }

    #[test]
    fn change_stamps_completion_time_only_when_completed() {
        assert!(TaskChange::new("T1", true, None).completed_at.is_some());
        assert!(TaskChange::new("T1", false, None).completed_at.is_none());
    }
}
