use sqlx::{Postgres, QueryBuilder, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::error::DbResult;
use crate::db::models::{
    CertificateStatus, SessionFilter, SessionStatus, SessionSummary, Student, StudentTask,
    TaskChange, TaskProgress, TaskTemplate, TrainingOutcome, TrainingSession, TrainingStats,
};

const SELECT_SESSION: &str = r#"
    SELECT id, company_id, instructor_id, session_type, location, site_code, notes, status,
           created_at, completed_at
    FROM training_sessions
"#;

const SELECT_STUDENT: &str = r#"
    SELECT id, session_id, name, license_number, email, phone, date_of_birth, bike_type,
           training_outcome, match_score, verified, created_at
    FROM students
"#;

const STUDENT_TASK_COLUMNS: &str = r#"
    id, student_id, task_id, task_description, sequence, completed, completed_at, notes, override_reason
"#;

pub struct SessionRepository;

impl SessionRepository {
    // Task templates
    pub async fn task_template(
        tx: &mut Transaction<'_, Postgres>,
        company_id: Uuid,
        session_type: &str,
    ) -> DbResult<Vec<TaskTemplate>> {
        let tasks = sqlx::query_as::<_, TaskTemplate>(
            r#"
            SELECT company_id, session_type, task_id, task_description, sequence
            FROM task_templates
            WHERE company_id = $1 AND session_type = $2
            ORDER BY sequence
            "#,
        )
        .bind(company_id)
        .bind(session_type)
        .fetch_all(&mut **tx)
        .await?;
        Ok(tasks)
    }

    pub async fn replace_task_template(
        tx: &mut Transaction<'_, Postgres>,
        company_id: Uuid,
        session_type: &str,
        tasks: &[TaskTemplate],
    ) -> DbResult<()> {
        sqlx::query("DELETE FROM task_templates WHERE company_id = $1 AND session_type = $2")
            .bind(company_id)
            .bind(session_type)
            .execute(&mut **tx)
            .await?;

        if tasks.is_empty() {
            return Ok(());
        }

        let mut insert = QueryBuilder::<Postgres>::new(
            "INSERT INTO task_templates (company_id, session_type, task_id, task_description, sequence) ",
        );
        insert.push_values(tasks, |mut row, task| {
            row.push_bind(task.company_id)
                .push_bind(&task.session_type)
                .push_bind(&task.task_id)
                .push_bind(&task.task_description)
                .push_bind(task.sequence);
        });
        insert.build().execute(&mut **tx).await?;
        Ok(())
    }

    // Sessions
    pub async fn create_session(tx: &mut Transaction<'_, Postgres>, session: &TrainingSession) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO training_sessions (id, company_id, instructor_id, session_type, location,
                                           site_code, notes, status, created_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(session.id)
        .bind(session.company_id)
        .bind(session.instructor_id)
        .bind(&session.session_type)
        .bind(&session.location)
        .bind(&session.site_code)
        .bind(&session.notes)
        .bind(session.status)
        .bind(session.created_at)
        .bind(session.completed_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Row-locks the session so enrollment, task marks and completion of the
    /// same session serialize.
    pub async fn lock_session(
        tx: &mut Transaction<'_, Postgres>,
        session_id: Uuid,
    ) -> DbResult<Option<TrainingSession>> {
        let session = sqlx::query_as::<_, TrainingSession>(&format!(
            "{SELECT_SESSION} WHERE id = $1 FOR UPDATE"
        ))
        .bind(session_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(session)
    }

    pub async fn mark_completed(
        tx: &mut Transaction<'_, Postgres>,
        session_id: Uuid,
        at: OffsetDateTime,
    ) -> DbResult<()> {
        sqlx::query("UPDATE training_sessions SET status = $1, completed_at = $2 WHERE id = $3")
            .bind(SessionStatus::Completed)
            .bind(at)
            .bind(session_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn list_sessions(
        tx: &mut Transaction<'_, Postgres>,
        filter: SessionFilter,
    ) -> DbResult<Vec<SessionSummary>> {
        let mut query = QueryBuilder::<Postgres>::new(
            r#"
            SELECT s.id, s.company_id, s.instructor_id, s.session_type, s.location, s.site_code,
                   s.notes, s.status, s.created_at, s.completed_at,
                   u.name AS instructor_name,
                   COUNT(st.id) AS student_count
            FROM training_sessions s
            JOIN users u ON s.instructor_id = u.id
            LEFT JOIN students st ON st.session_id = s.id
            WHERE s.company_id = "#,
        );
        query.push_bind(filter.company_id);
        if let Some(instructor_id) = filter.instructor_id {
            query.push(" AND s.instructor_id = ").push_bind(instructor_id);
        }
        if let Some(status) = filter.status {
            query.push(" AND s.status = ").push_bind(status);
        }
        query.push(" GROUP BY s.id, u.name ORDER BY s.created_at DESC");

        let sessions = query
            .build_query_as::<SessionSummary>()
            .fetch_all(&mut **tx)
            .await?;
        Ok(sessions)
    }

    // Students
    pub async fn create_student(tx: &mut Transaction<'_, Postgres>, student: &Student) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO students (id, session_id, name, license_number, email, phone, date_of_birth,
                                  bike_type, training_outcome, match_score, verified, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(student.id)
        .bind(student.session_id)
        .bind(&student.name)
        .bind(&student.license_number)
        .bind(&student.email)
        .bind(&student.phone)
        .bind(&student.date_of_birth)
        .bind(&student.bike_type)
        .bind(student.training_outcome)
        .bind(student.match_score)
        .bind(student.verified)
        .bind(student.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn get_student(tx: &mut Transaction<'_, Postgres>, student_id: Uuid) -> DbResult<Option<Student>> {
        let student = sqlx::query_as::<_, Student>(&format!("{SELECT_STUDENT} WHERE id = $1"))
            .bind(student_id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(student)
    }

    pub async fn list_students(tx: &mut Transaction<'_, Postgres>, session_id: Uuid) -> DbResult<Vec<Student>> {
        let students = sqlx::query_as::<_, Student>(&format!(
            "{SELECT_STUDENT} WHERE session_id = $1 ORDER BY created_at, id"
        ))
        .bind(session_id)
        .fetch_all(&mut **tx)
        .await?;
        Ok(students)
    }

    pub async fn set_outcome(
        tx: &mut Transaction<'_, Postgres>,
        student_id: Uuid,
        outcome: TrainingOutcome,
    ) -> DbResult<()> {
        sqlx::query("UPDATE students SET training_outcome = $1 WHERE id = $2")
            .bind(outcome)
            .bind(student_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn record_match(
        tx: &mut Transaction<'_, Postgres>,
        student_id: Uuid,
        match_score: f64,
        verified: bool,
    ) -> DbResult<()> {
        sqlx::query("UPDATE students SET match_score = $1, verified = $2 WHERE id = $3")
            .bind(match_score)
            .bind(verified)
            .bind(student_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    // Student checklists
    pub async fn create_student_tasks(tx: &mut Transaction<'_, Postgres>, tasks: &[StudentTask]) -> DbResult<()> {
        if tasks.is_empty() {
            return Ok(());
        }
        let mut insert = QueryBuilder::<Postgres>::new(
            "INSERT INTO student_tasks (id, student_id, task_id, task_description, sequence, completed) ",
        );
        insert.push_values(tasks, |mut row, task| {
            row.push_bind(task.id)
                .push_bind(task.student_id)
                .push_bind(&task.task_id)
                .push_bind(&task.task_description)
                .push_bind(task.sequence)
                .push_bind(task.completed);
        });
        insert.build().execute(&mut **tx).await?;
        Ok(())
    }

    pub async fn student_tasks(tx: &mut Transaction<'_, Postgres>, student_id: Uuid) -> DbResult<Vec<StudentTask>> {
        let tasks = sqlx::query_as::<_, StudentTask>(&format!(
            "SELECT {STUDENT_TASK_COLUMNS} FROM student_tasks WHERE student_id = $1 ORDER BY sequence"
        ))
        .bind(student_id)
        .fetch_all(&mut **tx)
        .await?;
        Ok(tasks)
    }

    pub async fn update_session_task(
        tx: &mut Transaction<'_, Postgres>,
        session_id: Uuid,
        change: &TaskChange,
    ) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE student_tasks
            SET completed = $1, completed_at = $2, notes = $3
            WHERE task_id = $4
              AND student_id IN (SELECT id FROM students WHERE session_id = $5)
            "#,
        )
        .bind(change.completed)
        .bind(change.completed_at)
        .bind(&change.notes)
        .bind(&change.task_id)
        .bind(session_id)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn update_student_task(
        tx: &mut Transaction<'_, Postgres>,
        student_id: Uuid,
        change: &TaskChange,
        override_reason: Option<&str>,
    ) -> DbResult<Option<StudentTask>> {
        let task = sqlx::query_as::<_, StudentTask>(&format!(
            r#"
            UPDATE student_tasks
            SET completed = $1, completed_at = $2, notes = $3, override_reason = $4
            WHERE student_id = $5 AND task_id = $6
            RETURNING {STUDENT_TASK_COLUMNS}
            "#
        ))
        .bind(change.completed)
        .bind(change.completed_at)
        .bind(&change.notes)
        .bind(override_reason)
        .bind(student_id)
        .bind(&change.task_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(task)
    }

    pub async fn task_progress(tx: &mut Transaction<'_, Postgres>, session_id: Uuid) -> DbResult<Vec<TaskProgress>> {
        let progress = sqlx::query_as::<_, TaskProgress>(
            r#"
            SELECT s.id AS student_id,
                   COUNT(t.id) AS total_tasks,
                   COUNT(t.id) FILTER (WHERE t.completed) AS completed_tasks
            FROM students s
            LEFT JOIN student_tasks t ON t.student_id = s.id
            WHERE s.session_id = $1
            GROUP BY s.id, s.created_at
            ORDER BY s.created_at, s.id
            "#,
        )
        .bind(session_id)
        .fetch_all(&mut **tx)
        .await?;
        Ok(progress)
    }

    pub async fn training_stats(
        tx: &mut Transaction<'_, Postgres>,
        company_id: Uuid,
        since: OffsetDateTime,
    ) -> DbResult<TrainingStats> {
        let stats = sqlx::query_as::<_, TrainingStats>(
            r#"
            WITH company_students AS (
                SELECT st.*
                FROM students st
                JOIN training_sessions s ON st.session_id = s.id
                WHERE s.company_id = $1
            )
            SELECT
                (SELECT COUNT(*) FROM company_students) AS total_students,
                (SELECT COUNT(*) FROM company_students WHERE verified) AS verified_students,
                (SELECT COUNT(*) FROM company_students WHERE created_at >= $2) AS students_today,
                (SELECT COALESCE(AVG(match_score), 0)::DOUBLE PRECISION FROM company_students
                    WHERE match_score IS NOT NULL) AS average_match_score,
                (SELECT COUNT(*) FROM certificates WHERE company_id = $1 AND status = $3) AS certificates_issued,
                (SELECT COUNT(*) FROM training_sessions WHERE company_id = $1 AND status = $4) AS active_sessions
            "#,
        )
        .bind(company_id)
        .bind(since)
        .bind(CertificateStatus::Issued)
        .bind(SessionStatus::InProgress)
        .fetch_one(&mut **tx)
        .await?;
        Ok(stats)
    }
}
