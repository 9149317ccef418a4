use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::db::error::DbResult;
use crate::db::models::{BatchStatus, Certificate, CertificateBatch, CertificateStatus, IssueStamp};

const SELECT_BATCH: &str = r#"
    SELECT id, company_id, session_type, start_number, end_number, batch_size,
           certificates_remaining, status, received_by, received_at
    FROM certificate_batches
"#;

const CERTIFICATE_COLUMNS: &str = r#"
    id, batch_id, company_id, session_type, certificate_number, status,
    student_id, session_id, instructor_id, issue_date
"#;

pub struct CertificateRepository;

impl CertificateRepository {
    pub async fn find_overlapping_batch(
        tx: &mut Transaction<'_, Postgres>,
        company_id: Uuid,
        session_type: &str,
        start_number: i64,
        end_number: i64,
    ) -> DbResult<Option<CertificateBatch>> {
        let batch = sqlx::query_as::<_, CertificateBatch>(&format!(
            r#"{SELECT_BATCH}
            WHERE company_id = $1 AND session_type = $2
              AND start_number <= $4 AND $3 <= end_number
            ORDER BY start_number
            LIMIT 1"#
        ))
        .bind(company_id)
        .bind(session_type)
        .bind(start_number)
        .bind(end_number)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(batch)
    }

    /// Creates the batch and its certificates in one round trip each; the
    /// caller's transaction makes the pair atomic.
    pub async fn create_batch(tx: &mut Transaction<'_, Postgres>, batch: &CertificateBatch) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO certificate_batches (id, company_id, session_type, start_number, end_number,
                                             batch_size, certificates_remaining, status, received_by, received_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(batch.id)
        .bind(batch.company_id)
        .bind(&batch.session_type)
        .bind(batch.start_number)
        .bind(batch.end_number)
        .bind(batch.batch_size)
        .bind(batch.certificates_remaining)
        .bind(batch.status)
        .bind(batch.received_by)
        .bind(batch.received_at)
        .execute(&mut **tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO certificates (id, batch_id, company_id, session_type, certificate_number, status)
            SELECT gen_random_uuid(), $1, $2, $3, n, $4
            FROM generate_series($5::BIGINT, $6::BIGINT) AS n
            "#,
        )
        .bind(batch.id)
        .bind(batch.company_id)
        .bind(&batch.session_type)
        .bind(CertificateStatus::Available)
        .bind(batch.start_number)
        .bind(batch.end_number)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    pub async fn find_batch(tx: &mut Transaction<'_, Postgres>, batch_id: Uuid) -> DbResult<Option<CertificateBatch>> {
        let batch = sqlx::query_as::<_, CertificateBatch>(&format!("{SELECT_BATCH} WHERE id = $1"))
            .bind(batch_id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(batch)
    }

    pub async fn find_certificate(
        tx: &mut Transaction<'_, Postgres>,
        certificate_id: Uuid,
    ) -> DbResult<Option<Certificate>> {
        let certificate = sqlx::query_as::<_, Certificate>(&format!(
            "SELECT {CERTIFICATE_COLUMNS} FROM certificates WHERE id = $1"
        ))
        .bind(certificate_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(certificate)
    }

    pub async fn issued_to_student(
        tx: &mut Transaction<'_, Postgres>,
        student_id: Uuid,
    ) -> DbResult<Option<Certificate>> {
        let certificate = sqlx::query_as::<_, Certificate>(&format!(
            "SELECT {CERTIFICATE_COLUMNS} FROM certificates WHERE student_id = $1 AND status = 'issued' LIMIT 1"
        ))
        .bind(student_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(certificate)
    }

    pub async fn next_available(
        tx: &mut Transaction<'_, Postgres>,
        company_id: Uuid,
        session_type: &str,
    ) -> DbResult<Option<Certificate>> {
        let certificate = sqlx::query_as::<_, Certificate>(
            r#"
            SELECT c.id, c.batch_id, c.company_id, c.session_type, c.certificate_number, c.status,
                   c.student_id, c.session_id, c.instructor_id, c.issue_date
            FROM certificates c
            JOIN certificate_batches cb ON c.batch_id = cb.id
            WHERE c.company_id = $1 AND c.session_type = $2 AND c.status = $3 AND cb.status = $4
            ORDER BY c.certificate_number
            LIMIT 1
            "#,
        )
        .bind(company_id)
        .bind(session_type)
        .bind(CertificateStatus::Available)
        .bind(BatchStatus::Active)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(certificate)
    }

    /// Only succeeds while the row is still AVAILABLE; a concurrent issuer
    /// that committed first makes this return `None`.
    pub async fn mark_issued(
        tx: &mut Transaction<'_, Postgres>,
        certificate_id: Uuid,
        stamp: &IssueStamp,
    ) -> DbResult<Option<Certificate>> {
        let certificate = sqlx::query_as::<_, Certificate>(&format!(
            r#"
            UPDATE certificates
            SET status = $1, student_id = $2, session_id = $3, instructor_id = $4, issue_date = $5
            WHERE id = $6 AND status = $7
            RETURNING {CERTIFICATE_COLUMNS}
            "#
        ))
        .bind(CertificateStatus::Issued)
        .bind(stamp.student_id)
        .bind(stamp.session_id)
        .bind(stamp.instructor_id)
        .bind(stamp.issued_at)
        .bind(certificate_id)
        .bind(CertificateStatus::Available)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(certificate)
    }

    pub async fn decrement_remaining(
        tx: &mut Transaction<'_, Postgres>,
        batch_id: Uuid,
    ) -> DbResult<Option<CertificateBatch>> {
        let batch = sqlx::query_as::<_, CertificateBatch>(
            r#"
            UPDATE certificate_batches
            SET certificates_remaining = certificates_remaining - 1
            WHERE id = $1 AND certificates_remaining > 0
            RETURNING id, company_id, session_type, start_number, end_number, batch_size,
                      certificates_remaining, status, received_by, received_at
            "#,
        )
        .bind(batch_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(batch)
    }

    pub async fn count_available(tx: &mut Transaction<'_, Postgres>, batch_id: Uuid) -> DbResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM certificates WHERE batch_id = $1 AND status = $2",
        )
        .bind(batch_id)
        .bind(CertificateStatus::Available)
        .fetch_one(&mut **tx)
        .await?;
        Ok(count)
    }

    pub async fn set_batch_status(
        tx: &mut Transaction<'_, Postgres>,
        batch_id: Uuid,
        status: BatchStatus,
    ) -> DbResult<()> {
        sqlx::query("UPDATE certificate_batches SET status = $1 WHERE id = $2")
            .bind(status)
            .bind(batch_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn active_batches(tx: &mut Transaction<'_, Postgres>, company_id: Uuid) -> DbResult<Vec<CertificateBatch>> {
        let batches = sqlx::query_as::<_, CertificateBatch>(&format!(
            "{SELECT_BATCH} WHERE company_id = $1 AND status = $2 ORDER BY session_type, start_number"
        ))
        .bind(company_id)
        .bind(BatchStatus::Active)
        .fetch_all(&mut **tx)
        .await?;
        Ok(batches)
    }

    pub async fn remaining_stock(
        tx: &mut Transaction<'_, Postgres>,
        company_id: Uuid,
        session_type: &str,
    ) -> DbResult<i64> {
        let remaining = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(certificates_remaining), 0)::BIGINT
            FROM certificate_batches
            WHERE company_id = $1 AND session_type = $2 AND status = $3
            "#,
        )
        .bind(company_id)
        .bind(session_type)
        .bind(BatchStatus::Active)
        .fetch_one(&mut **tx)
        .await?;
        Ok(remaining)
    }
}
