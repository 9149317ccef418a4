//! Certificate stock: receiving numbered batches, handing out the lowest
//! available number, and issuing it exactly once.
//!
//! Issuance is a conditional AVAILABLE -> ISSUED write followed by a guarded
//! decrement of the batch counter and a recount of the batch's AVAILABLE
//! certificates, all inside the caller's transaction. A candidate that was
//! taken by a concurrent issuer between the read and the write is skipped and
//! the next lowest number is tried, bounded by the stock that was on hand
//! when the allocation started.

use std::sync::Arc;

use opentelemetry::KeyValue;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;
use validator::Validate;

use super::access::{open_owned_session, OwnershipError};
use super::{retry_contended, GateError, Principal, Retryable};
use crate::db::{
    BatchStatus, BatchSummary, Certificate, CertificateBatch, CertificateStatus, DatabaseError,
    IssueStamp, IssuedCertificate, NewCertificateBatch, NextCertificate, Store, StoreTx,
};
use crate::telemetry::{self, LogCounter};

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error(transparent)]
    Gate(#[from] GateError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Certificate range {start}-{end} overlaps an existing {session_type} batch")]
    Overlap { session_type: String, start: i64, end: i64 },

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Only the session's instructor may issue certificates for it")]
    NotSessionOwner,

    #[error("Session {0} is already completed")]
    SessionClosed(Uuid),

    #[error("Certificate {certificate_number} has already been issued")]
    AlreadyIssued { certificate_number: i64 },

    #[error("Student {student_id} already holds certificate {certificate_number}")]
    AlreadyCertified { student_id: Uuid, certificate_number: i64 },

    #[error("Batch {batch_id} has {remaining} remaining but {available} available certificates")]
    CountMismatch { batch_id: Uuid, remaining: i64, available: i64 },

    #[error("Gave up allocating a {session_type} certificate after repeated conflicts")]
    RetriesExhausted { session_type: String },

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

impl From<OwnershipError> for InventoryError {
    fn from(err: OwnershipError) -> Self {
        match err {
            OwnershipError::NotFound => InventoryError::NotFound("Training session"),
            OwnershipError::NotOwner => InventoryError::NotSessionOwner,
            OwnershipError::Closed(id) => InventoryError::SessionClosed(id),
            OwnershipError::Store(err) => InventoryError::Store(err),
        }
    }
}

impl Retryable for InventoryError {
    fn is_retryable(&self) -> bool {
        match self {
            InventoryError::Store(err) | InventoryError::Gate(GateError::Store(err)) => err.is_retryable(),
            _ => false,
        }
    }
}

/// Response to a successful batch receipt.
#[derive(Debug, Clone, Serialize)]
pub struct ReceivedBatch {
    pub batch_id: Uuid,
    pub session_type: String,
    pub start_number: i64,
    pub end_number: i64,
    pub total_certificates: i64,
}

impl From<&CertificateBatch> for ReceivedBatch {
    fn from(batch: &CertificateBatch) -> Self {
        Self {
            batch_id: batch.id,
            session_type: batch.session_type.clone(),
            start_number: batch.start_number,
            end_number: batch.end_number,
            total_certificates: batch.batch_size,
        }
    }
}

struct InventoryMetrics {
    issued: LogCounter,
    allocation_retries: LogCounter,
}

#[derive(Clone)]
pub struct InventoryEngine {
    store: Arc<dyn Store>,
    max_tx_attempts: u32,
    metrics: Arc<InventoryMetrics>,
}

impl InventoryEngine {
    pub fn new(store: Arc<dyn Store>, max_tx_attempts: u32) -> Self {
        let meter = telemetry::get_meter("certificate-inventory");
        Self {
            store,
            max_tx_attempts: max_tx_attempts.max(1),
            metrics: Arc::new(InventoryMetrics {
                issued: meter.u64_counter("certificates_issued_total"),
                allocation_retries: meter.u64_counter("certificate_allocation_retries_total"),
            }),
        }
    }

    /// Record a physically received block of certificates and create one
    /// AVAILABLE certificate per number.
    pub async fn receive_batch(
        &self,
        principal: &Principal,
        input: NewCertificateBatch,
    ) -> Result<ReceivedBatch, InventoryError> {
        principal.require_admin()?;
        input
            .validate()
            .map_err(|e| InventoryError::Validation(e.to_string()))?;
        let end_number = input
            .start_certificate_number
            .checked_add(input.batch_size - 1)
            .ok_or_else(|| InventoryError::Validation("Certificate range exceeds the numbering limit".into()))?;

        let batch = retry_contended("receive_batch", self.max_tx_attempts, || {
            self.try_receive_batch(principal, &input, end_number)
        })
        .await?;

        tracing::info!(
            batch_id = %batch.id,
            session_type = %batch.session_type,
            start_number = batch.start_number,
            end_number = batch.end_number,
            received_by = %principal.user_id,
            "Certificate batch received"
        );
        Ok(ReceivedBatch::from(&batch))
    }

    async fn try_receive_batch(
        &self,
        principal: &Principal,
        input: &NewCertificateBatch,
        end_number: i64,
    ) -> Result<CertificateBatch, InventoryError> {
        let overlap = || InventoryError::Overlap {
            session_type: input.session_type.clone(),
            start: input.start_certificate_number,
            end: end_number,
        };

        let mut tx = self.store.begin().await?;
        if let Some(existing) = tx
            .find_overlapping_batch(
                principal.company_id,
                &input.session_type,
                input.start_certificate_number,
                end_number,
            )
            .await?
        {
            tracing::warn!(
                existing_batch = %existing.id,
                existing_start = existing.start_number,
                existing_end = existing.end_number,
                "Rejected overlapping certificate batch"
            );
            return Err(overlap());
        }

        let batch = CertificateBatch {
            id: Uuid::now_v7(),
            company_id: principal.company_id,
            session_type: input.session_type.clone(),
            start_number: input.start_certificate_number,
            end_number,
            batch_size: input.batch_size,
            certificates_remaining: input.batch_size,
            status: BatchStatus::Active,
            received_by: principal.user_id,
            received_at: OffsetDateTime::now_utc(),
        };
        tx.insert_batch(&batch).await.map_err(|err| match err {
            DatabaseError::Duplicate(_) => overlap(),
            other => InventoryError::Store(other),
        })?;
        tx.commit().await?;
        Ok(batch)
    }

    /// The certificate the next issuance of this session type would use,
    /// without reserving it.
    pub async fn allocate_next(
        &self,
        principal: &Principal,
        session_type: &str,
    ) -> Result<Option<NextCertificate>, InventoryError> {
        principal.require_instructor()?;

        let mut tx = self.store.begin().await?;
        let Some(certificate) = Self::allocate_next_in(tx.as_mut(), principal.company_id, session_type).await? else {
            return Ok(None);
        };
        let batch = tx
            .find_batch(certificate.batch_id)
            .await?
            .ok_or(InventoryError::NotFound("Certificate batch"))?;
        tx.commit().await?;

        Ok(Some(NextCertificate {
            certificate,
            certificates_remaining: batch.certificates_remaining,
        }))
    }

    /// Issue a specific certificate to a student of one of the caller's open
    /// sessions. A student holds at most one ISSUED certificate.
    pub async fn issue(
        &self,
        principal: &Principal,
        certificate_id: Uuid,
        student_id: Uuid,
        session_id: Uuid,
    ) -> Result<IssuedCertificate, InventoryError> {
        principal.require_instructor()?;

        let issued = retry_contended("issue_certificate", self.max_tx_attempts, || async move {
            let mut tx = self.store.begin().await?;

            let certificate = tx
                .find_certificate(certificate_id)
                .await?
                .filter(|c| c.company_id == principal.company_id)
                .ok_or(InventoryError::NotFound("Certificate"))?;
            open_owned_session(tx.as_mut(), principal, session_id).await?;
            tx.find_student(student_id)
                .await?
                .filter(|s| s.session_id == session_id)
                .ok_or(InventoryError::NotFound("Student"))?;
            if let Some(held) = tx.certificate_for_student(student_id).await? {
                return Err(InventoryError::AlreadyCertified {
                    student_id,
                    certificate_number: held.certificate_number,
                });
            }

            let stamp = IssueStamp {
                student_id,
                session_id,
                instructor_id: principal.user_id,
                issued_at: OffsetDateTime::now_utc(),
            };
            let issued = self.issue_in(tx.as_mut(), &certificate, &stamp).await?;
            tx.commit().await?;
            Ok::<_, InventoryError>(issued)
        })
        .await?;

        self.metrics.issued.add(1, &[KeyValue::new("session_type", issued.session_type.clone())]);
        Ok(issued)
    }

    /// Candidates skipped because a concurrent issuer took them first.
    pub fn allocation_retries(&self) -> u64 {
        self.metrics.allocation_retries.total()
    }

    /// ACTIVE batches with their remaining stock, by session type then start number.
    pub async fn inventory_report(&self, principal: &Principal) -> Result<Vec<BatchSummary>, InventoryError> {
        let mut tx = self.store.begin().await?;
        let batches = tx.active_batches(principal.company_id).await?;
        tx.commit().await?;
        Ok(batches.iter().map(BatchSummary::from).collect())
    }

    pub async fn allocate_next_in(
        tx: &mut dyn StoreTx,
        company_id: Uuid,
        session_type: &str,
    ) -> Result<Option<Certificate>, InventoryError> {
        Ok(tx.next_available_certificate(company_id, session_type).await?)
    }

    /// Transition one certificate to ISSUED and reconcile its batch, inside `tx`.
    pub async fn issue_in(
        &self,
        tx: &mut dyn StoreTx,
        certificate: &Certificate,
        stamp: &IssueStamp,
    ) -> Result<IssuedCertificate, InventoryError> {
        if certificate.status == CertificateStatus::Issued {
            return Err(InventoryError::AlreadyIssued {
                certificate_number: certificate.certificate_number,
            });
        }
        let issued = tx
            .mark_certificate_issued(certificate.id, stamp)
            .await?
            .ok_or(InventoryError::AlreadyIssued {
                certificate_number: certificate.certificate_number,
            })?;

        let batch = match tx.decrement_batch_remaining(issued.batch_id).await? {
            Some(batch) => batch,
            None => {
                let available = tx.count_available_certificates(issued.batch_id).await?;
                return Err(self.count_mismatch(issued.batch_id, 0, available));
            }
        };

        let available = tx.count_available_certificates(batch.id).await?;
        if available != batch.certificates_remaining {
            return Err(self.count_mismatch(batch.id, batch.certificates_remaining, available));
        }
        if batch.certificates_remaining == 0 {
            tx.set_batch_status(batch.id, BatchStatus::Exhausted).await?;
            tracing::info!(batch_id = %batch.id, session_type = %batch.session_type, "Certificate batch exhausted");
        }

        tracing::info!(
            certificate_number = issued.certificate_number,
            batch_id = %batch.id,
            student_id = %stamp.student_id,
            session_id = %stamp.session_id,
            batch_remaining = batch.certificates_remaining,
            "Certificate issued"
        );

        Ok(IssuedCertificate {
            certificate_id: issued.id,
            batch_id: batch.id,
            certificate_number: issued.certificate_number,
            session_type: issued.session_type,
            student_id: stamp.student_id,
            session_id: stamp.session_id,
            instructor_id: stamp.instructor_id,
            issue_date: stamp.issued_at,
            batch_remaining: batch.certificates_remaining,
        })
    }

    /// Allocate the lowest available number and issue it, skipping candidates
    /// lost to concurrent issuers. `Ok(None)` means the stock is exhausted,
    /// including when concurrent issuers drained it mid-allocation.
    pub async fn allocate_and_issue_in(
        &self,
        tx: &mut dyn StoreTx,
        company_id: Uuid,
        session_type: &str,
        stamp: &IssueStamp,
    ) -> Result<Option<IssuedCertificate>, InventoryError> {
        let attempts = tx.remaining_stock(company_id, session_type).await?.max(1);

        for attempt in 1..=attempts {
            let Some(candidate) = Self::allocate_next_in(tx, company_id, session_type).await? else {
                return Ok(None);
            };
            match self.issue_in(tx, &candidate, stamp).await {
                Ok(issued) => {
                    self.metrics.issued.add(1, &[KeyValue::new("session_type", session_type.to_string())]);
                    return Ok(Some(issued));
                }
                Err(InventoryError::AlreadyIssued { certificate_number }) => {
                    self.metrics
                        .allocation_retries
                        .add(1, &[KeyValue::new("session_type", session_type.to_string())]);
                    tracing::debug!(certificate_number, attempt, "Candidate certificate taken concurrently, retrying");
                }
                Err(err) => return Err(err),
            }
        }

        // Every attempt lost a race; concurrent issuers may have drained the stock.
        if Self::allocate_next_in(tx, company_id, session_type).await?.is_none() {
            return Ok(None);
        }
        Err(InventoryError::RetriesExhausted {
            session_type: session_type.to_string(),
        })
    }

    fn count_mismatch(&self, batch_id: Uuid, remaining: i64, available: i64) -> InventoryError {
        tracing::error!(%batch_id, remaining, available, "Certificate batch counter disagrees with stock");
        InventoryError::CountMismatch {
            batch_id,
            remaining,
            available,
        }
    }
}
