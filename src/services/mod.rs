//! Core domain services. Each runs its operations as store transactions and
//! knows nothing about HTTP.

pub mod access;
pub mod accounts;
pub mod biometric;
pub mod face_engine;
pub mod inventory;
pub mod sessions;

use std::future::Future;

pub use access::{GateError, IdentityGate, Principal};
pub use accounts::{AccountError, AccountService, AuthResponse};
pub use biometric::{
    BiometricError, EngineError, FaceBox, FaceEngine, FaceMatcher, MatchConfidence, MatchResult, PhotoSide,
};
pub use face_engine::{RemoteFaceEngine, UnavailableFaceEngine};
pub use inventory::{InventoryEngine, InventoryError, ReceivedBatch};
pub use sessions::{SessionError, SessionTracker};

/// Errors that may clear up if the whole transaction is run again.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Run a transactional operation, repeating it from scratch while the store
/// reports contention, up to `max_attempts` runs in total.
pub(crate) async fn retry_contended<T, E, F, Fut>(operation: &'static str, max_attempts: u32, mut run: F) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match run().await {
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                tracing::warn!(operation, attempt, error = %err, "Transaction contended, retrying");
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Flaky(bool);

    impl std::fmt::Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky({})", self.0)
        }
    }

    impl Retryable for Flaky {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    #[tokio::test]
    async fn contention_is_retried_up_to_the_limit() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Flaky> = retry_contended("test", 3, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Flaky(true))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Flaky> = retry_contended("test", 3, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Flaky(false))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn success_after_contention() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, Flaky> = retry_contended("test", 3, || async {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err(Flaky(true)),
                n => Ok(n),
            }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
    }
}
