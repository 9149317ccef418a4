//! Resolves bearer tokens to principals and checks role requirements.

use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::db::{DatabaseError, RoleSet, Store, StoreTx, TrainingSession};
use crate::security::{TokenError, TokenService};

/// The authenticated caller of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub company_id: Uuid,
    pub roles: RoleSet,
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("Missing, invalid or expired credentials")]
    Unauthenticated,

    #[error("User no longer exists")]
    UserNotFound,

    #[error("{0} role required")]
    Forbidden(&'static str),

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

impl From<TokenError> for GateError {
    fn from(_: TokenError) -> Self {
        GateError::Unauthenticated
    }
}

impl Principal {
    pub fn require_admin(&self) -> Result<(), GateError> {
        if self.roles.is_admin() {
            Ok(())
        } else {
            Err(GateError::Forbidden("Admin"))
        }
    }

    pub fn require_instructor(&self) -> Result<(), GateError> {
        if self.roles.is_instructor() {
            Ok(())
        } else {
            Err(GateError::Forbidden("Instructor"))
        }
    }
}

/// Why a caller may not mutate a training session.
#[derive(Debug, Error)]
pub enum OwnershipError {
    #[error("Training session not found")]
    NotFound,

    #[error("Only the session's instructor may modify it")]
    NotOwner,

    #[error("Session {0} is already completed")]
    Closed(Uuid),

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

/// Load a session the caller may mutate: same company, owned by the caller, still open.
/// Sessions of other companies read as missing.
pub(crate) async fn open_owned_session(
    tx: &mut dyn StoreTx,
    principal: &Principal,
    session_id: Uuid,
) -> Result<TrainingSession, OwnershipError> {
    let session = tx
        .find_session(session_id)
        .await?
        .filter(|s| s.company_id == principal.company_id)
        .ok_or(OwnershipError::NotFound)?;
    if session.instructor_id != principal.user_id {
        return Err(OwnershipError::NotOwner);
    }
    if !session.is_open() {
        return Err(OwnershipError::Closed(session.id));
    }
    Ok(session)
}

#[derive(Clone)]
pub struct IdentityGate {
    store: Arc<dyn Store>,
    tokens: Arc<TokenService>,
}

impl IdentityGate {
    pub fn new(store: Arc<dyn Store>, tokens: Arc<TokenService>) -> Self {
        Self { store, tokens }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Verify a token and load its subject. Disabled users are treated as
    /// unauthenticated so their outstanding tokens stop working immediately.
    pub async fn resolve(&self, token: &str) -> Result<Principal, GateError> {
        let claims = self.tokens.verify(token)?;

        let mut tx = self.store.begin().await?;
        let user = tx.find_user(claims.sub).await?.ok_or(GateError::UserNotFound)?;
        tx.commit().await?;

        if !user.is_active() {
            tracing::debug!(user_id = %user.id, "Rejected token for disabled user");
            return Err(GateError::Unauthenticated);
        }

        Ok(Principal {
            user_id: user.id,
            company_id: user.company_id,
            roles: user.roles,
        })
    }
}
