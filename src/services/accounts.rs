use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;
use validator::Validate;

use super::{retry_contended, GateError, Principal, Retryable};
use crate::db::{
    Company, DatabaseError, NewUser, RoleSet, Role, Store, UpdateCompany, UpdateUser, User, UserLogin,
    UserStatus,
};
use crate::security::{hash_password, verify_password, PasswordError, TokenError, TokenService};

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum AccountError {
    #[error(transparent)]
    Gate(#[from] GateError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Incorrect email or password")]
    InvalidCredentials,

    #[error("A user with email {0} already exists")]
    DuplicateEmail(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error(transparent)]
    Password(#[from] PasswordError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("Background task failed: {0}")]
    Background(String),

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

impl Retryable for AccountError {
    fn is_retryable(&self) -> bool {
        match self {
            AccountError::Store(err) | AccountError::Gate(GateError::Store(err)) => err.is_retryable(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub user: User,
}

#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn Store>,
    tokens: Arc<TokenService>,
    max_tx_attempts: u32,
}

impl AccountService {
    pub fn new(store: Arc<dyn Store>, tokens: Arc<TokenService>, max_tx_attempts: u32) -> Self {
        Self {
            store,
            tokens,
            max_tx_attempts: max_tx_attempts.max(1),
        }
    }

    fn respond(&self, user: User) -> Result<AuthResponse, AccountError> {
        Ok(AuthResponse {
            access_token: self.tokens.issue(user.id)?,
            token_type: "bearer",
            user,
        })
    }

    /// Create a user in the caller's company.
    pub async fn register(&self, principal: &Principal, input: NewUser) -> Result<AuthResponse, AccountError> {
        principal.require_admin()?;
        input.validate().map_err(|e| AccountError::Validation(e.to_string()))?;
        let user = new_user(principal.company_id, input).await?;

        let mut tx = self.store.begin().await?;
        tx.insert_user(&user).await.map_err(|err| match err {
            DatabaseError::Duplicate(_) => AccountError::DuplicateEmail(user.email.clone()),
            other => AccountError::Store(other),
        })?;
        let user = tx.find_user(user.id).await?.ok_or(AccountError::NotFound("User"))?;
        tx.commit().await?;

        tracing::info!(user_id = %user.id, registered_by = %principal.user_id, "User registered");
        self.respond(user)
    }

    /// Exchange email and password for a token. Only ACTIVE users can log in;
    /// every failure reads the same to the caller.
    pub async fn login(&self, input: UserLogin) -> Result<AuthResponse, AccountError> {
        input.validate().map_err(|_| AccountError::InvalidCredentials)?;

        let mut tx = self.store.begin().await?;
        let candidates: Vec<User> = tx
            .find_users_by_email(&input.email)
            .await?
            .into_iter()
            .filter(User::is_active)
            .collect();
        tx.commit().await?;

        let password = input.password;
        let matched = tokio::task::spawn_blocking(move || {
            candidates
                .into_iter()
                .find(|user| verify_password(&user.password_hash, &password))
        })
        .await
        .map_err(|e| AccountError::Background(e.to_string()))?;

        let Some(mut user) = matched else {
            tracing::info!("Rejected login attempt");
            return Err(AccountError::InvalidCredentials);
        };

        let now = OffsetDateTime::now_utc();
        let user_id = user.id;
        retry_contended("record_login", self.max_tx_attempts, || async move {
            let mut tx = self.store.begin().await?;
            tx.record_login(user_id, now).await?;
            tx.commit().await?;
            Ok::<_, AccountError>(())
        })
        .await?;
        user.last_login = Some(now);

        tracing::info!(user_id = %user.id, "User logged in");
        self.respond(user)
    }

    pub async fn me(&self, principal: &Principal) -> Result<User, AccountError> {
        let mut tx = self.store.begin().await?;
        let user = tx.find_user(principal.user_id).await?.ok_or(AccountError::NotFound("User"))?;
        tx.commit().await?;
        Ok(user)
    }

    pub async fn list_users(&self, principal: &Principal) -> Result<Vec<User>, AccountError> {
        principal.require_admin()?;
        let mut tx = self.store.begin().await?;
        let users = tx.list_users(principal.company_id).await?;
        tx.commit().await?;
        Ok(users)
    }

    /// Admin edit of another user. An admin cannot disable or demote themselves.
    pub async fn update_user(
        &self,
        principal: &Principal,
        user_id: Uuid,
        input: UpdateUser,
    ) -> Result<User, AccountError> {
        principal.require_admin()?;
        input.validate().map_err(|e| AccountError::Validation(e.to_string()))?;
        if user_id == principal.user_id
            && (input.status == Some(UserStatus::Disabled) || input.is_admin == Some(false))
        {
            return Err(AccountError::Validation("Admins cannot disable or demote themselves".into()));
        }
        let input = &input;

        let user = retry_contended("update_user", self.max_tx_attempts, || async move {
            let mut tx = self.store.begin().await?;
            let mut user = tx
                .find_user(user_id)
                .await?
                .filter(|u| u.company_id == principal.company_id)
                .ok_or(AccountError::NotFound("User"))?;
            apply_user_update(&mut user, input);
            tx.update_user(&user).await?;
            let user = tx.find_user(user.id).await?.ok_or(AccountError::NotFound("User"))?;
            tx.commit().await?;
            Ok::<_, AccountError>(user)
        })
        .await?;

        tracing::info!(user_id = %user.id, updated_by = %principal.user_id, status = ?user.status, "User updated");
        Ok(user)
    }

    pub async fn company(&self, principal: &Principal) -> Result<Company, AccountError> {
        let mut tx = self.store.begin().await?;
        let company = tx
            .find_company(principal.company_id)
            .await?
            .ok_or(AccountError::NotFound("Company"))?;
        tx.commit().await?;
        Ok(company)
    }

    pub async fn update_company(&self, principal: &Principal, input: UpdateCompany) -> Result<Company, AccountError> {
        principal.require_admin()?;
        input.validate().map_err(|e| AccountError::Validation(e.to_string()))?;

        let mut tx = self.store.begin().await?;
        let mut company = tx
            .find_company(principal.company_id)
            .await?
            .ok_or(AccountError::NotFound("Company"))?;
        company.apply(input);
        tx.update_company(&company).await?;
        tx.commit().await?;

        tracing::info!(company_id = %company.id, "Company profile updated");
        Ok(company)
    }
}

fn apply_user_update(user: &mut User, input: &UpdateUser) {
    if let Some(name) = &input.name {
        user.name = name.clone();
    }
    if input.phone.is_some() {
        user.phone = input.phone.clone();
    }
    if input.instructor_certificate_number.is_some() {
        user.instructor_certificate_number = input.instructor_certificate_number.clone();
    }
    if let Some(status) = input.status {
        user.status = status;
    }
    if let Some(is_admin) = input.is_admin {
        user.roles.set(Role::Admin, is_admin);
    }
    if let Some(is_instructor) = input.is_instructor {
        user.roles.set(Role::Instructor, is_instructor);
    }
}

/// Build a fresh ACTIVE user, hashing the password off the async runtime.
pub(crate) async fn new_user(company_id: Uuid, input: NewUser) -> Result<User, AccountError> {
    if input.password.expose_secret().chars().count() < MIN_PASSWORD_LEN {
        return Err(AccountError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    let password: SecretString = input.password;
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| AccountError::Background(e.to_string()))??;

    let now = OffsetDateTime::now_utc();
    Ok(User {
        id: Uuid::now_v7(),
        company_id,
        name: input.name,
        email: input.email.to_lowercase(),
        password_hash,
        roles: RoleSet::from_flags(input.is_admin, input.is_instructor),
        instructor_certificate_number: input.instructor_certificate_number,
        phone: input.phone,
        status: UserStatus::Active,
        created_at: now,
        updated_at: now,
        last_login: None,
    })
}
