use std::collections::BTreeSet;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use sqlx::types::Uuid;
use time::OffsetDateTime;
use validator::Validate;

/// A capability a user may hold. Users can hold several at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Instructor,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleSet(BTreeSet<Role>);

impl RoleSet {
    pub fn new(roles: impl IntoIterator<Item = Role>) -> Self {
        Self(roles.into_iter().collect())
    }

    pub fn from_flags(is_admin: bool, is_instructor: bool) -> Self {
        let mut roles = Self::default();
        roles.set(Role::Admin, is_admin);
        roles.set(Role::Instructor, is_instructor);
        roles
    }

    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    pub fn set(&mut self, role: Role, granted: bool) {
        if granted {
            self.0.insert(role);
        } else {
            self.0.remove(&role);
        }
    }

    pub fn is_admin(&self) -> bool {
        self.contains(Role::Admin)
    }

    pub fn is_instructor(&self) -> bool {
        self.contains(Role::Instructor)
    }

    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        self.0.iter().copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "user_status", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    Active,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub roles: RoleSet,
    pub instructor_certificate_number: Option<String>,
    pub phone: Option<String>,
    pub status: UserStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login: Option<OffsetDateTime>,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}

/// Storage shape of a user: roles are kept as independent flag columns.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub is_instructor: bool,
    pub instructor_certificate_number: Option<String>,
    pub phone: Option<String>,
    pub status: UserStatus,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub last_login: Option<OffsetDateTime>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            company_id: row.company_id,
            name: row.name,
            email: row.email,
            password_hash: row.password_hash,
            roles: RoleSet::from_flags(row.is_admin, row.is_instructor),
            instructor_certificate_number: row.instructor_certificate_number,
            phone: row.phone,
            status: row.status,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_login: row.last_login,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Validate)]
pub struct NewUser {
    #[validate(length(min = 1, message = "Name must not be empty"))]
    pub name: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    pub password: SecretString,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default = "default_true")]
    pub is_instructor: bool,
    pub instructor_certificate_number: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateUser {
    #[validate(length(min = 1, message = "Name must not be empty"))]
    pub name: Option<String>,
    pub phone: Option<String>,
    pub instructor_certificate_number: Option<String>,
    pub status: Option<UserStatus>,
    pub is_admin: Option<bool>,
    pub is_instructor: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UserLogin {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    pub password: SecretString,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_flags_are_independent() {
        let both = RoleSet::from_flags(true, true);
        assert!(both.is_admin() && both.is_instructor());

        let mut roles = RoleSet::from_flags(false, true);
        assert!(!roles.is_admin());
        roles.set(Role::Admin, true);
        roles.set(Role::Instructor, false);
        assert_eq!(roles.iter().collect::<Vec<_>>(), vec![Role::Admin]);
    }

    #[test]
    fn password_hash_is_never_serialized() {
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::now_v7(),
            company_id: Uuid::now_v7(),
            name: "Ann".into(),
            email: "ann@example.com".into(),
            password_hash: "$argon2id$secret".into(),
            roles: RoleSet::new([Role::Instructor]),
            instructor_certificate_number: None,
            phone: None,
            status: UserStatus::Active,
            created_at: now,
            updated_at: now,
            last_login: None,
        };

        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["roles"], serde_json::json!(["instructor"]));
        assert_eq!(json["status"], "ACTIVE");
    }
}
