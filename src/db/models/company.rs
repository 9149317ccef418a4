use serde::{Deserialize, Serialize};
use sqlx::types::Uuid;
use time::OffsetDateTime;
use validator::Validate;

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub training_body_reference: Option<String>,
    pub address_line_1: Option<String>,
    pub address_line_2: Option<String>,
    pub city: Option<String>,
    pub county: Option<String>,
    pub postcode: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Company {
    pub fn new(name: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            training_body_reference: None,
            address_line_1: None,
            address_line_2: None,
            city: None,
            county: None,
            postcode: None,
            phone: None,
            email: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a partial profile update; absent fields are left untouched.
    pub fn apply(&mut self, update: UpdateCompany) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if update.training_body_reference.is_some() {
            self.training_body_reference = update.training_body_reference;
        }
        if update.address_line_1.is_some() {
            self.address_line_1 = update.address_line_1;
        }
        if update.address_line_2.is_some() {
            self.address_line_2 = update.address_line_2;
        }
        if update.city.is_some() {
            self.city = update.city;
        }
        if update.county.is_some() {
            self.county = update.county;
        }
        if update.postcode.is_some() {
            self.postcode = update.postcode;
        }
        if update.phone.is_some() {
            self.phone = update.phone;
        }
        if update.email.is_some() {
            self.email = update.email;
        }
        self.updated_at = OffsetDateTime::now_utc();
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateCompany {
    #[validate(length(min = 1, message = "Company name must not be empty"))]
    pub name: Option<String>,
    pub training_body_reference: Option<String>,
    pub address_line_1: Option<String>,
    pub address_line_2: Option<String>,
    pub city: Option<String>,
    pub county: Option<String>,
    pub postcode: Option<String>,
    pub phone: Option<String>,
    #[validate(email(message = "Invalid email address"))]
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_only_touches_supplied_fields() {
        let mut company = Company::new("Rider Training");
        company.city = Some("Leeds".into());

        company.apply(UpdateCompany {
            postcode: Some("LS1 1AA".into()),
            ..Default::default()
        });

        assert_eq!(company.name, "Rider Training");
        assert_eq!(company.city.as_deref(), Some("Leeds"));
        assert_eq!(company.postcode.as_deref(), Some("LS1 1AA"));
    }
}
