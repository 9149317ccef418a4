use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};

use crate::config::BootstrapConfig;
use crate::db::{Company, NewUser, Store};
use crate::services::accounts::new_user;

/// Make sure the deployment has a company and, when credentials are
/// configured and the company has no active admin, a first admin account.
pub async fn ensure_company_and_admin(store: &dyn Store, config: &BootstrapConfig) -> Result<Company> {
    let mut tx = store.begin().await?;

    let company = match tx.first_company().await? {
        Some(company) => company,
        None => {
            let company = Company::new(config.company_name.clone());
            tx.insert_company(&company).await?;
            tracing::info!(company_id = %company.id, name = %company.name, "Created company");
            company
        }
    };

    if let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) {
        if tx.count_admins(company.id).await? == 0 {
            let admin = new_user(
                company.id,
                NewUser {
                    name: "Administrator".to_string(),
                    email: email.clone(),
                    password: SecretString::from(password.expose_secret().to_string()),
                    is_admin: true,
                    is_instructor: true,
                    instructor_certificate_number: None,
                    phone: None,
                },
            )
            .await
            .context("Invalid bootstrap admin credentials")?;
            tx.insert_user(&admin).await.context("Failed to create bootstrap admin")?;
            tracing::info!(user_id = %admin.id, email = %admin.email, "Created bootstrap admin");
        }
    }

    tx.commit().await?;
    Ok(company)
}
