use sqlx::{Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::error::DbResult;
use crate::db::models::{Company, User, UserRow, UserStatus};

const SELECT_USER: &str = r#"
    SELECT id, company_id, name, email, password_hash, is_admin, is_instructor,
           instructor_certificate_number, phone, status, created_at, updated_at, last_login
    FROM users
"#;

const SELECT_COMPANY: &str = r#"
    SELECT id, name, training_body_reference, address_line_1, address_line_2, city, county,
           postcode, phone, email, created_at, updated_at
    FROM companies
"#;

pub struct UserRepository;

impl UserRepository {
    pub async fn create_user(tx: &mut Transaction<'_, Postgres>, user: &User) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, company_id, name, email, password_hash, is_admin, is_instructor,
                               instructor_certificate_number, phone, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(user.id)
        .bind(user.company_id)
        .bind(&user.name)
        .bind(user.email.to_lowercase())
        .bind(&user.password_hash)
        .bind(user.roles.is_admin())
        .bind(user.roles.is_instructor())
        .bind(&user.instructor_certificate_number)
        .bind(&user.phone)
        .bind(user.status)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn get_user_by_id(tx: &mut Transaction<'_, Postgres>, user_id: Uuid) -> DbResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!("{SELECT_USER} WHERE id = $1"))
            .bind(user_id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.map(User::from))
    }

    pub async fn get_users_by_email(tx: &mut Transaction<'_, Postgres>, email: &str) -> DbResult<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "{SELECT_USER} WHERE lower(email) = lower($1) ORDER BY created_at"
        ))
        .bind(email)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    pub async fn update_user(tx: &mut Transaction<'_, Postgres>, user: &User) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET name = $1,
                phone = $2,
                instructor_certificate_number = $3,
                status = $4,
                is_admin = $5,
                is_instructor = $6,
                updated_at = NOW()
            WHERE id = $7
            "#,
        )
        .bind(&user.name)
        .bind(&user.phone)
        .bind(&user.instructor_certificate_number)
        .bind(user.status)
        .bind(user.roles.is_admin())
        .bind(user.roles.is_instructor())
        .bind(user.id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn touch_last_login(
        tx: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        at: OffsetDateTime,
    ) -> DbResult<()> {
        sqlx::query("UPDATE users SET last_login = $1 WHERE id = $2")
            .bind(at)
            .bind(user_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn list_users(tx: &mut Transaction<'_, Postgres>, company_id: Uuid) -> DbResult<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "{SELECT_USER} WHERE company_id = $1 ORDER BY created_at DESC"
        ))
        .bind(company_id)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    pub async fn count_admins(tx: &mut Transaction<'_, Postgres>, company_id: Uuid) -> DbResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM users WHERE company_id = $1 AND is_admin AND status = $2",
        )
        .bind(company_id)
        .bind(UserStatus::Active)
        .fetch_one(&mut **tx)
        .await?;
        Ok(count)
    }

    // Company profile
    pub async fn get_company(tx: &mut Transaction<'_, Postgres>, company_id: Uuid) -> DbResult<Option<Company>> {
        let company = sqlx::query_as::<_, Company>(&format!("{SELECT_COMPANY} WHERE id = $1"))
            .bind(company_id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(company)
    }

    pub async fn first_company(tx: &mut Transaction<'_, Postgres>) -> DbResult<Option<Company>> {
        let company = sqlx::query_as::<_, Company>(&format!("{SELECT_COMPANY} ORDER BY created_at LIMIT 1"))
            .fetch_optional(&mut **tx)
            .await?;
        Ok(company)
    }

    pub async fn create_company(tx: &mut Transaction<'_, Postgres>, company: &Company) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO companies (id, name, training_body_reference, address_line_1, address_line_2,
                                   city, county, postcode, phone, email, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(company.id)
        .bind(&company.name)
        .bind(&company.training_body_reference)
        .bind(&company.address_line_1)
        .bind(&company.address_line_2)
        .bind(&company.city)
        .bind(&company.county)
        .bind(&company.postcode)
        .bind(&company.phone)
        .bind(&company.email)
        .bind(company.created_at)
        .bind(company.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn update_company(tx: &mut Transaction<'_, Postgres>, company: &Company) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE companies
            SET name = $1,
                training_body_reference = $2,
                address_line_1 = $3,
                address_line_2 = $4,
                city = $5,
                county = $6,
                postcode = $7,
                phone = $8,
                email = $9,
                updated_at = NOW()
            WHERE id = $10
            "#,
        )
        .bind(&company.name)
        .bind(&company.training_body_reference)
        .bind(&company.address_line_1)
        .bind(&company.address_line_2)
        .bind(&company.city)
        .bind(&company.county)
        .bind(&company.postcode)
        .bind(&company.phone)
        .bind(&company.email)
        .bind(company.id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
