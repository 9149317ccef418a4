mod error;
mod memory;
mod models;
mod repositories;
mod store;

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::DatabaseConfig;

pub use error::{DatabaseError, DbResult};
pub use memory::{MemoryStore, MemoryTx};
pub use models::*;
pub use repositories::{CertificateRepository, PgStore, PgTx, SessionRepository, UserRepository};
pub use store::{Store, StoreTx};

/// Initialize the database connection pool and bring the schema up to date.
pub async fn init_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(&config.url)
        .await
        .context("Failed to connect to the database")?;

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    Ok(pool)
}
