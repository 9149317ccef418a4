use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database error: {0}")]
    Sqlx(#[source] sqlx::Error),

    #[error("Record not found")]
    NotFound,

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Lock wait, serialization failure or deadlock; the whole transaction may be retried.
    #[error("Transaction contention: {0}")]
    Contention(String),

    #[error("Database connection error: {0}")]
    ConnectionError(String),

    #[error("Migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        DatabaseError::classify(err)
    }
}

impl DatabaseError {
    /// Map a driver error onto the cases callers branch on.
    pub fn classify(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound,
            sqlx::Error::PoolTimedOut => {
                DatabaseError::Contention("connection pool timed out".into())
            }
            sqlx::Error::PoolClosed => DatabaseError::ConnectionError("connection pool closed".into()),
            sqlx::Error::Io(io) => DatabaseError::ConnectionError(io.to_string()),
            sqlx::Error::Database(db) => {
                let code = db.code().map(|c| c.into_owned());
                match code.as_deref() {
                    // unique_violation, exclusion_violation
                    Some("23505") | Some("23P01") => {
                        DatabaseError::Duplicate(db.constraint().unwrap_or("unique").to_string())
                    }
                    // serialization_failure, deadlock_detected, lock_not_available, query_canceled
                    Some("40001") | Some("40P01") | Some("55P03") | Some("57014") => {
                        DatabaseError::Contention(db.message().to_string())
                    }
                    // check_violation, foreign_key_violation, not_null_violation
                    Some("23514") | Some("23503") | Some("23502") => {
                        DatabaseError::InvalidInput(db.message().to_string())
                    }
                    _ => DatabaseError::Sqlx(sqlx::Error::Database(db)),
                }
            }
            other => DatabaseError::Sqlx(other),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, DatabaseError::Contention(_))
    }
}

pub type DbResult<T> = Result<T, DatabaseError>;
