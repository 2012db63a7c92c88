//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("corrupt row: {0}")]
    Decode(String),
}

impl DbError {
    pub fn job_not_found(id: gamegen_core::JobId) -> Self {
        Self::NotFound(format!("job {id}"))
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;
