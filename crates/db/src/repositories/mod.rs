use thiserror::Error;

use warden_core::errors::StoreError;

pub mod agent;
pub mod audit;
pub mod counter;

pub use agent::SqlAgentRepository;
pub use audit::SqlAuditSink;
pub use counter::SqlCounterStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                StoreError::Conflict(db.to_string())
            }
            RepositoryError::Database(source) => StoreError::Unavailable(source.to_string()),
            RepositoryError::Decode(message) => StoreError::Decode(message),
        }
    }
}

pub(crate) fn decode_err(error: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}
