use thiserror::Error;

use crate::validation::ValidationError;

/// Errors surfaced by the permission engine.
///
/// `Clone` because a failed cache build is handed to every caller that was
/// waiting on the same key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Context calculation failed: {0}")]
    ContextCalculation(String),

    #[error("Holder unloaded: {0}")]
    HolderUnloaded(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::sync::Arc<Error>> for Error {
    fn from(err: std::sync::Arc<Error>) -> Self {
        std::sync::Arc::unwrap_or_clone(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
