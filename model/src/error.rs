pub use sea_orm::error::DbErr;

pub type Result<T> = std::result::Result<T, Error>;

/// Persistence-layer failures: database errors, plus the field-level checks
/// run before federation data is written (worker broadcasts, mining pool
/// registrations).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error("Validation failed: {errors:?}")]
    Validation { errors: Vec<ValidationError> },
}

impl Error {
    /// Single-field validation failure, e.g. an empty mining pool url.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            errors: vec![ValidationError::new(field, message)],
        }
    }
}

/// One rejected field and why it was rejected.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}
