//! Error types shared by every lxbox module.

use thiserror::Error;

use crate::config::validator::ValidationError;

/// Result alias used throughout the crate.
pub type LxboxResult<T> = Result<T, LxboxError>;

/// Errors returned by the container lifecycle core.
///
/// Grouped by how callers are expected to react:
/// - `Validation`, `Config`, `InvalidArgument`: user input, not retried
/// - `StorageDiscovery`: a persisted container can't be managed (load aborts)
/// - `Database`, `Serialization`: unexpected, fatal to the call
/// - `Network`: only ever logged by the create pipeline
#[derive(Debug, Error)]
pub enum LxboxError {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Config or device policy violation.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// No storage backend claims a container's on-disk path.
    #[error("storage discovery failed: {0}")]
    StorageDiscovery(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl From<rusqlite::Error> for LxboxError {
    fn from(err: rusqlite::Error) -> Self {
        LxboxError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for LxboxError {
    fn from(err: serde_json::Error) -> Self {
        LxboxError::Serialization(err.to_string())
    }
}

impl LxboxError {
    /// True for errors caused by config or device policy checks.
    pub fn is_validation(&self) -> bool {
        matches!(self, LxboxError::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_wraps() {
        let err: LxboxError = ValidationError::UnknownKey("foo".into()).into();
        assert!(err.is_validation());
        assert!(err.to_string().contains("foo"));
    }

    #[test]
    fn test_json_error_is_serialization() {
        let json_err = serde_json::from_str::<Vec<u32>>("{").unwrap_err();
        let err: LxboxError = json_err.into();
        assert!(matches!(err, LxboxError::Serialization(_)));
    }
}
