//! Error taxonomy for keyshelf operations

use thiserror::Error;

use crate::backend::StoreError;

/// Errors surfaced by the credential service and its collaborators
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid {field}: {reason}")]
    InvalidKey { field: &'static str, reason: String },

    #[error("Corrupt storage key '{key}': {reason}")]
    CorruptKey { key: String, reason: String },

    #[error("No usable secret store: {0}")]
    BackendUnavailable(String),

    #[error("Access to the secret store was denied: {0}")]
    AccessDenied(String),

    #[error("No credential found for {0}")]
    NotFound(String),

    #[error("Credential already exists for {0}")]
    AlreadyExists(String),

    #[error("Cannot list credentials: {0}")]
    EnumerationUnsupported(String),

    #[error("Secret store error: {0}")]
    Store(String),

    #[error("Index error: {0}")]
    Index(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => Error::BackendUnavailable(msg),
            StoreError::AccessDenied(msg) => Error::AccessDenied(msg),
            StoreError::Io(e) => Error::Store(e.to_string()),
            StoreError::Backend(msg) => Error::Store(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_mapping() {
        let err: Error = StoreError::Unavailable("no daemon".into()).into();
        assert!(matches!(err, Error::BackendUnavailable(_)));

        let err: Error = StoreError::AccessDenied("user cancelled".into()).into();
        assert!(matches!(err, Error::AccessDenied(_)));

        let err: Error = StoreError::Io(std::io::Error::other("disk")).into();
        assert!(matches!(err, Error::Store(ref msg) if msg == "disk"));
    }
}
