use thiserror::Error;

/// Errors from the storage collaborator (key/value, set, and counter operations).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("entry not found: {0}")]
    NotFound(String),
}

/// A state definition named a type the interpreter does not know.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown state type: '{0}'")]
pub struct UnknownStateType(pub String);
