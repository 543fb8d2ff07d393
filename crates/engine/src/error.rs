use fieldsync_core::{CoreError, RequestId, ValidationError};
use fieldsync_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("no request in flight with id {0}")]
    UnknownRequest(RequestId),
}

/// Why a field edit did not stick. Connectivity loss only shows up here as
/// `Unreachable` when the offline queue is disabled; otherwise the write is
/// queued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SaveError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("rejected by server: {0}")]
    Rejected(String),

    /// `quiet` marks access-policy denials, which hosts usually don't toast.
    #[error("save failed: {message}")]
    Server { message: String, quiet: bool },

    #[error("server unreachable: {0}")]
    Unreachable(String),
}
