use thiserror::Error;

/// Message recorded when a backend error carries no text of its own.
pub const UNKNOWN_ERROR: &str = "An unknown error occurred";

/// Errors surfaced by the stores.
///
/// Precondition variants are raised before any backend call is made. The
/// remaining variants wrap a failure reported by an injected collaborator.
/// The type is `Clone` so a single coalesced write failure can be handed to
/// every caller that was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("connection params have not been set")]
    MissingParams,
    #[error("client is not ready; call set_params first")]
    ClientNotReady,
    #[error("no input has been provided")]
    MissingInput,
    #[error("connection params are empty")]
    BlankParams,
    #[error("no write function is configured")]
    WriteUnavailable,
    #[error("update requires both a write function and a merge function")]
    UpdateUnavailable,
    #[error("no data has been loaded to update")]
    NoData,
    #[error("failed to create client: {0}")]
    ClientFactory(String),
    #[error("{0}")]
    Backend(String),
    #[error("stream error: {0}")]
    Stream(String),
    #[error("write queue fault: {0}")]
    QueueFault(String),
    #[error("operation cancelled: {0}")]
    Cancelled(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl StoreError {
    /// Build a backend error from any displayable failure.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        StoreError::Backend(err.to_string())
    }

    /// The string stored in a snapshot's `error` / `write_error` field.
    pub fn user_message(&self) -> String {
        match self {
            StoreError::Backend(msg) | StoreError::Stream(msg) if msg.trim().is_empty() => {
                UNKNOWN_ERROR.to_string()
            }
            StoreError::Backend(msg) => msg.clone(),
            other => other.to_string(),
        }
    }

    /// Whether the error was raised by a precondition check rather than by
    /// a collaborator.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            StoreError::MissingParams
                | StoreError::ClientNotReady
                | StoreError::MissingInput
                | StoreError::BlankParams
                | StoreError::WriteUnavailable
                | StoreError::UpdateUnavailable
                | StoreError::NoData
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Config(err.to_string())
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
