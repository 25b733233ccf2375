//! Error types for the marginalia AI core.

use thiserror::Error;

use crate::models::SummaryStatus;

/// Result type alias using marginalia's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for marginalia operations.
///
/// The first four variants are the model-failure taxonomy: they are caught at
/// the job or pipeline boundary and turned into a status or result value.
/// Everything else is a programmer or infrastructure error.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport, auth, or quota failure from the model or search provider
    #[error("Service error: {0}")]
    Service(String),

    /// Provider answered but returned no usable content
    #[error("Empty result: {0}")]
    EmptyResult(String),

    /// Model output could not be repaired into the expected structure
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// File missing or empty on disk
    #[error("File unavailable: {0}")]
    FileUnavailable(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Status change not allowed by the summary lifecycle
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: SummaryStatus,
        to: SummaryStatus,
    },

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error belongs to the model-failure taxonomy that public
    /// operations convert into a non-throwing result.
    pub fn is_model_failure(&self) -> bool {
        matches!(
            self,
            Error::Service(_)
                | Error::EmptyResult(_)
                | Error::MalformedResponse(_)
                | Error::FileUnavailable(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Service(e.to_string())
    }
}
