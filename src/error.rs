//! Error taxonomy for the capture-and-ingestion pipeline
//!
//! Every fallible operation in the store, the storage resolver and the
//! ingestion transport returns [`Error`]. The HTTP layer maps each variant to
//! a status code (see `http::errors`).

use thiserror::Error;

/// Why a principal could not be authenticated or authorized
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("No token provided")]
    MissingToken,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Not authorized: {0}")]
    Forbidden(String),
}

/// Application-wide error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// The artifact is on disk but its metadata record was not persisted.
    /// Retry metadata submission against `file_name` instead of re-uploading.
    #[error("Artifact {file_name} stored but metadata was not persisted: {source}")]
    PartialIngestion {
        file_name: String,
        #[source]
        source: Box<Error>,
    },

    #[error(transparent)]
    Server(#[from] anyhow::Error),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Auth(AuthError::Forbidden(message.into()))
    }

    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Conflict(_) => "CONFLICT",
            Error::Auth(_) => "AUTH_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::PartialIngestion { .. } => "PARTIAL_INGESTION",
            Error::Server(_) => "SERVER_ERROR",
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(error: rusqlite::Error) -> Self {
        Error::Server(anyhow::Error::new(error).context("Database error"))
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Server(anyhow::Error::new(error).context("I/O error"))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(error: tokio::task::JoinError) -> Self {
        Error::Server(anyhow::Error::new(error).context("Background task failed"))
    }
}

/// Result type alias using [`Error`]
pub type Result<T> = std::result::Result<T, Error>;
