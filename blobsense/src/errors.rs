use crate::provider::ProviderError;
use crate::storage::StorageError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Invalid request data
    #[error("{message}")]
    BadRequest { message: String },

    /// Caller presented a missing, invalid or insufficient upload token
    #[error("{message}")]
    Forbidden { message: String },

    /// Request body exceeds the configured upload limit
    #[error("{message}")]
    PayloadTooLarge { message: String },

    /// Resolved content type has no analysis mode
    #[error("File type {content_type} is not supported for analysis. Supported types: images and text files.")]
    UnsupportedType { content_type: String },

    /// Target file unreachable, metadata unobtainable, or an empty body where one was mandatory
    #[error("{message}")]
    Resolution { message: String },

    /// Completion provider rejected or failed a submission
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Object storage operation error
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Configuration is inconsistent or incomplete
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest { .. } | Error::UnsupportedType { .. } => StatusCode::BAD_REQUEST,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::Storage(storage_err) => match storage_err {
                StorageError::NotFound { .. } => StatusCode::NOT_FOUND,
                StorageError::InvalidPathname { .. } => StatusCode::BAD_REQUEST,
                StorageError::Io(_) | StorageError::Metadata(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Resolution { .. } | Error::Provider(_) | Error::InvalidConfig { .. } | Error::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the message placed in the JSON error body.
    ///
    /// Analysis failures carry their detail through, prefixed the way the upload page expects.
    pub fn user_message(&self) -> String {
        match self {
            Error::Resolution { message } => format!("Error with OpenAI analysis: {message}"),
            Error::Provider(provider_err) => format!("Error with OpenAI analysis: {provider_err}"),
            Error::Storage(storage_err) => storage_err.to_string(),
            Error::InvalidConfig { .. } | Error::Other(_) => "Internal server error".to_string(),
            Error::BadRequest { .. } | Error::Forbidden { .. } | Error::PayloadTooLarge { .. } | Error::UnsupportedType { .. } => {
                self.to_string()
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Other(_) | Error::InvalidConfig { .. } => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Resolution { .. } | Error::Provider(_) => {
                tracing::error!("Analysis failed: {}", self);
            }
            Error::Storage(StorageError::NotFound { .. } | StorageError::InvalidPathname { .. }) => {
                tracing::debug!("Storage client error: {}", self);
            }
            Error::Storage(_) => {
                tracing::error!("Storage error: {}", self);
            }
            Error::Forbidden { .. } => {
                tracing::info!("Upload authorization error: {}", self);
            }
            Error::BadRequest { .. } | Error::PayloadTooLarge { .. } | Error::UnsupportedType { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        (status, Json(json!({ "message": self.user_message() }))).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
