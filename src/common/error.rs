//! # Upload Error Taxonomy
//!
//! Every way a submitted capture can fail on the server side, with the HTTP
//! status and the public message the endpoint answers with. Client-side
//! delivery failures live in [`crate::client::client::DeliveryError`].

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploadError {
    /// The request body is not JSON or has no string `image` field.
    #[error("invalid input data")]
    InvalidInput,

    /// The encoded string does not match `data:image/<tag>;base64,<payload>`
    /// or the payload is not valid base64.
    #[error("malformed encoding: {0}")]
    MalformedEncoding(String),

    /// The sniffed type is not in the allow-list.
    #[error("invalid format: detected {detected}")]
    InvalidFormat { detected: &'static str },

    /// The decoded payload is larger than the configured maximum.
    #[error("payload too large: {size} bytes exceeds {max} bytes")]
    TooLarge { size: usize, max: usize },

    /// Writing to the storage directory failed.
    #[error("persistence failure: {0}")]
    PersistenceFailure(#[from] std::io::Error),
}

impl UploadError {
    /// HTTP status the endpoint answers with for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            UploadError::PersistenceFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Message returned to the caller. Internal details stay in the logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            UploadError::InvalidInput => "Invalid input data.",
            UploadError::MalformedEncoding(_) => "Invalid image format.",
            UploadError::InvalidFormat { .. } => "Invalid file type detected.",
            UploadError::TooLarge { .. } => "Image too large.",
            UploadError::PersistenceFailure(_) => "Internal Server Error",
        }
    }

    /// Short classification used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::InvalidInput => "InvalidInput",
            UploadError::MalformedEncoding(_) => "MalformedEncoding",
            UploadError::InvalidFormat { .. } => "InvalidFormat",
            UploadError::TooLarge { .. } => "TooLarge",
            UploadError::PersistenceFailure(_) => "PersistenceFailure",
        }
    }
}
