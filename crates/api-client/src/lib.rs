//! Remote API client for the convention backend
//!
//! This crate provides the wire types of the synchronization endpoint, the
//! entity records it delivers, and an HTTP client implementing [`SyncApi`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod types;

pub use client::{ApiClient, ApiClientConfig, SyncApi};
pub use types::*;

/// Result type for API operations
pub type Result<T> = std::result::Result<T, ApiError>;

/// Error types for API operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The request never produced a response
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with a non-success status
    #[error("API error ({status}): {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, as text
        body: String,
    },

    /// The server answered with something other than JSON
    #[error("Unexpected content type: {0}")]
    ContentType(String),

    /// The body could not be read or decoded
    #[error("Parse error: {0}")]
    Parse(String),
}

impl ApiError {
    /// Check if this error is likely transient and worth retrying later
    ///
    /// Transient statuses: 408, 425, 429, 500, 502, 503, 504, 522, 524
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Network(_) => true,
            ApiError::Status { status, .. } => {
                matches!(status, 408 | 425 | 429 | 500 | 502 | 503 | 504 | 522 | 524)
            }
            ApiError::ContentType(_) | ApiError::Parse(_) => false,
        }
    }
}
