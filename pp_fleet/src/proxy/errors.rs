//! Error types for proxy pool operations.

use thiserror::Error;

/// Result type for proxy pool operations
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Proxy pool errors
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Proxy URL was empty or unusable
    #[error("Invalid proxy url: {0:?}")]
    InvalidUrl(String),
}
