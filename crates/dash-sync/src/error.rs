//! Fetch failure taxonomy.

/// Error type for fetch operations.
///
/// `Clone` because one failure is stored in the cache entry and delivered to
/// every consumer bound to the key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// HTTP error status from the resource server.
    #[error("HTTP error: {status} for {url}")]
    Http {
        /// Response status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// The fetch procedure timed out.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Connection-level failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// The response body could not be decoded.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Any other request failure.
    #[error("request error: {0}")]
    Request(String),
}

/// Result type for fetch operations.
pub type FetchResult<T> = Result<T, FetchError>;
