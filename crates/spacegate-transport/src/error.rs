//! Transport error types.

use thiserror::Error;

/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors from transport lifecycle and I/O.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Binding or serving a listener failed.
    #[error("bind failed on {addr}: {source}")]
    Bind {
        /// Address that could not be bound.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// stdin/stdout I/O failed.
    #[error("stdio transport: {0}")]
    Stdio(#[from] std::io::Error),

    /// The transport is already draining.
    #[error("transport is shutting down")]
    ShuttingDown,

    /// Anything unexpected.
    #[error("transport internal error: {0}")]
    Internal(String),
}
