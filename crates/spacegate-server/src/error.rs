//! Server error types.

use spacegate_protocol::jsonrpc::JsonRpcError;
use spacegate_protocol::GatewayErrorCode;
use thiserror::Error;

/// Result alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors raised while assembling or driving a scoped server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A tool handler failed in a way that should surface as a tool result
    /// (`isError: true`), not as a protocol error.
    #[error("{0}")]
    Tool(String),

    /// The request was rejected at the protocol level.
    #[error("protocol error: {0}")]
    Protocol(JsonRpcError),

    /// Assembly of the scoped server failed.
    #[error("server construction failed: {0}")]
    Construction(String),

    /// Anything unexpected.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// A tool-surface failure.
    pub fn tool(message: impl Into<String>) -> Self {
        Self::Tool(message.into())
    }

    /// Map onto the shared wire vocabulary.
    pub fn to_json_rpc(&self) -> JsonRpcError {
        match self {
            Self::Protocol(e) => e.clone(),
            Self::Tool(message) => GatewayErrorCode::InternalError.with_message(message.clone()),
            Self::Construction(message) | Self::Internal(message) => {
                GatewayErrorCode::InternalError.with_message(message.clone())
            }
        }
    }
}

impl From<JsonRpcError> for ServerError {
    fn from(e: JsonRpcError) -> Self {
        Self::Protocol(e)
    }
}
