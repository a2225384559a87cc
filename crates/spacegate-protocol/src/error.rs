//! Shared gateway error vocabulary.
//!
//! Every transport maps its failures onto the same small set of JSON-RPC
//! error codes so clients see identical envelopes whether they arrived over
//! stdio, streaming HTTP, or the stateless JSON endpoint.

use serde_json::Value;
use thiserror::Error;

use crate::jsonrpc::JsonRpcError;

/// The JSON-RPC error codes the gateway emits.
///
/// Standard codes keep their JSON-RPC 2.0 values; gateway-specific
/// conditions use the implementation-defined `-32000` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorCode {
    /// Request body was not valid JSON (`-32700`).
    ParseError,
    /// Method exists but the parameters are unusable, including a missing
    /// session id on a transport that requires one (`-32602`).
    InvalidParams,
    /// Unknown method (`-32601`).
    MethodNotFound,
    /// Unexpected failure inside the gateway (`-32603`).
    InternalError,
    /// The gateway is draining and rejects new work (`-32000`).
    ServerShuttingDown,
    /// The presented session id is not (or no longer) tracked (`-32001`).
    SessionNotFound,
    /// The method is not applicable on this transport or in this mode
    /// (`-32002`).
    MethodNotAllowed,
}

impl GatewayErrorCode {
    /// Numeric wire code.
    pub fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidParams => -32602,
            Self::MethodNotFound => -32601,
            Self::InternalError => -32603,
            Self::ServerShuttingDown => -32000,
            Self::SessionNotFound => -32001,
            Self::MethodNotAllowed => -32002,
        }
    }

    /// Default message for the code.
    pub fn message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidParams => "Invalid params",
            Self::MethodNotFound => "Method not found",
            Self::InternalError => "Internal error",
            Self::ServerShuttingDown => "Server shutting down",
            Self::SessionNotFound => "Session not found",
            Self::MethodNotAllowed => "Method not allowed",
        }
    }

    /// Build the wire error object with the default message.
    pub fn to_error(self) -> JsonRpcError {
        JsonRpcError::new(self.code(), self.message())
    }

    /// Build the wire error object with a custom message.
    pub fn with_message(self, message: impl Into<String>) -> JsonRpcError {
        JsonRpcError::new(self.code(), message)
    }
}

impl From<GatewayErrorCode> for JsonRpcError {
    fn from(code: GatewayErrorCode) -> Self {
        code.to_error()
    }
}

/// Errors produced while handling protocol payloads.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The payload could not be deserialized into the expected shape.
    #[error("invalid {what}: {source}")]
    InvalidPayload {
        /// What was being parsed.
        what: &'static str,
        /// Underlying serde failure.
        #[source]
        source: serde_json::Error,
    },

    /// The client proposed a protocol revision the gateway cannot speak.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(String),
}

impl ProtocolError {
    /// Wrap a serde failure with the name of the payload being parsed.
    pub fn invalid(what: &'static str, source: serde_json::Error) -> Self {
        Self::InvalidPayload { what, source }
    }
}

/// Deserialize request params into a concrete type, mapping failures onto
/// `invalid_params`.
pub fn parse_params<T: serde::de::DeserializeOwned>(
    params: Option<Value>,
    what: &'static str,
) -> Result<T, JsonRpcError> {
    serde_json::from_value(params.unwrap_or(Value::Null)).map_err(|e| {
        GatewayErrorCode::InvalidParams.with_message(format!("invalid {what} params: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(GatewayErrorCode::ParseError.code(), -32700);
        assert_eq!(GatewayErrorCode::InvalidParams.code(), -32602);
        assert_eq!(GatewayErrorCode::MethodNotFound.code(), -32601);
        assert_eq!(GatewayErrorCode::InternalError.code(), -32603);
        assert_eq!(GatewayErrorCode::ServerShuttingDown.code(), -32000);
        assert_eq!(GatewayErrorCode::SessionNotFound.code(), -32001);
        assert_eq!(GatewayErrorCode::MethodNotAllowed.code(), -32002);
    }

    #[test]
    fn parse_params_maps_to_invalid_params() {
        #[derive(serde::Deserialize)]
        struct P {
            #[allow(dead_code)]
            name: String,
        }
        let err = parse_params::<P>(Some(serde_json::json!({"nope": 1})), "tools/call")
            .err()
            .unwrap();
        assert_eq!(err.code, GatewayErrorCode::InvalidParams.code());
        assert!(err.message.contains("tools/call"));
    }

    #[test]
    fn parse_params_accepts_valid_shape() {
        #[derive(serde::Deserialize)]
        struct P {
            name: String,
        }
        let p = parse_params::<P>(Some(serde_json::json!({"name": "x"})), "test").unwrap();
        assert_eq!(p.name, "x");
    }
}
