//! # Spacegate Protocol
//!
//! JSON-RPC 2.0 envelope and MCP wire types shared by every spacegate crate.
//!
//! The gateway speaks one wire format on every transport: single (non-batch)
//! JSON-RPC 2.0 messages carrying MCP payloads. This crate is the source of
//! truth for that format:
//!
//! - [`jsonrpc`]: request/response/notification envelope with the null-id
//!   parse-error special case
//! - [`types`]: the MCP payload types the gateway produces and consumes
//!   (initialize, tools, content blocks, progress)
//! - [`error`]: the shared gateway error vocabulary mapped onto JSON-RPC
//!   error codes

#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![deny(unsafe_code)]

pub mod error;
pub mod jsonrpc;
pub mod types;

pub use error::{GatewayErrorCode, ProtocolError};
pub use jsonrpc::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    JsonRpcVersion, ResponseId,
};
pub use types::{
    CallToolParams, CallToolResult, ClientCapabilities, Content, Implementation, InitializeParams,
    InitializeResult, ListToolsResult, ProgressParams, RequestId, ServerCapabilities, TextContent,
    Tool,
};

/// MCP protocol revision the gateway negotiates by default.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// Older protocol revisions the gateway still accepts on initialize.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];
