//! # Spacegate Server
//!
//! The scoped MCP server: a per-connection (stateful) or per-request
//! (stateless) assembly of tools behind a JSON-RPC router.
//!
//! A scoped server is cheap to construct: tool descriptors are built once
//! by the application and registration only wires enable/disable flags and
//! handler references per instance. Transports drive it through
//! [`router::McpRouter::handle_value`], which accepts and returns raw JSON
//! so every transport shares one dispatch path.

#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![deny(unsafe_code)]

pub mod capabilities;
pub mod context;
pub mod error;
pub mod handler;
pub mod registry;
pub mod router;

pub use context::{AuthState, RequestContext};
pub use error::{ServerError, ServerResult};
pub use handler::{FnTool, ToolHandler};
pub use registry::ToolRegistry;
pub use router::McpRouter;
