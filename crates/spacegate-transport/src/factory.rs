//! The server-factory seam between transports and the application.
//!
//! Transports know how to accept traffic; the application knows how to
//! assemble a tool surface. [`McpServerFactory`] is the boundary: for every
//! logical connection (stateful) or request (stateless) the transport asks
//! the factory for a scoped server, passing the normalized headers and the
//! already-computed authorization outcome so the token is validated exactly
//! once per request.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use spacegate_server::{AuthState, McpRouter, ServerResult};

/// Which transport is asking for a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Stateful streaming HTTP.
    StreamableHttp,
    /// Stateless JSON-RPC.
    StatelessJson,
    /// Newline-delimited stdio.
    Stdio,
}

/// Everything the factory needs to scope one server.
#[derive(Debug, Clone)]
pub struct FactoryRequest {
    /// Normalized request headers (lowercased keys, query params promoted).
    pub headers: HashMap<String, String>,
    /// Authorization outcome from the transport's gate.
    pub auth: AuthState,
    /// Bearer token as presented, for forwarding to private Spaces.
    pub token: Option<String>,
    /// Skip Space discovery: initialize and non-Gradio `tools/call` on the
    /// stateless transport never need remote tools.
    pub skip_gradio: bool,
    /// Requesting transport.
    pub transport: TransportKind,
    /// Cancellation signal for the connection or request being served;
    /// in-flight discovery aborts when it fires.
    pub cancel: CancellationToken,
}

/// A freshly scoped server, ready to route.
pub struct ScopedServer {
    /// The router the transport drives.
    pub router: Arc<McpRouter>,
    /// Identity of the caller, when authenticated.
    pub username: Option<String>,
}

impl std::fmt::Debug for ScopedServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedServer")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Builds scoped servers on demand.
#[async_trait]
pub trait McpServerFactory: Send + Sync {
    /// Assemble a scoped server for one connection or request.
    async fn create(&self, request: FactoryRequest) -> ServerResult<ScopedServer>;
}
