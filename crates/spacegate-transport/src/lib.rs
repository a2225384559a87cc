//! # Spacegate Transport
//!
//! The three inbound transports and their shared machinery:
//!
//! - [`streamable`]: stateful streaming HTTP (POST + SSE GET + DELETE) with
//!   a session table, heartbeats, keep-alive pings, and stale eviction
//! - [`stateless`]: per-request JSON-RPC with a stub-responder fast path,
//!   the skip-gradio optimisation, and optional analytics-only sessions
//! - [`stdio`]: newline-delimited JSON-RPC on stdin/stdout
//!
//! All transports share the [`ServerTransport`] contract, the
//! [`auth::AuthGate`], the [`metrics::MetricsRegistry`], and the protocol
//! error vocabulary from `spacegate-protocol`.

#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![deny(unsafe_code)]

pub mod auth;
pub mod error;
pub mod factory;
pub mod manager;
pub mod metrics;
pub mod session;
pub mod stateless;
pub mod stdio;
pub mod streamable;

pub use auth::{AuthGate, AuthOutcome, TokenValidator};
pub use error::{TransportError, TransportResult};
pub use factory::{FactoryRequest, McpServerFactory, ScopedServer, TransportKind};
pub use manager::SessionManager;
pub use metrics::MetricsRegistry;
pub use session::{SessionMetadata, SessionStatus};

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

/// Header carrying the session id on HTTP transports.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Header that makes anonymous requests rejectable.
pub const FORCE_AUTH_HEADER: &str = "x-mcp-force-auth";

/// Query parameters promoted to `x-mcp-*` headers before processing.
pub const PROMOTED_QUERY_PARAMS: &[&str] = &[
    "bouquet",
    "mix",
    "gradio",
    "no-image-content",
    "job-timeout",
    "force-auth",
];

/// Connection count reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionCount {
    /// A transport that tracks sessions reports how many are live.
    Exact(usize),
    /// The stateless transport has no notion of a connection.
    Stateless,
}

/// Contract every transport honors, for the management surface and the
/// process lifecycle.
#[async_trait]
pub trait ServerTransport: Send + Sync {
    /// Bind endpoints and start background tasks.
    async fn initialize(&self) -> TransportResult<()>;

    /// Close all sessions and stop background tasks.
    async fn cleanup(&self) -> TransportResult<()>;

    /// Mark the transport draining: new connections are rejected with a
    /// protocol-level shutting-down error.
    fn shutdown(&self);

    /// Live connection count, or the stateless sentinel.
    fn active_connection_count(&self) -> ConnectionCount;

    /// Snapshot of tracked session metadata.
    fn sessions(&self) -> Vec<SessionMetadata>;

    /// Metrics snapshot for the management surface.
    fn metrics_snapshot(&self) -> Value;

    /// Effective configuration for the management surface.
    fn configuration(&self) -> Value;
}

/// Promote recognized query parameters into `x-mcp-*` headers.
///
/// Headers win on conflict; the promotion only fills gaps.
pub fn promote_query_params(headers: &mut HashMap<String, String>, query: &str) {
    for pair in query.split('&') {
        let mut kv = pair.splitn(2, '=');
        let (Some(key), Some(value)) = (kv.next(), kv.next()) else {
            continue;
        };
        if !PROMOTED_QUERY_PARAMS.contains(&key) {
            continue;
        }
        let header = format!("x-mcp-{key}");
        if !headers.contains_key(&header) {
            headers.insert(header, value.to_string());
        }
    }
}
