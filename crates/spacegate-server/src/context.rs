//! Per-request context.
//!
//! Everything a tool handler may need about the caller travels in one
//! value: normalized headers, the authorization outcome, the client
//! identity learned at initialize, the progress token of the current call,
//! a cancellation token wired to the transport, and an optional
//! notification sink for transports that can stream (stateful HTTP, stdio).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use spacegate_protocol::jsonrpc::JsonRpcNotification;
use spacegate_protocol::types::Implementation;

/// Outcome of the authorization gate for this request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuthState {
    /// No token, or the validator was unreachable.
    #[default]
    Anonymous,
    /// The token validated; the caller has an identity.
    Authenticated {
        /// Validated username.
        username: String,
    },
}

impl AuthState {
    /// Whether the caller is authenticated.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }
}

/// Context shared with every handler invocation of one request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Request headers, keys lowercased. Query parameters with recognized
    /// names are promoted into this map by the HTTP transports.
    pub headers: Arc<HashMap<String, String>>,
    /// Authorization outcome.
    pub auth: AuthState,
    /// Bearer token as presented, for forwarding to private Spaces.
    pub token: Option<String>,
    /// Client identity, known after initialize.
    pub client_info: Option<Implementation>,
    /// Session this request belongs to, when the transport tracks one.
    pub session_id: Option<String>,
    /// Progress token of the current `tools/call`, when the caller sent one.
    pub progress_token: Option<Value>,
    /// Cancellation signal: fires when the caller disconnects, deletes the
    /// session, or the transport shuts down.
    pub cancel: CancellationToken,
    /// Sink for serialized server-to-client messages, on streaming
    /// transports.
    pub notifier: Option<mpsc::UnboundedSender<Value>>,
}

impl RequestContext {
    /// A context carrying only headers, for transports to extend.
    pub fn with_headers(headers: HashMap<String, String>) -> Self {
        Self {
            headers: Arc::new(headers),
            ..Self::default()
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Name the client reported at initialize.
    pub fn client_name(&self) -> Option<&str> {
        self.client_info.as_ref().map(|c| c.name.as_str())
    }

    /// Send a notification to the caller, when the transport supports it.
    pub fn notify(&self, notification: JsonRpcNotification) {
        if let Some(notifier) = &self.notifier {
            let _ = notifier.send(serde_json::to_value(notification).unwrap_or(Value::Null));
        }
    }
}
