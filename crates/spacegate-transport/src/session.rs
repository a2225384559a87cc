//! Session metadata and its state machine.
//!
//! A stateful session is `Connected` from initialize, becomes `Distressed`
//! when keep-alive pings fail often enough, recovers to `Connected` on the
//! next successful ping, and ends `Disconnected` (terminal) on stale
//! timeout, explicit DELETE, transport close, or a heartbeat-detected dead
//! stream.

use std::net::IpAddr;
use std::time::{Duration, SystemTime};

use serde::Serialize;

use spacegate_protocol::types::{ClientCapabilities, Implementation};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Healthy and accepting requests.
    Connected,
    /// Ping failures reached the threshold; still tracked, flagged in
    /// observability.
    Distressed,
    /// Terminal: the session is being removed.
    Disconnected,
}

/// Metadata tracked per session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionMetadata {
    /// Session id as carried in the `mcp-session-id` header.
    pub id: String,
    /// Lifecycle state.
    pub status: SessionStatus,
    /// When the session was created.
    pub connected_at: SystemTime,
    /// Last request or successful ping.
    pub last_activity: SystemTime,
    /// Requests handled on this session.
    pub request_count: u64,
    /// Whether the session initialized with a valid token.
    pub is_authenticated: bool,
    /// Client identity from initialize.
    pub client_info: Option<Implementation>,
    /// Client capabilities from initialize.
    pub capabilities: Option<ClientCapabilities>,
    /// Consecutive keep-alive ping failures.
    pub ping_failures: u32,
    /// When the last ping was attempted.
    pub last_ping_attempt: Option<SystemTime>,
    /// Peer address.
    pub ip_address: Option<IpAddr>,
}

impl SessionMetadata {
    /// Fresh metadata for a session created by initialize.
    pub fn new(id: impl Into<String>, is_authenticated: bool, ip_address: Option<IpAddr>) -> Self {
        let now = SystemTime::now();
        Self {
            id: id.into(),
            status: SessionStatus::Connected,
            connected_at: now,
            last_activity: now,
            request_count: 0,
            is_authenticated,
            client_info: None,
            capabilities: None,
            ping_failures: 0,
            last_ping_attempt: None,
            ip_address,
        }
    }

    /// Record a request: refresh activity, bump the counter.
    pub fn touch(&mut self) {
        self.last_activity = SystemTime::now();
        self.request_count += 1;
    }

    /// Record a successful keep-alive ping.
    ///
    /// Recovers a distressed session and refreshes activity.
    pub fn record_ping_success(&mut self) {
        self.ping_failures = 0;
        self.last_activity = SystemTime::now();
        if self.status == SessionStatus::Distressed {
            self.status = SessionStatus::Connected;
        }
    }

    /// Record a failed keep-alive ping; crossing `threshold` failures marks
    /// the session distressed.
    pub fn record_ping_failure(&mut self, threshold: u32) {
        self.ping_failures += 1;
        if self.status == SessionStatus::Connected && self.ping_failures >= threshold {
            self.status = SessionStatus::Distressed;
        }
    }

    /// Note a ping attempt.
    pub fn record_ping_attempt(&mut self) {
        self.last_ping_attempt = Some(SystemTime::now());
    }

    /// Whether the session idled past `timeout`.
    pub fn is_stale(&self, timeout: Duration) -> bool {
        self.last_activity
            .elapsed()
            .map(|idle| idle > timeout)
            .unwrap_or(false)
    }

    /// Enter the terminal state.
    pub fn disconnect(&mut self) {
        self.status = SessionStatus::Disconnected;
    }
}
