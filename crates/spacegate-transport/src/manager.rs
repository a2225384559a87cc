//! Session table and its background tasks.
//!
//! The manager owns every live stateful session: creation at initialize,
//! lookup on each request, and the three background loops —
//!
//! - **stale sweep**: evicts sessions idle past the timeout;
//! - **ping keep-alive**: fires a protocol-level ping per session, with
//!   in-flight deduplication, failure counting, and distress marking;
//! - **heartbeat**: detects dead SSE streams and removes their sessions.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use spacegate_protocol::jsonrpc::JsonRpcRequest;
use spacegate_protocol::types::RequestId;
use spacegate_server::{AuthState, McpRouter};

use crate::metrics::MetricsRegistry;
use crate::session::SessionMetadata;

/// Timing knobs for the session table, copied from configuration at
/// construction.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Dead-stream detection interval.
    pub heartbeat_interval: Duration,
    /// Stale sweep interval.
    pub stale_check_interval: Duration,
    /// Idle time after which a session is evicted.
    pub stale_timeout: Duration,
    /// Whether keep-alive pings run at all.
    pub ping_enabled: bool,
    /// Interval between pings per session.
    pub ping_interval: Duration,
    /// Failures before a session is marked distressed.
    pub ping_failure_threshold: u32,
    /// How long to wait for a ping reply.
    pub ping_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(30_000),
            stale_check_interval: Duration::from_millis(90_000),
            stale_timeout: Duration::from_millis(300_000),
            ping_enabled: true,
            ping_interval: Duration::from_millis(30_000),
            ping_failure_threshold: 1,
            ping_timeout: Duration::from_secs(10),
        }
    }
}

/// Why a session left the table; decides which counter moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Explicit DELETE or transport close.
    Deleted,
    /// Evicted by the stale sweep.
    Cleaned,
}

/// One live session.
pub struct SessionEntry {
    /// Mutable metadata; lock is never held across I/O.
    pub meta: Mutex<SessionMetadata>,
    /// The scoped server bound to this session.
    pub router: Arc<McpRouter>,
    /// Auth state captured at initialize.
    pub auth: AuthState,
    /// Token captured at initialize, for upstream forwarding.
    pub token: Option<String>,
    /// Serialized server-to-client messages bound for the SSE stream.
    pub outbound: mpsc::UnboundedSender<Value>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
    /// Fires when the session is removed; cancels in-flight upstream work.
    pub cancel: CancellationToken,
    ping_in_flight: AtomicBool,
}

impl std::fmt::Debug for SessionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEntry")
            .field("id", &self.meta.lock().id)
            .finish_non_exhaustive()
    }
}

impl SessionEntry {
    /// Take the SSE receiver. Only one live stream per session: a second
    /// GET gets nothing to attach.
    pub fn take_stream(&self) -> Option<mpsc::UnboundedReceiver<Value>> {
        self.outbound_rx.lock().take()
    }

    /// Whether a stream was attached and has since gone away.
    fn stream_dead(&self) -> bool {
        self.outbound_rx.lock().is_none() && self.outbound.is_closed()
    }
}

/// The session table plus its background loops.
#[derive(Debug)]
pub struct SessionManager {
    sessions: DashMap<String, Arc<SessionEntry>>,
    pending_pings: DashMap<String, oneshot::Sender<()>>,
    options: SessionOptions,
    metrics: Arc<MetricsRegistry>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionManager {
    /// Empty table.
    pub fn new(options: SessionOptions, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            sessions: DashMap::new(),
            pending_pings: DashMap::new(),
            options,
            metrics,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Create a session at initialize; returns its id and entry.
    ///
    /// `cancel` is the session's root cancellation token; the transport
    /// may have already handed it to the factory so discovery started
    /// under it.
    pub fn create(
        &self,
        router: Arc<McpRouter>,
        auth: AuthState,
        token: Option<String>,
        ip: Option<IpAddr>,
        cancel: CancellationToken,
    ) -> (String, Arc<SessionEntry>) {
        let id = format!("mcp-{}", Uuid::new_v4().simple());
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let entry = Arc::new(SessionEntry {
            meta: Mutex::new(SessionMetadata::new(
                id.clone(),
                auth.is_authenticated(),
                ip,
            )),
            router,
            auth,
            token,
            outbound,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            cancel,
            ping_in_flight: AtomicBool::new(false),
        });
        self.sessions.insert(id.clone(), Arc::clone(&entry));
        self.metrics.session_created();
        (id, entry)
    }

    /// Look up a live session.
    pub fn get(&self, id: &str) -> Option<Arc<SessionEntry>> {
        self.sessions.get(id).map(|e| Arc::clone(e.value()))
    }

    /// Remove a session: cancel its work, mark it disconnected, count it.
    pub fn remove(&self, id: &str, reason: RemovalReason) -> bool {
        let Some((_, entry)) = self.sessions.remove(id) else {
            return false;
        };
        entry.cancel.cancel();
        let client = {
            let mut meta = entry.meta.lock();
            meta.disconnect();
            meta.client_info.as_ref().map(|c| c.name.clone())
        };
        if let Some(client) = client {
            self.metrics.client_disconnected(&client);
        }
        match reason {
            RemovalReason::Deleted => self.metrics.session_deleted(),
            RemovalReason::Cleaned => self.metrics.session_cleaned(),
        }
        true
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Metadata snapshot of every live session.
    pub fn snapshots(&self) -> Vec<SessionMetadata> {
        self.sessions.iter().map(|e| e.meta.lock().clone()).collect()
    }

    /// Complete a pending keep-alive ping by its request id. Returns true
    /// when the id matched one.
    pub fn complete_ping(&self, response_id: &str) -> bool {
        if let Some((_, tx)) = self.pending_pings.remove(response_id) {
            let _ = tx.send(());
            true
        } else {
            false
        }
    }

    /// Start the three background loops.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();

        let manager = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(manager.options.stale_check_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                manager.sweep_stale();
            }
        }));

        let manager = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(manager.options.heartbeat_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                manager.sweep_dead_streams();
            }
        }));

        if self.options.ping_enabled {
            let manager = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                let mut tick = tokio::time::interval(manager.options.ping_interval);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tick.tick().await;
                    manager.ping_all();
                }
            }));
        }
    }

    /// Stop background loops and drop every session.
    pub fn stop(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.remove(&id, RemovalReason::Deleted);
        }
        self.pending_pings.clear();
    }

    /// Evict sessions idle past the stale timeout.
    pub fn sweep_stale(&self) {
        let stale: Vec<String> = self
            .sessions
            .iter()
            .filter(|e| e.meta.lock().is_stale(self.options.stale_timeout))
            .map(|e| e.key().clone())
            .collect();
        for id in stale {
            tracing::info!(session = %id, "evicting stale session");
            self.remove(&id, RemovalReason::Cleaned);
        }
    }

    /// Remove sessions whose attached SSE stream has died.
    fn sweep_dead_streams(&self) {
        let dead: Vec<String> = self
            .sessions
            .iter()
            .filter(|e| e.stream_dead())
            .map(|e| e.key().clone())
            .collect();
        for id in dead {
            tracing::debug!(session = %id, "removing session with dead stream");
            self.remove(&id, RemovalReason::Deleted);
        }
    }

    /// Fire one keep-alive ping per session, deduplicating in-flight pings.
    fn ping_all(self: &Arc<Self>) {
        for entry in self.sessions.iter() {
            let session = Arc::clone(entry.value());
            if session
                .ping_in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }

            let ping_id = format!("ping-{}", Uuid::new_v4().simple());
            let request = JsonRpcRequest::new("ping", None, RequestId::String(ping_id.clone()));
            let (tx, rx) = oneshot::channel();
            self.pending_pings.insert(ping_id.clone(), tx);
            session.meta.lock().record_ping_attempt();
            self.metrics.ping_sent();

            let sent = session
                .outbound
                .send(serde_json::to_value(&request).unwrap_or(Value::Null))
                .is_ok();

            let manager = Arc::clone(self);
            let threshold = self.options.ping_failure_threshold;
            let timeout = self.options.ping_timeout;
            tokio::spawn(async move {
                let answered = sent
                    && tokio::time::timeout(timeout, rx)
                        .await
                        .map(|r| r.is_ok())
                        .unwrap_or(false);
                manager.pending_pings.remove(&ping_id);
                {
                    let mut meta = session.meta.lock();
                    if answered {
                        meta.record_ping_success();
                    } else {
                        meta.record_ping_failure(threshold);
                    }
                }
                if answered {
                    manager.metrics.ping_ok();
                } else {
                    manager.metrics.ping_failed();
                }
                session.ping_in_flight.store(false, Ordering::Release);
            });
        }
    }
}
