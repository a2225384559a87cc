//! Process-wide request metrics.
//!
//! One registry per transport, updated on every request path. Counters are
//! atomics; the aggregate maps (per-client, per-method) take short
//! `parking_lot` locks that are never held across I/O. Rolling windows are
//! derived from a pruned timestamp deque at snapshot time.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

/// The rolling windows reported by the snapshot, in minutes.
const WINDOWS_MINUTES: [u64; 3] = [1, 60, 180];

/// Per-client aggregates.
#[derive(Debug, Clone, Serialize)]
pub struct ClientStats {
    /// First time this client name/version was seen.
    pub first_seen: SystemTime,
    /// Most recent activity.
    pub last_seen: SystemTime,
    /// Currently open connections.
    pub active_connections: u64,
    /// Connections ever opened.
    pub total_connections: u64,
    /// Tool calls issued.
    pub tool_calls: u64,
}

/// Per-method aggregates.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MethodStats {
    /// Requests observed.
    pub count: u64,
    /// Requests that ended in an error envelope.
    pub errors: u64,
    /// Sum of latencies, for the average.
    total_latency_micros: u64,
    /// Requests by client name.
    pub by_client: HashMap<String, u64>,
}

impl MethodStats {
    /// Average latency in microseconds.
    pub fn avg_latency_micros(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total_latency_micros / self.count
        }
    }
}

/// Serializable snapshot of everything the registry tracks.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Seconds since the registry was created.
    pub uptime_seconds: u64,
    /// Total requests.
    pub requests: u64,
    /// 4xx-class protocol rejections.
    pub client_errors: u64,
    /// 5xx-class failures.
    pub server_errors: u64,
    /// Connections opened by authenticated callers.
    pub connections_authenticated: u64,
    /// Connections opened anonymously.
    pub connections_anonymous: u64,
    /// Sessions created by initialize.
    pub sessions_created: u64,
    /// Sessions removed by explicit DELETE or disconnect.
    pub sessions_deleted: u64,
    /// Sessions evicted by the stale sweep.
    pub sessions_cleaned: u64,
    /// Requests that presented an unknown session id.
    pub sessions_resume_failed: u64,
    /// Keep-alive pings sent.
    pub pings_sent: u64,
    /// Pings answered.
    pub pings_ok: u64,
    /// Pings that timed out or errored.
    pub pings_failed: u64,
    /// Requests in the rolling windows, keyed `last_{n}m`.
    pub rolling: HashMap<String, u64>,
    /// Distinct peer addresses seen.
    pub unique_ips: usize,
    /// Per-client aggregates.
    pub clients: HashMap<String, ClientStats>,
    /// Per-method aggregates with average latency.
    pub methods: HashMap<String, MethodSnapshot>,
}

/// Per-method line of the snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct MethodSnapshot {
    /// Requests observed.
    pub count: u64,
    /// Error envelopes produced.
    pub errors: u64,
    /// Average latency in microseconds.
    pub avg_latency_micros: u64,
    /// Requests by client name.
    pub by_client: HashMap<String, u64>,
}

/// The registry. Owned exclusively by its transport.
#[derive(Debug)]
pub struct MetricsRegistry {
    started_at: Instant,
    requests: AtomicU64,
    client_errors: AtomicU64,
    server_errors: AtomicU64,
    connections_authenticated: AtomicU64,
    connections_anonymous: AtomicU64,
    sessions_created: AtomicU64,
    sessions_deleted: AtomicU64,
    sessions_cleaned: AtomicU64,
    sessions_resume_failed: AtomicU64,
    pings_sent: AtomicU64,
    pings_ok: AtomicU64,
    pings_failed: AtomicU64,
    clients: RwLock<HashMap<String, ClientStats>>,
    methods: RwLock<HashMap<String, MethodStats>>,
    request_times: Mutex<VecDeque<Instant>>,
    ips: RwLock<HashSet<IpAddr>>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    /// Fresh registry; all counters zero.
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            requests: AtomicU64::new(0),
            client_errors: AtomicU64::new(0),
            server_errors: AtomicU64::new(0),
            connections_authenticated: AtomicU64::new(0),
            connections_anonymous: AtomicU64::new(0),
            sessions_created: AtomicU64::new(0),
            sessions_deleted: AtomicU64::new(0),
            sessions_cleaned: AtomicU64::new(0),
            sessions_resume_failed: AtomicU64::new(0),
            pings_sent: AtomicU64::new(0),
            pings_ok: AtomicU64::new(0),
            pings_failed: AtomicU64::new(0),
            clients: RwLock::new(HashMap::new()),
            methods: RwLock::new(HashMap::new()),
            request_times: Mutex::new(VecDeque::new()),
            ips: RwLock::new(HashSet::new()),
        }
    }

    /// Record one handled request with its method, optional client name,
    /// latency, and whether it produced an error envelope.
    pub fn record_request(
        &self,
        method: &str,
        client: Option<&str>,
        latency: Duration,
        error: bool,
    ) {
        self.requests.fetch_add(1, Ordering::Relaxed);

        {
            let mut times = self.request_times.lock();
            times.push_back(Instant::now());
            let horizon = Duration::from_secs(WINDOWS_MINUTES[2] * 60);
            while times
                .front()
                .is_some_and(|t| t.elapsed() > horizon)
            {
                times.pop_front();
            }
        }

        let mut methods = self.methods.write();
        let entry = methods.entry(method.to_string()).or_default();
        entry.count += 1;
        if error {
            entry.errors += 1;
        }
        entry.total_latency_micros += latency.as_micros() as u64;
        if let Some(client) = client {
            *entry.by_client.entry(client.to_string()).or_insert(0) += 1;
        }
    }

    /// Record a protocol rejection (4xx class).
    pub fn record_client_error(&self) {
        self.client_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an internal failure (5xx class).
    pub fn record_server_error(&self) {
        self.server_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a new connection and its auth status.
    pub fn record_connection(&self, authenticated: bool) {
        if authenticated {
            self.connections_authenticated.fetch_add(1, Ordering::Relaxed);
        } else {
            self.connections_anonymous.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a client identity becoming active (connection opened).
    pub fn client_connected(&self, name: &str) {
        let now = SystemTime::now();
        let mut clients = self.clients.write();
        let entry = clients.entry(name.to_string()).or_insert(ClientStats {
            first_seen: now,
            last_seen: now,
            active_connections: 0,
            total_connections: 0,
            tool_calls: 0,
        });
        entry.last_seen = now;
        entry.active_connections += 1;
        entry.total_connections += 1;
    }

    /// Record a client connection closing.
    pub fn client_disconnected(&self, name: &str) {
        if let Some(entry) = self.clients.write().get_mut(name) {
            entry.active_connections = entry.active_connections.saturating_sub(1);
            entry.last_seen = SystemTime::now();
        }
    }

    /// Record a tool call attributed to a client.
    pub fn record_tool_call(&self, client: Option<&str>) {
        if let Some(client) = client {
            if let Some(entry) = self.clients.write().get_mut(client) {
                entry.tool_calls += 1;
                entry.last_seen = SystemTime::now();
            }
        }
    }

    /// Record a peer address.
    pub fn record_ip(&self, ip: IpAddr) {
        self.ips.write().insert(ip);
    }

    /// Session created by initialize.
    pub fn session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Session removed by DELETE or disconnect.
    pub fn session_deleted(&self) {
        self.sessions_deleted.fetch_add(1, Ordering::Relaxed);
    }

    /// Session evicted by the stale sweep.
    pub fn session_cleaned(&self) {
        self.sessions_cleaned.fetch_add(1, Ordering::Relaxed);
    }

    /// Request presented a session id the transport does not know.
    pub fn session_resume_failed(&self) {
        self.sessions_resume_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Keep-alive ping sent.
    pub fn ping_sent(&self) {
        self.pings_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Keep-alive ping answered.
    pub fn ping_ok(&self) {
        self.pings_ok.fetch_add(1, Ordering::Relaxed);
    }

    /// Keep-alive ping timed out or errored.
    pub fn ping_failed(&self) {
        self.pings_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut rolling = HashMap::new();
        {
            let times = self.request_times.lock();
            for minutes in WINDOWS_MINUTES {
                let window = Duration::from_secs(minutes * 60);
                let count = times.iter().filter(|t| t.elapsed() <= window).count() as u64;
                rolling.insert(format!("last_{minutes}m"), count);
            }
        }

        let methods = self
            .methods
            .read()
            .iter()
            .map(|(name, stats)| {
                (
                    name.clone(),
                    MethodSnapshot {
                        count: stats.count,
                        errors: stats.errors,
                        avg_latency_micros: stats.avg_latency_micros(),
                        by_client: stats.by_client.clone(),
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            uptime_seconds: self.started_at.elapsed().as_secs(),
            requests: self.requests.load(Ordering::Relaxed),
            client_errors: self.client_errors.load(Ordering::Relaxed),
            server_errors: self.server_errors.load(Ordering::Relaxed),
            connections_authenticated: self.connections_authenticated.load(Ordering::Relaxed),
            connections_anonymous: self.connections_anonymous.load(Ordering::Relaxed),
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_deleted: self.sessions_deleted.load(Ordering::Relaxed),
            sessions_cleaned: self.sessions_cleaned.load(Ordering::Relaxed),
            sessions_resume_failed: self.sessions_resume_failed.load(Ordering::Relaxed),
            pings_sent: self.pings_sent.load(Ordering::Relaxed),
            pings_ok: self.pings_ok.load(Ordering::Relaxed),
            pings_failed: self.pings_failed.load(Ordering::Relaxed),
            rolling,
            unique_ips: self.ips.read().len(),
            clients: self.clients.read().clone(),
            methods,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_recording_feeds_method_aggregates() {
        let m = MetricsRegistry::new();
        m.record_request("tools/call", Some("client-a"), Duration::from_micros(100), false);
        m.record_request("tools/call", Some("client-a"), Duration::from_micros(300), true);
        m.record_request("tools/list", None, Duration::from_micros(50), false);

        let snapshot = m.snapshot();
        assert_eq!(snapshot.requests, 3);
        let call = &snapshot.methods["tools/call"];
        assert_eq!(call.count, 2);
        assert_eq!(call.errors, 1);
        assert_eq!(call.avg_latency_micros, 200);
        assert_eq!(call.by_client["client-a"], 2);
        assert_eq!(snapshot.rolling["last_1m"], 3);
        assert_eq!(snapshot.rolling["last_180m"], 3);
    }

    #[test]
    fn client_connection_lifecycle() {
        let m = MetricsRegistry::new();
        m.client_connected("ide");
        m.client_connected("ide");
        m.record_tool_call(Some("ide"));
        m.client_disconnected("ide");

        let snapshot = m.snapshot();
        let ide = &snapshot.clients["ide"];
        assert_eq!(ide.total_connections, 2);
        assert_eq!(ide.active_connections, 1);
        assert_eq!(ide.tool_calls, 1);
    }

    #[test]
    fn unique_ips_deduplicate() {
        let m = MetricsRegistry::new();
        m.record_ip("10.0.0.1".parse().unwrap());
        m.record_ip("10.0.0.1".parse().unwrap());
        m.record_ip("10.0.0.2".parse().unwrap());
        assert_eq!(m.snapshot().unique_ips, 2);
    }

    #[test]
    fn session_and_ping_counters() {
        let m = MetricsRegistry::new();
        m.session_created();
        m.session_cleaned();
        m.session_resume_failed();
        m.ping_sent();
        m.ping_ok();
        let snapshot = m.snapshot();
        assert_eq!(snapshot.sessions_created, 1);
        assert_eq!(snapshot.sessions_cleaned, 1);
        assert_eq!(snapshot.sessions_resume_failed, 1);
        assert_eq!(snapshot.pings_sent, 1);
        assert_eq!(snapshot.pings_ok, 1);
    }
}
