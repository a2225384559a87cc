//! Environment-driven gateway configuration.
//!
//! Every timing and feature knob is read once at startup with the
//! documented default; background loops and discovery copy what they need
//! at entry, so nothing here needs locking after construction.

use std::time::Duration;

use serde_json::{json, Value};
use url::Url;

fn env_ms(name: &str, default_ms: u64) -> Duration {
    let ms = std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default_ms);
    Duration::from_millis(ms)
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn env_url(name: &str, default: &str) -> Url {
    std::env::var(name)
        .ok()
        .and_then(|v| Url::parse(&v).ok())
        .unwrap_or_else(|| Url::parse(default).expect("default url parses"))
}

/// All gateway configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Hub API base.
    pub hub_base_url: Url,
    /// External user-settings API base, when configured.
    pub settings_api_url: Option<Url>,
    /// TTL of cached Space metadata.
    pub space_metadata_ttl: Duration,
    /// TTL of cached Space schemas.
    pub space_schema_ttl: Duration,
    /// Metadata discovery batch size.
    pub discovery_concurrency: usize,
    /// Per-space metadata fetch deadline.
    pub space_info_timeout: Duration,
    /// Per-space schema fetch deadline.
    pub space_schema_timeout: Duration,
    /// Default deadline for upstream tool calls, overridable per request
    /// by the job-timeout header.
    pub upstream_call_timeout: Duration,
    /// Dead-stream detection interval.
    pub heartbeat_interval: Duration,
    /// Stale-session sweep interval.
    pub stale_check_interval: Duration,
    /// Idle time before a session is evicted.
    pub stale_timeout: Duration,
    /// Whether keep-alive pings run.
    pub ping_enabled: bool,
    /// Interval between keep-alive pings.
    pub ping_interval: Duration,
    /// Ping failures before a session is distressed.
    pub ping_failure_threshold: u32,
    /// Strict protocol compliance mode.
    pub strict_compliance: bool,
    /// Auto-enable `hf_doc_fetch` whenever `hf_doc_search` is selected.
    pub search_enables_fetch: bool,
    /// Serve the welcome page on stateless GET.
    pub welcome_page_enabled: bool,
    /// Track analytics-only sessions on the stateless transport.
    pub analytics_sessions: bool,
    /// Bounded diagnostic log budget for session-resume failures.
    pub temp_log_budget: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            hub_base_url: Url::parse("https://huggingface.co").expect("default url parses"),
            settings_api_url: None,
            space_metadata_ttl: Duration::from_millis(300_000),
            space_schema_ttl: Duration::from_millis(300_000),
            discovery_concurrency: 10,
            space_info_timeout: Duration::from_millis(5_000),
            space_schema_timeout: Duration::from_millis(7_500),
            upstream_call_timeout: Duration::from_millis(300_000),
            heartbeat_interval: Duration::from_millis(30_000),
            stale_check_interval: Duration::from_millis(90_000),
            stale_timeout: Duration::from_millis(300_000),
            ping_enabled: true,
            ping_interval: Duration::from_millis(30_000),
            ping_failure_threshold: 1,
            strict_compliance: false,
            search_enables_fetch: false,
            welcome_page_enabled: true,
            analytics_sessions: false,
            temp_log_budget: 0,
        }
    }
}

impl GatewayConfig {
    /// Resolve configuration from the environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            hub_base_url: env_url("HUB_BASE_URL", defaults.hub_base_url.as_str()),
            settings_api_url: std::env::var("SETTINGS_API_URL")
                .ok()
                .and_then(|v| Url::parse(&v).ok()),
            space_metadata_ttl: env_ms("SPACE_METADATA_TTL_MS", 300_000),
            space_schema_ttl: env_ms("SPACE_SCHEMA_TTL_MS", 300_000),
            discovery_concurrency: env_usize("GRADIO_DISCOVERY_CONCURRENCY", 10),
            space_info_timeout: env_ms("SPACE_INFO_TIMEOUT_MS", 5_000),
            space_schema_timeout: env_ms("SPACE_SCHEMA_TIMEOUT_MS", 7_500),
            upstream_call_timeout: env_ms("UPSTREAM_CALL_TIMEOUT_MS", 300_000),
            heartbeat_interval: env_ms("HEARTBEAT_MS", 30_000),
            stale_check_interval: env_ms("STALE_CHECK_MS", 90_000),
            stale_timeout: env_ms("STALE_TIMEOUT_MS", 300_000),
            ping_enabled: env_bool("PING_ENABLED", true),
            ping_interval: env_ms("PING_INTERVAL_MS", 30_000),
            ping_failure_threshold: env_u32("PING_FAILURE_THRESHOLD", 1),
            strict_compliance: env_bool("STRICT_COMPLIANCE", false),
            search_enables_fetch: env_bool("SEARCH_ENABLES_FETCH", false),
            welcome_page_enabled: env_bool("WELCOME_PAGE_ENABLED", true),
            analytics_sessions: env_bool("ANALYTICS_SESSIONS", false),
            temp_log_budget: env_u32("TEMP_LOG_BUDGET", 0),
        }
    }

    /// Configuration as reported by the management surface. No secrets are
    /// stored in config, so redaction is structural: only known knobs are
    /// echoed.
    pub fn as_report(&self) -> Value {
        json!({
            "hubBaseUrl": self.hub_base_url.as_str(),
            "settingsApiConfigured": self.settings_api_url.is_some(),
            "spaceMetadataTtlMs": self.space_metadata_ttl.as_millis() as u64,
            "spaceSchemaTtlMs": self.space_schema_ttl.as_millis() as u64,
            "discoveryConcurrency": self.discovery_concurrency,
            "spaceInfoTimeoutMs": self.space_info_timeout.as_millis() as u64,
            "spaceSchemaTimeoutMs": self.space_schema_timeout.as_millis() as u64,
            "upstreamCallTimeoutMs": self.upstream_call_timeout.as_millis() as u64,
            "heartbeatMs": self.heartbeat_interval.as_millis() as u64,
            "staleCheckMs": self.stale_check_interval.as_millis() as u64,
            "staleTimeoutMs": self.stale_timeout.as_millis() as u64,
            "pingEnabled": self.ping_enabled,
            "pingIntervalMs": self.ping_interval.as_millis() as u64,
            "pingFailureThreshold": self.ping_failure_threshold,
            "strictCompliance": self.strict_compliance,
            "searchEnablesFetch": self.search_enables_fetch,
            "welcomePageEnabled": self.welcome_page_enabled,
            "analyticsSessions": self.analytics_sessions,
            "tempLogBudget": self.temp_log_budget,
        })
    }
}

/// A per-request override for how long job and upstream work may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTimeout {
    /// Wait until the work completes, with no deadline.
    Wait,
    /// A deadline in seconds.
    Seconds(u64),
}

impl JobTimeout {
    /// Parse the `x-mcp-job-timeout` header value: a positive integer in
    /// seconds, or `-1` for wait-until-complete. Anything else is ignored.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().parse::<i64>() {
            Ok(-1) => Some(Self::Wait),
            Ok(seconds) if seconds > 0 => Some(Self::Seconds(seconds as u64)),
            _ => None,
        }
    }

}

/// Resolve the effective upstream deadline from an optional header value.
pub fn resolve_deadline(header: Option<&str>, default: Duration) -> Option<Duration> {
    match header.and_then(JobTimeout::parse) {
        Some(JobTimeout::Wait) => None,
        Some(JobTimeout::Seconds(seconds)) => Some(Duration::from_secs(seconds)),
        None => Some(default),
    }
}
