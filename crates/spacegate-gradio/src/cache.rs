//! Two-level TTL cache for Space metadata and schemas.
//!
//! Both levels share one map shape: value + creation timestamp + optional
//! ETag, keyed by space name. Expiry is measured from entry creation, never
//! from last access, and is evaluated on read. An expired entry is *not*
//! evicted by a miss: it stays behind so the revalidation path can reuse its
//! ETag with `If-None-Match`.
//!
//! Privacy is enforced where the fetchers call [`TtlCache::set`], not here:
//! the map stores whatever it is handed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use crate::hub::SpaceMetadata;
use crate::schema::ToolDescriptor;

/// Point-in-time statistics for one cache level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    /// Reads answered from a live entry.
    pub hits: u64,
    /// Reads that found nothing live.
    pub misses: u64,
    /// Entries currently stored (live or awaiting revalidation).
    pub size: usize,
    /// `304 Not Modified` refreshes applied to existing entries.
    pub etag_revalidations: u64,
}

#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    etag_revalidations: AtomicU64,
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    fetched_at: Instant,
    etag: Option<String>,
}

/// A concurrent map with creation-based TTL and an ETag revalidation path.
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: DashMap<String, Entry<V>>,
    ttl: Duration,
    stats: CacheStats,
}

impl<V: Clone> TtlCache<V> {
    /// Create a cache whose entries live for `ttl` from creation.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            stats: CacheStats::default(),
        }
    }

    /// Look up a live entry, counting a hit or a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let live = self.entries.get(key).and_then(|e| {
            (now.duration_since(e.fetched_at) < self.ttl).then(|| e.value.clone())
        });
        match live {
            Some(v) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(v)
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Look up an entry regardless of TTL, for conditional revalidation.
    ///
    /// Does not count toward hit/miss statistics.
    pub fn get_for_revalidation(&self, key: &str) -> Option<(V, Option<String>)> {
        self.entries
            .get(key)
            .map(|e| (e.value.clone(), e.etag.clone()))
    }

    /// Store a value, replacing any previous entry for the key in place.
    pub fn set(&self, key: impl Into<String>, value: V, etag: Option<String>) {
        self.entries.insert(
            key.into(),
            Entry {
                value,
                fetched_at: Instant::now(),
                etag,
            },
        );
    }

    /// Refresh the creation timestamp of an existing entry after a `304`.
    ///
    /// Returns the (still-cached) value when the key exists. The value and
    /// ETag are untouched; only `fetched_at` moves forward.
    pub fn mark_revalidated(&self, key: &str) -> Option<V> {
        let mut entry = self.entries.get_mut(key)?;
        entry.fetched_at = Instant::now();
        self.stats.etag_revalidations.fetch_add(1, Ordering::Relaxed);
        Some(entry.value.clone())
    }

    /// Drop every entry and reset statistics to zero.
    pub fn clear(&self) {
        self.entries.clear();
        self.stats.hits.store(0, Ordering::Relaxed);
        self.stats.misses.store(0, Ordering::Relaxed);
        self.stats.etag_revalidations.store(0, Ordering::Relaxed);
    }

    /// Number of stored entries, live or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current statistics.
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            size: self.entries.len(),
            etag_revalidations: self.stats.etag_revalidations.load(Ordering::Relaxed),
        }
    }
}

/// The process-wide cache pair: Space metadata and Space schemas.
///
/// Created once at startup and shared by reference; tests construct their
/// own instance to substitute for the singletons.
#[derive(Debug)]
pub struct SpaceCaches {
    /// Metadata level, revalidated via ETag.
    pub metadata: TtlCache<SpaceMetadata>,
    /// Schema level, refetched in full on expiry.
    pub schemas: TtlCache<Vec<ToolDescriptor>>,
}

impl SpaceCaches {
    /// Create both levels with their TTLs.
    pub fn new(metadata_ttl: Duration, schema_ttl: Duration) -> Self {
        Self {
            metadata: TtlCache::new(metadata_ttl),
            schemas: TtlCache::new(schema_ttl),
        }
    }

    /// Drop all entries in both levels.
    pub fn clear_all(&self) {
        self.metadata.clear();
        self.schemas.clear();
    }
}

impl Default for SpaceCaches {
    fn default() -> Self {
        Self::new(crate::DEFAULT_METADATA_TTL, crate::DEFAULT_SCHEMA_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cache(ttl_ms: u64) -> TtlCache<String> {
        TtlCache::new(Duration::from_millis(ttl_ms))
    }

    #[test]
    fn expiry_is_measured_from_creation_not_last_access() {
        let c = cache(50);
        c.set("k", "v".to_string(), None);
        let t0 = Instant::now();

        // Reads inside the window hit and must not extend the lifetime.
        assert_eq!(c.get_at("k", t0), Some("v".to_string()));
        assert_eq!(c.get_at("k", t0 + Duration::from_millis(30)), Some("v".to_string()));
        assert_eq!(c.get_at("k", t0 + Duration::from_millis(80)), None);

        let stats = c.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn expired_entry_remains_available_for_revalidation() {
        let c = cache(0);
        c.set("k", "v".to_string(), Some("W/\"1\"".to_string()));
        assert_eq!(c.get("k"), None);
        let (value, etag) = c.get_for_revalidation("k").unwrap();
        assert_eq!(value, "v");
        assert_eq!(etag.as_deref(), Some("W/\"1\""));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn revalidation_refreshes_timestamp_without_growth() {
        let c = cache(50);
        c.set("k", "v".to_string(), Some("X".to_string()));
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(c.get("k"), None);

        assert_eq!(c.mark_revalidated("k"), Some("v".to_string()));
        assert_eq!(c.len(), 1);
        assert_eq!(c.stats().etag_revalidations, 1);
        // Fresh again after the 304.
        assert_eq!(c.get("k"), Some("v".to_string()));
    }

    #[test]
    fn repeated_revalidation_is_idempotent_on_size_and_value() {
        let c = cache(1000);
        c.set("k", "v".to_string(), Some("X".to_string()));
        for _ in 0..3 {
            c.mark_revalidated("k");
        }
        assert_eq!(c.len(), 1);
        let (value, etag) = c.get_for_revalidation("k").unwrap();
        assert_eq!(value, "v");
        assert_eq!(etag.as_deref(), Some("X"));
        assert_eq!(c.stats().etag_revalidations, 3);
    }

    #[test]
    fn set_overwrites_in_place() {
        let c = cache(1000);
        c.set("k", "v1".to_string(), None);
        c.set("k", "v2".to_string(), None);
        assert_eq!(c.len(), 1);
        assert_eq!(c.get("k"), Some("v2".to_string()));
    }

    #[test]
    fn clear_resets_entries_and_statistics() {
        let c = cache(1000);
        c.set("k", "v".to_string(), None);
        c.get("k");
        c.get("missing");
        c.clear();
        assert!(c.is_empty());
        assert_eq!(c.get("k"), None);
        let stats = c.stats();
        // The post-clear get above counts as the only miss.
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.etag_revalidations, 0);
    }

    #[test]
    fn mark_revalidated_on_absent_key_is_a_noop() {
        let c = cache(1000);
        assert_eq!(c.mark_revalidated("nope"), None);
        assert_eq!(c.stats().etag_revalidations, 0);
    }
}
