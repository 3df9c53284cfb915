use async_trait::async_trait;
use chrono::{NaiveTime, Timelike};
use redis::aio::ConnectionManager;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur with cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Key/value store with per-entry TTL.
///
/// Every method is infallible from the caller's point of view: backend
/// failures are logged and reported as a miss, `false`, `0` or empty.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> bool;

    /// Returns the number of keys that existed
    async fn delete(&self, keys: &[String]) -> usize;

    /// Keys matching a `*` glob
    async fn scan_keys(&self, pattern: &str) -> Vec<String>;

    /// Short backend name for health reporting
    fn backend(&self) -> &'static str;

    async fn delete_pattern(&self, pattern: &str) -> usize {
        let keys = self.scan_keys(pattern).await;
        if keys.is_empty() {
            return 0;
        }
        self.delete(&keys).await
    }
}

#[derive(Debug, Clone)]
struct CachedValue {
    value: String,
    expires_at: Instant,
}

impl CachedValue {
    fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// In-process store backed by moka.
///
/// Each entry keeps its own deadline; the moka-level TTL only bounds how long
/// anything can linger.
pub struct LocalCacheStore {
    entries: moka::future::Cache<String, CachedValue>,
    max_ttl: Duration,
}

impl LocalCacheStore {
    pub fn new(capacity: u64, max_ttl: Duration) -> Self {
        let entries = moka::future::CacheBuilder::new(capacity)
            .time_to_live(max_ttl)
            .build();
        Self { entries, max_ttl }
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) {
        let ttl = ttl.min(self.max_ttl);
        let entry = CachedValue {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        };
        self.entries.insert(key.to_string(), entry).await;
    }

    async fn remove(&self, keys: &[String]) -> usize {
        let mut removed = 0;
        for key in keys {
            if let Some(entry) = self.entries.remove(key.as_str()).await {
                if entry.is_fresh() {
                    removed += 1;
                }
            }
        }
        removed
    }
}

#[async_trait]
impl CacheStore for LocalCacheStore {
    async fn get(&self, key: &str) -> Option<String> {
        match self.entries.get(key).await {
            Some(entry) if entry.is_fresh() => {
                tracing::trace!("L1 cache hit: {}", key);
                Some(entry.value)
            }
            Some(_) => {
                self.entries.invalidate(key).await;
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> bool {
        self.put(key, value, ttl).await;
        true
    }

    async fn delete(&self, keys: &[String]) -> usize {
        self.remove(keys).await
    }

    async fn scan_keys(&self, pattern: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(key, entry)| entry.is_fresh() && glob_matches(pattern, key))
            .map(|(key, _)| key.as_ref().clone())
            .collect()
    }

    fn backend(&self) -> &'static str {
        "local"
    }
}

/// Multi-tier cache store
///
/// L1 (in-memory, per process) in front of L2 (Redis, shared across
/// instances). L2 hits repopulate L1 for at most the remaining L2 TTL.
pub struct TieredCacheStore {
    redis: ConnectionManager,
    l1: LocalCacheStore,
}

const SCAN_BATCH: usize = 200;

impl TieredCacheStore {
    /// Connect to Redis and build the L1 tier
    pub async fn new(redis_url: &str, l1_size: u64, l1_ttl: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;

        Ok(Self {
            redis,
            l1: LocalCacheStore::new(l1_size, l1_ttl),
        })
    }

    async fn try_get(&self, key: &str) -> Result<Option<String>, CacheError> {
        if let Some(value) = self.l1.get(key).await {
            return Ok(Some(value));
        }

        let mut conn = self.redis.clone();
        let (value, pttl_ms): (Option<String>, i64) = redis::pipe()
            .cmd("GET")
            .arg(key)
            .cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await?;

        match value {
            Some(json) => {
                tracing::trace!("L2 cache hit: {}", key);
                if pttl_ms > 0 {
                    self.l1.put(key, &json, Duration::from_millis(pttl_ms as u64)).await;
                }
                Ok(Some(json))
            }
            None => {
                tracing::trace!("Cache miss: {}", key);
                Ok(None)
            }
        }
    }

    async fn try_set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.l1.put(key, value, ttl).await;

        let secs = ttl.as_secs().max(1);
        let mut conn = self.redis.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(secs)
            .query_async(&mut conn)
            .await?;

        tracing::trace!("Cache set: {}", key);
        Ok(())
    }

    async fn try_delete(&self, keys: &[String]) -> Result<usize, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.redis.clone();
        let removed: usize = redis::cmd("DEL").arg(keys).query_async(&mut conn).await?;
        Ok(removed)
    }

    async fn try_scan(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.redis.clone();
        let mut cursor: u64 = 0;
        // SCAN may repeat keys across batches
        let mut keys = BTreeSet::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys.into_iter().collect())
    }
}

#[async_trait]
impl CacheStore for TieredCacheStore {
    async fn get(&self, key: &str) -> Option<String> {
        self.try_get(key).await.unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "Cache get failed, treating as miss");
            None
        })
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> bool {
        match self.try_set(key, value, ttl).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key, error = %e, "Cache set failed");
                false
            }
        }
    }

    async fn delete(&self, keys: &[String]) -> usize {
        let local = self.l1.remove(keys).await;
        match self.try_delete(keys).await {
            Ok(removed) => removed.max(local),
            Err(e) => {
                tracing::warn!(count = keys.len(), error = %e, "Cache delete failed, L1 only");
                local
            }
        }
    }

    async fn scan_keys(&self, pattern: &str) -> Vec<String> {
        let local = self.l1.scan_keys(pattern).await;
        merge_scanned(pattern, local, self.try_scan(pattern).await)
    }

    fn backend(&self) -> &'static str {
        "tiered"
    }
}

/// Union of L1 and L2 scan results.
///
/// L1 may hold keys Redis has already dropped: a peer instance applied the
/// same invalidation first, or the L2 write failed. A failed L2 scan still
/// yields the L1 keys.
fn merge_scanned(pattern: &str, local: Vec<String>, remote: Result<Vec<String>, CacheError>) -> Vec<String> {
    let mut keys: BTreeSet<String> = local.into_iter().collect();
    match remote {
        Ok(remote) => keys.extend(remote),
        Err(e) => tracing::warn!(pattern, error = %e, "Cache scan failed, using L1 keys only"),
    }
    keys.into_iter().collect()
}

/// Redis-style glob supporting `*` only
pub fn glob_matches(pattern: &str, key: &str) -> bool {
    let p = pattern.as_bytes();
    let k = key.as_bytes();
    let (mut pi, mut ki) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut resume = 0usize;

    while ki < k.len() {
        if pi < p.len() && p[pi] == b'*' {
            star = Some(pi);
            pi += 1;
            resume = ki;
        } else if pi < p.len() && p[pi] == k[ki] {
            pi += 1;
            ki += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            resume += 1;
            ki = resume;
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}

/// Cache key builder
pub struct CacheKey;

impl CacheKey {
    pub const ALL_ROUTE_SEARCHES: &'static str = "routes:search:*";
    pub const ALL_HUB_ROUTES: &'static str = "routes:hubs:*";
    pub const ALL_NEARBY_HUBS: &'static str = "hubs:near:*";

    /// Geo candidate list for one origin hub, destination hub (or `none` for
    /// origin-only searches), search radius, departure slot and status scope
    pub fn route_search(
        origin_hub: Uuid,
        destination_hub: Option<Uuid>,
        radius_meters: u32,
        departure_slot: NaiveTime,
        active_only: bool,
    ) -> String {
        format!(
            "routes:search:{}:{}:{}m:{}:{}",
            origin_hub,
            hub_part(destination_hub),
            radius_meters,
            hhmm(departure_slot),
            if active_only { "active" } else { "all" }
        )
    }

    /// Every search list that names this hub on either side
    pub fn route_search_patterns_for_hub(hub_id: Uuid) -> [String; 2] {
        [
            format!("routes:search:{}:*", hub_id),
            format!("routes:search:*:{}:*", hub_id),
        ]
    }

    /// Routes registered between two hubs around a departure time
    pub fn hub_routes(origin_hub: Uuid, destination_hub: Uuid, time: NaiveTime, window_minutes: u32) -> String {
        format!(
            "routes:hubs:{}:{}:{}:{}",
            origin_hub,
            destination_hub,
            hhmm(time),
            window_minutes
        )
    }

    pub fn hub_routes_pattern(origin_hub: Option<Uuid>, destination_hub: Option<Uuid>) -> String {
        format!(
            "routes:hubs:{}:{}:*",
            origin_hub.map(|id| id.to_string()).unwrap_or_else(|| "*".to_string()),
            destination_hub.map(|id| id.to_string()).unwrap_or_else(|| "*".to_string()),
        )
    }

    pub fn driver_stats(driver_id: Uuid) -> String {
        format!("driver:stats:{}", driver_id)
    }

    pub fn hub(hub_id: Uuid) -> String {
        format!("hub:{}", hub_id)
    }

    /// Hubs around a grid cell; coordinates already snapped to the grid
    pub fn hubs_near(lat: f64, lon: f64, precision: u32) -> String {
        let p = precision as usize;
        format!("hubs:near:{:.*}:{:.*}", p, lat, p, lon)
    }
}

fn hub_part(hub: Option<Uuid>) -> String {
    hub.map(|id| id.to_string()).unwrap_or_else(|| "none".to_string())
}

fn hhmm(time: NaiveTime) -> String {
    format!("{:02}:{:02}", time.hour(), time.minute())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "Requires Redis"]
    async fn test_tiered_set_get_delete() {
        let cache = TieredCacheStore::new("redis://127.0.0.1:6379", 1000, Duration::from_secs(60))
            .await
            .expect("Failed to create cache");

        let key = "test:tiered";
        assert!(cache.set(key, "value", Duration::from_secs(30)).await);
        assert_eq!(cache.get(key).await.as_deref(), Some("value"));

        assert_eq!(cache.delete(&[key.to_string()]).await, 1);
        assert!(cache.get(key).await.is_none());
        assert_eq!(cache.delete(&[key.to_string()]).await, 0);
    }

    #[tokio::test]
    #[ignore = "Requires Redis"]
    async fn test_peer_eviction_reaches_local_tier() {
        let a = TieredCacheStore::new("redis://127.0.0.1:6379", 1000, Duration::from_secs(60))
            .await
            .expect("Failed to create cache");
        let b = TieredCacheStore::new("redis://127.0.0.1:6379", 1000, Duration::from_secs(60))
            .await
            .expect("Failed to create cache");

        let key = "routes:search:peer-test:none:5000m:08:00:active";
        assert!(a.set(key, "[]", Duration::from_secs(30)).await);
        // b now holds the entry in its own L1
        assert!(b.get(key).await.is_some());

        assert_eq!(a.delete_pattern("routes:search:peer-test:*").await, 1);
        assert_eq!(b.delete_pattern("routes:search:peer-test:*").await, 1);
        assert!(b.get(key).await.is_none());
    }

    #[test]
    fn test_scan_keeps_local_keys() {
        let local = vec!["routes:search:a".to_string(), "routes:search:b".to_string()];
        let remote = vec!["routes:search:b".to_string(), "routes:search:c".to_string()];

        let merged = merge_scanned("routes:search:*", local.clone(), Ok(remote));
        assert_eq!(merged, vec!["routes:search:a", "routes:search:b", "routes:search:c"]);

        let offline = redis::RedisError::from((redis::ErrorKind::IoError, "connection refused"));
        let merged = merge_scanned("routes:search:*", local, Err(CacheError::from(offline)));
        assert_eq!(merged, vec!["routes:search:a", "routes:search:b"]);
    }

    #[tokio::test]
    async fn test_local_round_trip() {
        let cache = LocalCacheStore::new(100, Duration::from_secs(60));

        assert!(cache.set("k", "v", Duration::from_secs(30)).await);
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));

        assert_eq!(cache.delete(&["k".to_string()]).await, 1);
        assert!(cache.get("k").await.is_none());
        // repeated delete is a no-op
        assert_eq!(cache.delete(&["k".to_string()]).await, 0);
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_local_entry_expires() {
        let cache = LocalCacheStore::new(100, Duration::from_secs(60));
        cache.set("short", "v", Duration::from_millis(20)).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get("short").await.is_none());
    }

    #[tokio::test]
    async fn test_local_scan_and_delete_pattern() {
        let cache = LocalCacheStore::new(100, Duration::from_secs(60));
        let ttl = Duration::from_secs(30);
        cache.set("routes:search:a:b:5000m:08:00:active", "[]", ttl).await;
        cache.set("routes:search:a:none:5000m:09:00:active", "[]", ttl).await;
        cache.set("hub:a", "{}", ttl).await;
        cache.entries.run_pending_tasks().await;

        let mut keys = cache.scan_keys("routes:search:*").await;
        keys.sort();
        assert_eq!(keys.len(), 2);

        assert_eq!(cache.delete_pattern("routes:search:*").await, 2);
        assert!(cache.get("hub:a").await.is_some());
    }

    #[test]
    fn test_glob_matches() {
        assert!(glob_matches("routes:search:*", "routes:search:x:y:08:00:active"));
        assert!(glob_matches("routes:search:*:h1:*", "routes:search:h0:h1:08:00:active"));
        assert!(!glob_matches("routes:search:*:h1:*", "routes:search:h1:h2:08:00:active"));
        assert!(glob_matches("hub:abc", "hub:abc"));
        assert!(!glob_matches("hub:abc", "hub:abcd"));
        assert!(glob_matches("*", ""));
    }

    #[test]
    fn test_cache_key_builder() {
        let hub = Uuid::nil();
        let slot = NaiveTime::from_hms_opt(8, 15, 0).unwrap();
        assert_eq!(
            CacheKey::route_search(hub, None, 5000, slot, true),
            format!("routes:search:{}:none:5000m:08:15:active", hub)
        );
        assert_eq!(CacheKey::driver_stats(hub), format!("driver:stats:{}", hub));
        assert_eq!(CacheKey::hubs_near(12.97161, 77.59462, 3), "hubs:near:12.972:77.595");
        assert_eq!(CacheKey::hub_routes_pattern(None, Some(hub)), format!("routes:hubs:*:{}:*", hub));
    }
}
