//! In-process route cache with per-entry TTL.
//!
//! Entries are checked for expiry on every read, a background sweeper
//! removes the ones nobody reads again, and a capacity bound evicts the
//! soonest-to-expire entries when the map is full. There is no explicit
//! invalidation surface.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::debug;

use crate::resolver::Route;

#[derive(Debug, Clone)]
struct CacheEntry {
    routes: Vec<Route>,
    expires_at: Instant,
}

/// Shared tenant → routes cache.
#[derive(Clone)]
pub struct RouteCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    ttl: Duration,
    max_entries: usize,
}

impl RouteCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            max_entries,
        }
    }

    /// Cached routes for a tenant, if present and not expired.
    pub async fn get(&self, tenant: &str) -> Option<Vec<Route>> {
        let entries = self.entries.read().await;
        match entries.get(tenant) {
            Some(entry) if entry.expires_at > Instant::now() && !entry.routes.is_empty() => {
                Some(entry.routes.clone())
            }
            _ => None,
        }
    }

    /// Insert routes for a tenant. `ttl_override` (from the resolution's
    /// own `routesTtl`) wins over the configured default.
    pub async fn insert(&self, tenant: &str, routes: Vec<Route>, ttl_override: Option<Duration>) {
        let ttl = ttl_override.unwrap_or(self.ttl);
        let entry = CacheEntry {
            routes,
            expires_at: Instant::now() + ttl,
        };

        let mut entries = self.entries.write().await;
        if !entries.contains_key(tenant) && entries.len() >= self.max_entries {
            Self::evict_one(&mut entries);
        }
        entries.insert(tenant.to_string(), entry);
    }

    /// Number of entries currently held (expired included until swept).
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Spawn the periodic sweep that drops expired entries.
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let entries = Arc::clone(&self.entries);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                let now = Instant::now();
                let mut map = entries.write().await;
                let before = map.len();
                map.retain(|_, entry| entry.expires_at > now);
                let swept = before - map.len();
                if swept > 0 {
                    debug!(swept, remaining = map.len(), "route cache sweep");
                }
            }
        })
    }

    /// Drop the entry closest to expiry to make room. Expired entries go
    /// first by construction.
    fn evict_one(entries: &mut HashMap<String, CacheEntry>) {
        if let Some(key) = entries
            .iter()
            .min_by_key(|(_, entry)| entry.expires_at)
            .map(|(key, _)| key.clone())
        {
            debug!(tenant = %key, "route cache full, evicting");
            entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(ip: &str) -> Route {
        Route {
            ip: ip.to_string(),
            ..Route::default()
        }
    }

    #[tokio::test]
    async fn test_hit_and_miss() {
        let cache = RouteCache::new(Duration::from_secs(60), 16);
        assert!(cache.get("alice").await.is_none());

        cache.insert("alice", vec![route("10.0.0.1")], None).await;
        let routes = cache.get("alice").await.unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].ip, "10.0.0.1");
        assert!(cache.get("bob").await.is_none());
    }

    #[tokio::test]
    async fn test_entries_expire_on_read() {
        let cache = RouteCache::new(Duration::from_millis(20), 16);
        cache.insert("alice", vec![route("10.0.0.1")], None).await;
        assert!(cache.get("alice").await.is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get("alice").await.is_none());
    }

    #[tokio::test]
    async fn test_ttl_override_wins() {
        let cache = RouteCache::new(Duration::from_secs(60), 16);
        cache
            .insert(
                "alice",
                vec![route("10.0.0.1")],
                Some(Duration::from_millis(20)),
            )
            .await;
        assert!(cache.get("alice").await.is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get("alice").await.is_none());
    }

    #[tokio::test]
    async fn test_empty_route_lists_never_served() {
        let cache = RouteCache::new(Duration::from_secs(60), 16);
        cache.insert("alice", vec![], None).await;
        assert!(cache.get("alice").await.is_none());
    }

    #[tokio::test]
    async fn test_capacity_bound_evicts() {
        let cache = RouteCache::new(Duration::from_secs(60), 3);
        cache.insert("a", vec![route("10.0.0.1")], None).await;
        cache.insert("b", vec![route("10.0.0.2")], None).await;
        cache.insert("c", vec![route("10.0.0.3")], None).await;
        cache.insert("d", vec![route("10.0.0.4")], None).await;

        assert_eq!(cache.len().await, 3);
        // "a" was inserted first, so it sits closest to expiry
        assert!(cache.get("a").await.is_none());
        assert!(cache.get("d").await.is_some());
    }

    #[tokio::test]
    async fn test_reinsert_does_not_evict() {
        let cache = RouteCache::new(Duration::from_secs(60), 2);
        cache.insert("a", vec![route("10.0.0.1")], None).await;
        cache.insert("b", vec![route("10.0.0.2")], None).await;
        cache.insert("a", vec![route("10.0.0.9")], None).await;

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get("a").await.unwrap()[0].ip, "10.0.0.9");
        assert!(cache.get("b").await.is_some());
    }

    #[tokio::test]
    async fn test_sweeper_removes_expired() {
        let cache = RouteCache::new(Duration::from_millis(10), 16);
        cache.insert("alice", vec![route("10.0.0.1")], None).await;
        assert_eq!(cache.len().await, 1);

        let sweeper = cache.spawn_sweeper(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.len().await, 0);
        sweeper.abort();
    }
}
