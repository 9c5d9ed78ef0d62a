//! Passive backend health tracking.
//!
//! No active probing: health is inferred from the proxy engine's own
//! traffic. Each transport failure increments a per-route counter, any
//! success clears it, and a route whose counter reaches the threshold is
//! demoted to the back of the failover sequence (never dropped).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

use crate::resolver::Route;

#[derive(Debug, Clone)]
struct PassiveEntry {
    consecutive_failures: u32,
    expires_at: Instant,
}

/// Shared passive-health store, keyed by `ip:port`.
#[derive(Clone)]
pub struct PassiveHealthStore {
    entries: Arc<RwLock<HashMap<String, PassiveEntry>>>,
    failure_threshold: u32,
    entry_ttl: Duration,
}

impl PassiveHealthStore {
    pub fn new(failure_threshold: u32, entry_ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            failure_threshold,
            entry_ttl,
        }
    }

    /// Record a transport failure against a route. Increments the counter
    /// (or initializes it at 1) and refreshes the entry TTL. Expired
    /// entries restart from 1.
    pub async fn mark_failed(&self, route: &Route) -> u32 {
        let key = route.health_key();
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        let entry = entries
            .entry(key.clone())
            .and_modify(|e| {
                if e.expires_at <= now {
                    e.consecutive_failures = 1;
                } else {
                    e.consecutive_failures += 1;
                }
                e.expires_at = now + self.entry_ttl;
            })
            .or_insert(PassiveEntry {
                consecutive_failures: 1,
                expires_at: now + self.entry_ttl,
            });

        let failures = entry.consecutive_failures;
        if failures == self.failure_threshold {
            debug!(route = %key, failures, "route is now passively unhealthy");
        }
        failures
    }

    /// Record a successful proxy attempt: the failure counter is cleared.
    pub async fn mark_healthy(&self, route: &Route) {
        let key = route.health_key();
        let mut entries = self.entries.write().await;
        if entries.remove(&key).is_some() {
            debug!(route = %key, "route failure counter cleared");
        }
    }

    /// Whether a route is currently passively unhealthy. Expiry is
    /// observed at read time; stale entries count as healthy.
    pub async fn is_unhealthy(&self, route: &Route) -> bool {
        let entries = self.entries.read().await;
        match entries.get(&route.health_key()) {
            Some(e) if e.expires_at > Instant::now() => {
                e.consecutive_failures >= self.failure_threshold
            }
            _ => false,
        }
    }

    /// Current failure count for a route (0 when absent or expired).
    pub async fn failure_count(&self, route: &Route) -> u32 {
        let entries = self.entries.read().await;
        match entries.get(&route.health_key()) {
            Some(e) if e.expires_at > Instant::now() => e.consecutive_failures,
            _ => 0,
        }
    }
}
