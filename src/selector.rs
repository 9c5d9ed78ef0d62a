//! Failover-sequence construction.
//!
//! Routes are partitioned by passive health, each pool is stably sorted
//! by priority, and the pools are concatenated healthy-first. Unhealthy
//! routes stay in the sequence as last-resort fallbacks so the gateway
//! keeps serving when the health signal is stale.

use tracing::{debug, warn};

use crate::health::PassiveHealthStore;
use crate::resolver::{Route, SOURCE_AGENT, SOURCE_TUNNEL};

/// Forced-routing override from `X-Mesh-Force`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForceMode {
    #[default]
    None,
    Direct,
    Tunnel,
    Gateway,
}

/// Header carrying the forced-routing override.
pub const FORCE_HEADER: &str = "x-mesh-force";

impl ForceMode {
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("direct") => ForceMode::Direct,
            Some("tunnel") => ForceMode::Tunnel,
            Some("gateway") => ForceMode::Gateway,
            Some(other) if !other.is_empty() => {
                debug!(mode = other, "unrecognized force mode ignored");
                ForceMode::None
            }
            _ => ForceMode::None,
        }
    }
}

/// Build the ordered failover sequence for one request.
pub async fn select_routes(
    routes: &[Route],
    force: ForceMode,
    health: &PassiveHealthStore,
) -> Vec<Route> {
    match force {
        ForceMode::Direct => {
            if let Some(route) = routes.iter().find(|r| r.source == SOURCE_AGENT) {
                return vec![route.clone()];
            }
            warn!("force=direct requested but no agent route available, using normal ordering");
        }
        ForceMode::Tunnel => {
            if let Some(route) = routes.iter().find(|r| r.source == SOURCE_TUNNEL) {
                return vec![route.clone()];
            }
            warn!("force=tunnel requested but no tunnel route available, using normal ordering");
        }
        ForceMode::Gateway | ForceMode::None => {}
    }

    let mut healthy = Vec::new();
    let mut unhealthy = Vec::new();
    for route in routes {
        if health.is_unhealthy(route).await {
            unhealthy.push(route.clone());
        } else {
            healthy.push(route.clone());
        }
    }

    // sort_by_key is stable: ties keep their input order
    healthy.sort_by_key(|r| r.priority);
    unhealthy.sort_by_key(|r| r.priority);

    healthy.extend(unhealthy);
    healthy
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn store() -> PassiveHealthStore {
        PassiveHealthStore::new(3, Duration::from_secs(60))
    }

    fn route(ip: &str, priority: i64, source: &str) -> Route {
        Route {
            ip: ip.to_string(),
            priority,
            source: source.to_string(),
            ..Route::default()
        }
    }

    #[test]
    fn test_force_mode_parsing() {
        assert_eq!(ForceMode::from_header(None), ForceMode::None);
        assert_eq!(ForceMode::from_header(Some("")), ForceMode::None);
        assert_eq!(ForceMode::from_header(Some("direct")), ForceMode::Direct);
        assert_eq!(ForceMode::from_header(Some("Tunnel")), ForceMode::Tunnel);
        assert_eq!(ForceMode::from_header(Some("gateway")), ForceMode::Gateway);
        assert_eq!(ForceMode::from_header(Some("bogus")), ForceMode::None);
    }

    #[tokio::test]
    async fn test_priority_ordering() {
        let routes = vec![
            route("10.0.0.2", 5, "agent"),
            route("10.0.0.1", 1, "agent"),
            route("10.0.0.3", 3, "tunnel"),
        ];
        let seq = select_routes(&routes, ForceMode::None, &store()).await;
        let ips: Vec<&str> = seq.iter().map(|r| r.ip.as_str()).collect();
        assert_eq!(ips, vec!["10.0.0.1", "10.0.0.3", "10.0.0.2"]);
    }

    #[tokio::test]
    async fn test_tie_keeps_input_order() {
        let routes = vec![
            route("10.0.0.1", 1, "agent"),
            route("10.0.0.2", 1, "tunnel"),
            route("10.0.0.3", 1, "agent"),
        ];
        let seq = select_routes(&routes, ForceMode::None, &store()).await;
        let ips: Vec<&str> = seq.iter().map(|r| r.ip.as_str()).collect();
        assert_eq!(ips, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    }

    #[tokio::test]
    async fn test_unhealthy_demoted_not_dropped() {
        let health = store();
        let a = route("10.0.0.1", 1, "agent");
        let b = route("10.0.0.2", 2, "tunnel");
        for _ in 0..3 {
            health.mark_failed(&a).await;
        }

        let seq = select_routes(&[a.clone(), b.clone()], ForceMode::None, &health).await;
        let ips: Vec<&str> = seq.iter().map(|r| r.ip.as_str()).collect();
        assert_eq!(ips, vec!["10.0.0.2", "10.0.0.1"]);
    }

    #[tokio::test]
    async fn test_pools_sorted_independently() {
        let health = store();
        let routes = vec![
            route("10.0.0.4", 4, "agent"),
            route("10.0.0.1", 1, "agent"),
            route("10.0.0.3", 3, "agent"),
            route("10.0.0.2", 2, "agent"),
        ];
        // Demote priorities 1 and 3
        for _ in 0..3 {
            health.mark_failed(&routes[1]).await;
            health.mark_failed(&routes[2]).await;
        }

        let seq = select_routes(&routes, ForceMode::None, &health).await;
        let ips: Vec<&str> = seq.iter().map(|r| r.ip.as_str()).collect();
        // healthy sorted, then unhealthy sorted
        assert_eq!(ips, vec!["10.0.0.2", "10.0.0.4", "10.0.0.1", "10.0.0.3"]);
    }

    #[tokio::test]
    async fn test_force_direct_singleton() {
        let health = store();
        let a = route("10.0.0.1", 2, "agent");
        let b = route("10.0.0.2", 1, "tunnel");
        // Even an unhealthy agent route is selected under force=direct
        for _ in 0..3 {
            health.mark_failed(&a).await;
        }

        let seq = select_routes(&[a, b], ForceMode::Direct, &health).await;
        assert_eq!(seq.len(), 1);
        assert_eq!(seq[0].ip, "10.0.0.1");
    }

    #[tokio::test]
    async fn test_force_tunnel_singleton() {
        let routes = vec![route("10.0.0.1", 1, "agent"), route("10.0.0.2", 2, "tunnel")];
        let seq = select_routes(&routes, ForceMode::Tunnel, &store()).await;
        assert_eq!(seq.len(), 1);
        assert_eq!(seq[0].ip, "10.0.0.2");
    }

    #[tokio::test]
    async fn test_force_falls_through_when_source_missing() {
        let routes = vec![
            route("10.0.0.2", 2, "agent"),
            route("10.0.0.1", 1, "agent"),
        ];
        let seq = select_routes(&routes, ForceMode::Tunnel, &store()).await;
        assert_eq!(seq.len(), 2);
        assert_eq!(seq[0].ip, "10.0.0.1");
    }

    #[tokio::test]
    async fn test_gateway_mode_uses_normal_ordering() {
        let routes = vec![route("10.0.0.1", 1, "agent"), route("10.0.0.2", 2, "tunnel")];
        let seq = select_routes(&routes, ForceMode::Gateway, &store()).await;
        assert_eq!(seq.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let seq = select_routes(&[], ForceMode::None, &store()).await;
        assert!(seq.is_empty());
    }
}
