//! Tenant resolution: wire model, route cache and the versioned
//! resolution-API client.
//!
//! `resolve` turns a tenant key into an ordered route list, consulting the
//! in-process cache first and falling back to the v2 then v1 protocol of
//! the external resolution API. Simultaneous misses for the same tenant
//! may each query the backend; the operation is idempotent so no
//! single-flight is maintained.

pub mod cache;
pub mod client;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ResolverConfig;
use crate::error::{GateError, GateResult};

pub use cache::RouteCache;
pub use client::ResolutionClient;

/// Backend wire scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// Route source tags with recognized semantics.
pub const SOURCE_AGENT: &str = "agent";
pub const SOURCE_TUNNEL: &str = "tunnel";

/// Optional per-route health-check description. Parsed and retained but
/// not exercised by the runtime (health is tracked passively).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteHealthCheck {
    pub path: String,
    #[serde(default)]
    pub host: Option<String>,
}

/// A single candidate backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    /// IPv4 or IPv6 literal
    pub ip: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Lower is more preferred
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default = "default_scheme")]
    pub scheme: Scheme,
    /// Free-form tag; "agent" and "tunnel" are recognized
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub health_check: Option<RouteHealthCheck>,
}

impl Default for Route {
    fn default() -> Self {
        Self {
            ip: String::new(),
            port: default_port(),
            priority: default_priority(),
            scheme: default_scheme(),
            source: String::new(),
            health_check: None,
        }
    }
}

impl Route {
    /// Wire protocol actually spoken to the backend. Tunnel routes are
    /// plain HTTP regardless of their advertised scheme.
    pub fn wire_scheme(&self) -> Scheme {
        if self.source == SOURCE_TUNNEL {
            Scheme::Http
        } else {
            self.scheme
        }
    }

    /// Host part for URL embedding; IPv6 literals get bracketed.
    pub fn host_part(&self) -> String {
        if self.ip.contains(':') {
            format!("[{}]", self.ip)
        } else {
            self.ip.clone()
        }
    }

    /// Passive-health map key.
    pub fn health_key(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

fn default_port() -> u16 {
    443
}

fn default_priority() -> i64 {
    999
}

fn default_scheme() -> Scheme {
    Scheme::Https
}

/// Resolution-API v2 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub domain_name: Option<String>,
    #[serde(default)]
    pub server_domain: Option<String>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub routes_ttl: Option<u64>,
    #[serde(default)]
    pub last_seen_online: Option<serde_json::Value>,
}

impl Resolution {
    /// Synthesize a resolution from cached routes.
    pub fn from_routes(routes: Vec<Route>) -> Self {
        Self {
            user_id: None,
            domain_name: None,
            server_domain: None,
            routes,
            routes_ttl: None,
            last_seen_online: None,
        }
    }
}

/// Legacy v1 response, reshaped into a single-route [`Resolution`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyResolution {
    pub host_ip: String,
    #[serde(default)]
    pub target_port: Option<u16>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub domain_name: Option<String>,
    #[serde(default)]
    pub server_domain: Option<String>,
}

impl LegacyResolution {
    pub fn into_resolution(self) -> Resolution {
        let route = Route {
            ip: self.host_ip,
            port: self.target_port.unwrap_or(443),
            priority: 1,
            ..Route::default()
        };
        Resolution {
            user_id: self.user_id,
            domain_name: self.domain_name,
            server_domain: self.server_domain,
            routes: vec![route],
            routes_ttl: None,
            last_seen_online: None,
        }
    }
}

/// Tenant resolver: cache in front of the versioned API client.
#[derive(Clone)]
pub struct Resolver {
    cache: RouteCache,
    client: ResolutionClient,
}

impl Resolver {
    pub fn new(config: &ResolverConfig, client: ResolutionClient) -> Self {
        let cache = RouteCache::new(
            Duration::from_secs(config.cache_ttl_secs),
            config.cache_max_entries,
        );
        Self { cache, client }
    }

    pub fn cache(&self) -> &RouteCache {
        &self.cache
    }

    /// Resolve a tenant to an ordered route list.
    pub async fn resolve(&self, tenant: &str) -> GateResult<Resolution> {
        if let Some(routes) = self.cache.get(tenant).await {
            debug!(tenant, routes = routes.len(), "route cache hit");
            return Ok(Resolution::from_routes(routes));
        }

        let resolution = self.resolve_remote(tenant).await?;
        if resolution.routes.is_empty() {
            return Err(GateError::no_routes(tenant));
        }

        let ttl_override = resolution.routes_ttl.map(Duration::from_secs);
        self.cache
            .insert(tenant, resolution.routes.clone(), ttl_override)
            .await;
        Ok(resolution)
    }

    /// Query the resolution API, v2 first, then the legacy v1 endpoint.
    ///
    /// `NOT_FOUND` is definitive only once both versions have been
    /// consulted; a 200 with an undecodable body aborts immediately (the
    /// backend is alive but broken, falling back would mask it).
    async fn resolve_remote(&self, tenant: &str) -> GateResult<Resolution> {
        let mut saw_not_found = false;

        match self.client.resolve_v2(tenant).await {
            Ok(resolution) => return Ok(resolution),
            Err(GateError::NotFound { .. }) => {
                debug!(tenant, "v2 resolution answered non-200, consulting v1");
                saw_not_found = true;
            }
            Err(err @ GateError::InvalidResponse { .. }) => return Err(err),
            Err(err) => {
                warn!(tenant, error = %err, "v2 resolution unreachable, falling back to v1");
            }
        }

        match self.client.resolve_v1(tenant).await {
            Ok(resolution) => Ok(resolution),
            Err(GateError::NotFound { .. }) => Err(GateError::not_found(tenant)),
            Err(err @ GateError::InvalidResponse { .. }) => Err(err),
            Err(err) => {
                if saw_not_found {
                    Err(GateError::not_found(tenant))
                } else {
                    Err(GateError::backend_unavailable(err.to_string()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_defaults_from_wire() {
        let route: Route = serde_json::from_str(r#"{"ip":"203.0.113.5"}"#).unwrap();
        assert_eq!(route.port, 443);
        assert_eq!(route.priority, 999);
        assert_eq!(route.scheme, Scheme::Https);
        assert_eq!(route.source, "");
        assert!(route.health_check.is_none());
    }

    #[test]
    fn test_route_full_wire_shape() {
        let route: Route = serde_json::from_str(
            r#"{
                "ip": "2001:db8::7",
                "port": 8443,
                "priority": 2,
                "scheme": "http",
                "source": "tunnel",
                "healthCheck": {"path": "/healthz", "host": "app.internal"}
            }"#,
        )
        .unwrap();
        assert_eq!(route.port, 8443);
        assert_eq!(route.scheme, Scheme::Http);
        assert_eq!(route.source, "tunnel");
        assert_eq!(route.health_check.as_ref().unwrap().path, "/healthz");
    }

    #[test]
    fn test_tunnel_forces_http() {
        let tunnel = Route {
            scheme: Scheme::Https,
            source: SOURCE_TUNNEL.to_string(),
            ..Route::default()
        };
        assert_eq!(tunnel.wire_scheme(), Scheme::Http);

        let agent = Route {
            scheme: Scheme::Https,
            source: SOURCE_AGENT.to_string(),
            ..Route::default()
        };
        assert_eq!(agent.wire_scheme(), Scheme::Https);
    }

    #[test]
    fn test_ipv6_host_part_bracketed() {
        let v6 = Route {
            ip: "2001:db8::7".to_string(),
            ..Route::default()
        };
        assert_eq!(v6.host_part(), "[2001:db8::7]");

        let v4 = Route {
            ip: "203.0.113.5".to_string(),
            ..Route::default()
        };
        assert_eq!(v4.host_part(), "203.0.113.5");
    }

    #[test]
    fn test_legacy_upgrade_law() {
        // {hostIp=X, targetPort=P} is equivalent to one v2 route at priority 1
        let legacy: LegacyResolution =
            serde_json::from_str(r#"{"hostIp":"198.51.100.9","targetPort":8080}"#).unwrap();
        let resolution = legacy.into_resolution();
        assert_eq!(resolution.routes.len(), 1);
        let route = &resolution.routes[0];
        assert_eq!(route.ip, "198.51.100.9");
        assert_eq!(route.port, 8080);
        assert_eq!(route.priority, 1);

        // Absent targetPort defaults to 443
        let legacy: LegacyResolution =
            serde_json::from_str(r#"{"hostIp":"198.51.100.9"}"#).unwrap();
        assert_eq!(legacy.into_resolution().routes[0].port, 443);
    }

    #[test]
    fn test_resolution_wire_names() {
        let resolution: Resolution = serde_json::from_str(
            r#"{
                "userId": "u-1",
                "domainName": "alice.example.com",
                "serverDomain": "example.com",
                "routes": [{"ip": "203.0.113.5", "priority": 1, "source": "agent"}],
                "routesTtl": 30
            }"#,
        )
        .unwrap();
        assert_eq!(resolution.user_id.as_deref(), Some("u-1"));
        assert_eq!(resolution.routes_ttl, Some(30));
        assert_eq!(resolution.routes[0].source, "agent");
    }
}
