//! The proxy engine: request dispatch, per-route attempts with failover,
//! the streaming upgrade path and the listeners feeding them.

pub mod body;
pub mod forwarder;
pub mod handler;
pub mod server;
pub mod upgrade;

use hyper::HeaderMap;
use std::net::SocketAddr;

pub use body::BufferedBody;
pub use forwarder::ProxyEngine;
pub use handler::GatewayHandler;
pub use server::GatewayServer;

/// Presence of this request header enables the `X-Mesh-Route` response
/// header describing the attempted route chain.
pub const TRACE_HEADER: &str = "x-mesh-trace";

/// Response header carrying the attempted route chain when tracing.
pub const ROUTE_TRACE_HEADER: &str = "x-mesh-route";

/// Request id header stamped on every upstream request.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Which listener a request came in on; recorded for `X-Forwarded-Proto`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerScheme {
    Http,
    Https,
}

impl ListenerScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerScheme::Http => "http",
            ListenerScheme::Https => "https",
        }
    }
}

/// Connection metadata injected into request extensions by the listeners.
#[derive(Debug, Clone, Copy)]
pub struct ClientMeta {
    pub remote_addr: SocketAddr,
    pub scheme: ListenerScheme,
}

/// Per-request context threaded through resolution and proxying.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// 24-bit hex request id
    pub req_id: String,
    /// Value of the incoming `Host` header; forwarded as `X-Forwarded-Host`
    pub original_host: String,
    /// Host the request is routed by; forwarded as `Host`
    pub proxy_host: String,
    pub client_addr: SocketAddr,
    pub client_scheme: ListenerScheme,
    /// Whether `X-Mesh-Route` tracing is enabled
    pub trace: bool,
}

impl RequestContext {
    /// SNI host for TLS routes: the original host without any port.
    pub fn sni_host(&self) -> &str {
        self.original_host
            .split(':')
            .next()
            .unwrap_or(&self.original_host)
    }
}

/// Generate a 24-bit hex request id.
pub fn generate_req_id() -> String {
    format!("{:06x}", rand::random::<u32>() & 0x00ff_ffff)
}

const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub(crate) fn is_hop_by_hop_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    HOP_BY_HOP_HEADERS.iter().any(|h| *h == lower)
}

pub(crate) fn strip_hop_by_hop_headers(headers: &mut HeaderMap) {
    // Headers named by the Connection header are hop-by-hop too
    let extra: Vec<String> = headers
        .get("connection")
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_ascii_lowercase())
                .collect()
        })
        .unwrap_or_default();

    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
    for name in extra {
        headers.remove(name.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_req_id_is_24_bit_hex() {
        for _ in 0..64 {
            let id = generate_req_id();
            assert_eq!(id.len(), 6);
            assert!(u32::from_str_radix(&id, 16).unwrap() <= 0x00ff_ffff);
        }
    }

    #[test]
    fn test_hop_by_hop_detection() {
        assert!(is_hop_by_hop_header("Connection"));
        assert!(is_hop_by_hop_header("keep-alive"));
        assert!(is_hop_by_hop_header("TRANSFER-ENCODING"));
        assert!(is_hop_by_hop_header("Trailer"));
        assert!(!is_hop_by_hop_header("Content-Type"));
        assert!(!is_hop_by_hop_header("Authorization"));
    }

    #[test]
    fn test_strip_connection_named_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", "close, x-custom-hop".parse().unwrap());
        headers.insert("x-custom-hop", "1".parse().unwrap());
        headers.insert("content-type", "text/plain".parse().unwrap());

        strip_hop_by_hop_headers(&mut headers);
        assert!(headers.get("connection").is_none());
        assert!(headers.get("x-custom-hop").is_none());
        assert!(headers.get("content-type").is_some());
    }

    #[test]
    fn test_sni_host_strips_port() {
        let ctx = RequestContext {
            req_id: "abc123".into(),
            original_host: "alice.example.com:443".into(),
            proxy_host: "alice.example.com:443".into(),
            client_addr: "127.0.0.1:5000".parse().unwrap(),
            client_scheme: ListenerScheme::Https,
            trace: false,
        };
        assert_eq!(ctx.sni_host(), "alice.example.com");
    }
}
