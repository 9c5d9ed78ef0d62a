//! Tenant-key extraction from the request host.
//!
//! Deployments use both dotted (`app.alice.example.com`) and dashed
//! (`filebrowser-alice.example.com`) subdomain conventions; in either case
//! the tenant key is the rightmost "word" of the subdomain prefix.

use hyper::header::HOST;
use hyper::{Body, Request};

/// Header that overrides `Host` for tenant extraction (CDN-fallback mode).
pub const ROUTE_HOST_HEADER: &str = "x-mesh-route-host";

/// Extract the tenant key from a host value.
///
/// The host must be a proper subdomain of `server_domain`: it has to end
/// with `".{server_domain}"` and carry a non-empty prefix. Returns `None`
/// when it does not.
pub fn extract_tenant(host: &str, server_domain: &str) -> Option<String> {
    let host = host.split(':').next().unwrap_or(host);

    let suffix = format!(".{}", server_domain);
    if !host.ends_with(&suffix) {
        return None;
    }

    let prefix = &host[..host.len() - suffix.len()];
    if prefix.is_empty() {
        return None;
    }

    // Rightmost dot segment, then rightmost dash segment within it.
    let label = prefix.rsplit('.').next()?;
    let tenant = match label.rfind('-') {
        Some(idx) => &label[idx + 1..],
        None => label,
    };

    if tenant.is_empty() {
        None
    } else {
        Some(tenant.to_string())
    }
}

/// The host value a request is routed by: `X-Mesh-Route-Host` wins over
/// `Host`. Returns `None` when neither is present or readable.
pub fn routing_host(req: &Request<Body>) -> Option<String> {
    let headers = req.headers();
    headers
        .get(ROUTE_HOST_HEADER)
        .or_else(|| headers.get(HOST))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const S: &str = "example.com";

    #[test]
    fn test_plain_subdomain() {
        assert_eq!(extract_tenant("alice.example.com", S).as_deref(), Some("alice"));
    }

    #[test]
    fn test_dotted_prefix_takes_last_segment() {
        assert_eq!(
            extract_tenant("app.alice.example.com", S).as_deref(),
            Some("alice")
        );
        assert_eq!(
            extract_tenant("deep.nested.app.bob.example.com", S).as_deref(),
            Some("bob")
        );
    }

    #[test]
    fn test_dashed_prefix_takes_after_last_dash() {
        assert_eq!(
            extract_tenant("filebrowser-alice.example.com", S).as_deref(),
            Some("alice")
        );
        assert_eq!(
            extract_tenant("foo-bar-alice.example.com", S).as_deref(),
            Some("alice")
        );
    }

    #[test]
    fn test_accepted_shapes_agree() {
        // Parse("app.{t}.{S}") == Parse("{t}.{S}") == Parse("app-{t}.{S}")
        let dotted = extract_tenant("app.carol.example.com", S);
        let plain = extract_tenant("carol.example.com", S);
        let dashed = extract_tenant("app-carol.example.com", S);
        assert_eq!(dotted.as_deref(), Some("carol"));
        assert_eq!(dotted, plain);
        assert_eq!(plain, dashed);
    }

    #[test]
    fn test_port_suffix_stripped() {
        assert_eq!(
            extract_tenant("alice.example.com:443", S).as_deref(),
            Some("alice")
        );
    }

    #[test]
    fn test_suffix_must_match_properly() {
        // Bare apex is not a subdomain
        assert_eq!(extract_tenant("example.com", S), None);
        // Different domain entirely
        assert_eq!(extract_tenant("alice.other.com", S), None);
        // Suffix matching must be on label boundaries
        assert_eq!(extract_tenant("aliceexample.com", S), None);
        assert_eq!(extract_tenant("alice.badexample.com", S), None);
    }

    #[test]
    fn test_trailing_dash_is_empty_tenant() {
        assert_eq!(extract_tenant("foo-.example.com", S), None);
    }

    #[test]
    fn test_empty_host() {
        assert_eq!(extract_tenant("", S), None);
        assert_eq!(extract_tenant(":8080", S), None);
    }

    #[test]
    fn test_routing_host_override() {
        let req = Request::builder()
            .header("host", "alice.example.com")
            .header("x-mesh-route-host", "bob.example.com")
            .body(Body::empty())
            .unwrap();
        assert_eq!(routing_host(&req).as_deref(), Some("bob.example.com"));

        let req = Request::builder()
            .header("host", "alice.example.com")
            .body(Body::empty())
            .unwrap();
        assert_eq!(routing_host(&req).as_deref(), Some("alice.example.com"));

        let req = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(routing_host(&req), None);
    }
}
