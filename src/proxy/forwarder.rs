//! Per-route proxy attempts and the failover loop.
//!
//! Each attempt dials the route itself: TCP connect under the configured
//! timeout, then for HTTPS a rustls handshake with SNI set to the original
//! host (never the raw IP), then a dedicated hyper connection. A response
//! with any HTTP status is success and is forwarded verbatim; only
//! transport failures before response headers advance the loop.

use hyper::client::conn;
use hyper::header::{HeaderValue, CONTENT_TYPE, HOST};
use hyper::{Body, HeaderMap, Method, Request, Response, StatusCode, Uri};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::config::ProxyConfig;
use crate::error::{GateError, GateResult};
use crate::health::PassiveHealthStore;
use crate::proxy::{
    strip_hop_by_hop_headers, BufferedBody, RequestContext, REQUEST_ID_HEADER, ROUTE_TRACE_HEADER,
};
use crate::resolver::{Route, Scheme};
use crate::tls;

/// Trust policy for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsVerify {
    /// Verify against the CA bundle loaded at startup
    CaBundle,
    /// No verification; reserved for the default-backend branch
    Disabled,
}

/// One concrete dial target.
#[derive(Debug, Clone)]
pub struct AttemptTarget {
    pub scheme: Scheme,
    /// Unbracketed IP literal or hostname
    pub host: String,
    pub port: u16,
    pub sni_host: String,
    pub verify: TlsVerify,
}

impl AttemptTarget {
    fn from_route(route: &Route, ctx: &RequestContext) -> Self {
        Self {
            scheme: route.wire_scheme(),
            host: route.ip.clone(),
            port: route.port,
            sni_host: ctx.sni_host().to_string(),
            verify: TlsVerify::CaBundle,
        }
    }

    /// Connect address; IPv6 literals get bracketed.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Engine executing requests along a failover sequence.
#[derive(Clone)]
pub struct ProxyEngine {
    connect_timeout: Duration,
    failover_max_attempts: usize,
    health: PassiveHealthStore,
    route_tls: Arc<rustls::ClientConfig>,
    insecure_tls: Arc<rustls::ClientConfig>,
}

impl ProxyEngine {
    pub fn new(
        config: &ProxyConfig,
        health: PassiveHealthStore,
        route_tls: rustls::ClientConfig,
    ) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            failover_max_attempts: config.failover_max_attempts,
            health,
            route_tls: Arc::new(route_tls),
            insecure_tls: Arc::new(tls::insecure_client_config()),
        }
    }

    /// Try the failover sequence in order and forward the first response.
    pub async fn proxy_with_failover(
        &self,
        sequence: &[Route],
        ctx: &RequestContext,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: &BufferedBody,
    ) -> Response<Body> {
        let attempts = sequence.len().min(self.failover_max_attempts);
        let mut tried: Vec<String> = Vec::new();

        for route in &sequence[..attempts] {
            let target = AttemptTarget::from_route(route, ctx);
            tried.push(route.source.clone());

            let req = match build_attempt_request(ctx, method, uri, headers, body.to_body(), true)
            {
                Ok(req) => req,
                Err(e) => {
                    warn!(req_id = %ctx.req_id, error = %e, "cannot build upstream request");
                    break;
                }
            };

            debug!(
                req_id = %ctx.req_id,
                target = %target.address(),
                scheme = target.scheme.as_str(),
                source = %route.source,
                attempt = tried.len(),
                "proxy attempt"
            );

            match self.dispatch(&target, req).await {
                Ok(response) => {
                    self.health.mark_healthy(route).await;
                    metrics::counter!("meshgate_proxy_attempts_total", &[("outcome", "success")])
                        .increment(1);

                    let mut response = downstream_response(response);
                    if ctx.trace {
                        let chain = format!("{},pcs", tried.join(","));
                        if let Ok(value) = HeaderValue::from_str(&chain) {
                            response.headers_mut().insert(ROUTE_TRACE_HEADER, value);
                        }
                    }
                    return response;
                }
                Err(e) => {
                    let failures = self.health.mark_failed(route).await;
                    metrics::counter!("meshgate_proxy_attempts_total", &[("outcome", "failure")])
                        .increment(1);
                    warn!(
                        req_id = %ctx.req_id,
                        target = %target.address(),
                        error = %e,
                        failures,
                        retriable = e.is_retriable(),
                        "proxy attempt failed"
                    );
                    if !e.is_retriable() {
                        break;
                    }
                }
            }
        }

        routes_exhausted_response(ctx, &tried)
    }

    /// Single attempt against the configured default backend. Same header
    /// semantics as a route attempt, no failover, no TLS verification.
    pub async fn proxy_default_backend(
        &self,
        backend_url: &str,
        ctx: &RequestContext,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: &BufferedBody,
    ) -> GateResult<Response<Body>> {
        let base: Uri = backend_url.parse()?;
        let scheme = match base.scheme_str() {
            Some("https") => Scheme::Https,
            _ => Scheme::Http,
        };
        let host = base
            .host()
            .ok_or_else(|| GateError::config(format!("default backend URL has no host: {}", backend_url)))?
            .to_string();
        let port = base.port_u16().unwrap_or(match scheme {
            Scheme::Https => 443,
            Scheme::Http => 80,
        });
        let target = AttemptTarget {
            scheme,
            host: host.clone(),
            port,
            sni_host: host,
            verify: TlsVerify::Disabled,
        };

        debug!(req_id = %ctx.req_id, target = %target.address(), "default backend attempt");
        let req = build_attempt_request(ctx, method, uri, headers, body.to_body(), true)?;
        let response = self.dispatch(&target, req).await?;
        Ok(downstream_response(response))
    }

    /// Dial a target and run one HTTP exchange over a fresh connection.
    pub(crate) async fn dispatch(
        &self,
        target: &AttemptTarget,
        req: Request<Body>,
    ) -> GateResult<Response<Body>> {
        let addr = target.address();
        let tcp = timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| GateError::timeout(self.connect_timeout, format!("connect {}", addr)))?
            .map_err(|e| GateError::connect(&addr, e.to_string()))?;
        let _ = tcp.set_nodelay(true);

        match target.scheme {
            Scheme::Http => self.exchange(tcp, req, &addr).await,
            Scheme::Https => {
                let config = match target.verify {
                    TlsVerify::CaBundle => Arc::clone(&self.route_tls),
                    TlsVerify::Disabled => Arc::clone(&self.insecure_tls),
                };
                let connector = TlsConnector::from(config);
                let sni = tls::server_name(&target.sni_host)?;
                let stream = timeout(self.connect_timeout, connector.connect(sni, tcp))
                    .await
                    .map_err(|_| {
                        GateError::timeout(self.connect_timeout, format!("TLS handshake {}", addr))
                    })?
                    .map_err(|e| GateError::tls_handshake(&addr, e.to_string()))?;
                self.exchange(stream, req, &addr).await
            }
        }
    }

    async fn exchange<S>(
        &self,
        stream: S,
        req: Request<Body>,
        label: &str,
    ) -> GateResult<Response<Body>>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sender, connection) = conn::Builder::new()
            .handshake::<_, Body>(stream)
            .await
            .map_err(|e| GateError::upstream(label, e.to_string()))?;

        let conn_label = label.to_string();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(target = %conn_label, error = %e, "backend connection closed with error");
            }
        });

        sender
            .send_request(req)
            .await
            .map_err(|e| GateError::upstream(label, e.to_string()))
    }
}

/// Build the request sent on one attempt: origin-form URI, forwarding
/// headers applied. The upgrade path passes `strip_hop = false` to keep
/// its `Upgrade`/`Connection` headers intact.
pub(crate) fn build_attempt_request(
    ctx: &RequestContext,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Body,
    strip_hop: bool,
) -> GateResult<Request<Body>> {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let mut req = Request::builder()
        .method(method.clone())
        .uri(path_and_query)
        .body(body)?;

    let mut out_headers = headers.clone();
    if strip_hop {
        strip_hop_by_hop_headers(&mut out_headers);
    }
    apply_forwarding_headers(&mut out_headers, ctx)?;
    *req.headers_mut() = out_headers;
    Ok(req)
}

fn apply_forwarding_headers(headers: &mut HeaderMap, ctx: &RequestContext) -> GateResult<()> {
    let client_ip = ctx.client_addr.ip().to_string();

    headers.insert(HOST, header_value(&ctx.proxy_host)?);
    headers.insert("x-real-ip", header_value(&client_ip)?);

    let forwarded_for = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{}, {}", existing, client_ip),
        None => client_ip,
    };
    headers.insert("x-forwarded-for", header_value(&forwarded_for)?);
    headers.insert(
        "x-forwarded-proto",
        HeaderValue::from_static(ctx.client_scheme.as_str()),
    );
    headers.insert("x-forwarded-host", header_value(&ctx.original_host)?);
    headers.insert(REQUEST_ID_HEADER, header_value(&ctx.req_id)?);
    Ok(())
}

fn header_value(value: &str) -> GateResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| GateError::internal(format!("invalid header value {:?}: {}", value, e)))
}

/// Forward an upstream response downstream, minus hop-by-hop headers.
pub(crate) fn downstream_response(upstream: Response<Body>) -> Response<Body> {
    let (mut parts, body) = upstream.into_parts();
    strip_hop_by_hop_headers(&mut parts.headers);
    Response::from_parts(parts, body)
}

fn routes_exhausted_response(ctx: &RequestContext, tried: &[String]) -> Response<Body> {
    let body = serde_json::json!({
        "error": "All backend routes failed",
        "code": "ROUTES_EXHAUSTED",
    });

    let mut builder = Response::builder()
        .status(StatusCode::BAD_GATEWAY)
        .header(CONTENT_TYPE, "application/json");
    if ctx.trace {
        builder = builder.header(ROUTE_TRACE_HEADER, format!("{},failed", tried.join(",")));
    }
    builder
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
