//! Per-request orchestration.
//!
//! `PARSE → RESOLVE → SELECT → (UPGRADE → WS_STREAM | PROXY_TRY loop |
//! default backend)`. Every log line carries the request's `req_id` so the
//! full decision chain is reconstructable from logs alone.

use hyper::header::{CONTENT_TYPE, HOST};
use hyper::{Body, Request, Response, StatusCode};
use std::convert::Infallible;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::GateError;
use crate::health::PassiveHealthStore;
use crate::proxy::{
    generate_req_id, upgrade, BufferedBody, ClientMeta, ListenerScheme, ProxyEngine,
    RequestContext, TRACE_HEADER,
};
use crate::resolver::Resolver;
use crate::selector::{select_routes, ForceMode, FORCE_HEADER};
use crate::tenant;

/// Shared request handler behind every listener.
#[derive(Clone)]
pub struct GatewayHandler {
    server_domain: String,
    default_backend: Option<String>,
    resolver: Resolver,
    health: PassiveHealthStore,
    engine: ProxyEngine,
    spool_threshold: u64,
    max_body_bytes: u64,
}

impl GatewayHandler {
    pub fn new(
        config: &Config,
        resolver: Resolver,
        health: PassiveHealthStore,
        engine: ProxyEngine,
    ) -> Self {
        Self {
            server_domain: config.domain.server_domain.clone(),
            default_backend: config.domain.default_backend().map(String::from),
            resolver,
            health,
            engine,
            spool_threshold: config.proxy.spool_threshold_bytes,
            max_body_bytes: config.proxy.max_body_bytes,
        }
    }

    pub async fn handle_request(&self, req: Request<Body>) -> Result<Response<Body>, Infallible> {
        let started = Instant::now();
        let req_id = generate_req_id();
        let host = tenant::routing_host(&req).unwrap_or_default();

        let response = self.process_request(&req_id, req).await;

        let status = response.status();
        let elapsed = started.elapsed();
        metrics::counter!(
            "meshgate_requests_total",
            &[("status", status_class(status))]
        )
        .increment(1);
        metrics::histogram!("meshgate_request_duration_seconds").record(elapsed.as_secs_f64());
        info!(
            req_id = %req_id,
            host = %host,
            status = status.as_u16(),
            elapsed_ms = elapsed.as_millis() as u64,
            "request complete"
        );

        Ok(response)
    }

    async fn process_request(&self, req_id: &str, req: Request<Body>) -> Response<Body> {
        let meta = req
            .extensions()
            .get::<ClientMeta>()
            .copied()
            .unwrap_or(ClientMeta {
                remote_addr: std::net::SocketAddr::from(([0, 0, 0, 0], 0)),
                scheme: ListenerScheme::Http,
            });

        let Some(proxy_host) = tenant::routing_host(&req) else {
            warn!(req_id, "request carries no usable host");
            return error_response(StatusCode::BAD_REQUEST, "NO_HOST", "No usable host");
        };
        let original_host = req
            .headers()
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_else(|| proxy_host.clone());

        let ctx = RequestContext {
            req_id: req_id.to_string(),
            original_host,
            proxy_host: proxy_host.clone(),
            client_addr: meta.remote_addr,
            client_scheme: meta.scheme,
            trace: req.headers().contains_key(TRACE_HEADER),
        };
        let force = ForceMode::from_header(
            req.headers()
                .get(FORCE_HEADER)
                .and_then(|v| v.to_str().ok()),
        );

        let Some(tenant_key) = tenant::extract_tenant(&proxy_host, &self.server_domain) else {
            debug!(req_id, host = %proxy_host, "host is not a tenant subdomain");
            return self
                .default_backend_or(
                    &ctx,
                    req,
                    StatusCode::NOT_FOUND,
                    "INVALID_SUBDOMAIN",
                    "Host is not a tenant subdomain",
                )
                .await;
        };

        let resolution = match self.resolver.resolve(&tenant_key).await {
            Ok(resolution) => resolution,
            Err(e @ GateError::NotFound { .. }) => {
                debug!(req_id, tenant = %tenant_key, "tenant unknown");
                return self
                    .default_backend_or(&ctx, req, StatusCode::NOT_FOUND, "NOT_FOUND", &e.to_string())
                    .await;
            }
            Err(e @ GateError::NoRoutes { .. }) => {
                debug!(req_id, tenant = %tenant_key, "tenant has no routes");
                return self
                    .default_backend_or(&ctx, req, StatusCode::NOT_FOUND, "NO_ROUTES", &e.to_string())
                    .await;
            }
            Err(e @ GateError::InvalidResponse { .. }) => {
                error!(req_id, tenant = %tenant_key, error = %e, "resolution body undecodable");
                return error_response(StatusCode::BAD_GATEWAY, "INVALID_RESPONSE", &e.to_string());
            }
            Err(e) => {
                error!(req_id, tenant = %tenant_key, error = %e, "resolution backend unavailable");
                return error_response(
                    StatusCode::BAD_GATEWAY,
                    "BACKEND_UNAVAILABLE",
                    &e.to_string(),
                );
            }
        };

        let sequence = select_routes(&resolution.routes, force, &self.health).await;
        debug!(
            req_id,
            tenant = %tenant_key,
            routes = sequence.len(),
            first = %sequence[0].health_key(),
            "failover sequence selected"
        );

        if upgrade::is_upgrade_request(&req) {
            return match upgrade::relay(&self.engine, &sequence[0], &ctx, req).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(req_id, error = %e, "upgrade relay failed");
                    error_response(StatusCode::BAD_GATEWAY, "UPGRADE_FAILED", &e.to_string())
                }
            };
        }

        let (parts, body) = req.into_parts();
        let buffered =
            match BufferedBody::buffer(body, self.spool_threshold, self.max_body_bytes).await {
                Ok(buffered) => buffered,
                Err(e @ GateError::PayloadTooLarge { .. }) => {
                    warn!(req_id, error = %e, "request body over ceiling");
                    return error_response(
                        StatusCode::PAYLOAD_TOO_LARGE,
                        "PAYLOAD_TOO_LARGE",
                        &e.to_string(),
                    );
                }
                Err(e) => {
                    warn!(req_id, error = %e, "request body read failed");
                    return error_response(StatusCode::BAD_REQUEST, "BODY_READ_FAILED", &e.to_string());
                }
            };

        self.engine
            .proxy_with_failover(
                &sequence,
                &ctx,
                &parts.method,
                &parts.uri,
                &parts.headers,
                &buffered,
            )
            .await
    }

    /// Route to the default backend when configured, else answer `status`.
    async fn default_backend_or(
        &self,
        ctx: &RequestContext,
        req: Request<Body>,
        status: StatusCode,
        code: &str,
        message: &str,
    ) -> Response<Body> {
        let Some(backend_url) = self.default_backend.clone() else {
            return error_response(status, code, message);
        };

        debug!(req_id = %ctx.req_id, backend = %backend_url, "routing to default backend");
        let (parts, body) = req.into_parts();
        let buffered =
            match BufferedBody::buffer(body, self.spool_threshold, self.max_body_bytes).await {
                Ok(buffered) => buffered,
                Err(e @ GateError::PayloadTooLarge { .. }) => {
                    return error_response(
                        StatusCode::PAYLOAD_TOO_LARGE,
                        "PAYLOAD_TOO_LARGE",
                        &e.to_string(),
                    );
                }
                Err(e) => {
                    return error_response(StatusCode::BAD_REQUEST, "BODY_READ_FAILED", &e.to_string());
                }
            };

        match self
            .engine
            .proxy_default_backend(
                &backend_url,
                ctx,
                &parts.method,
                &parts.uri,
                &parts.headers,
                &buffered,
            )
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(req_id = %ctx.req_id, error = %e, "default backend failed");
                error_response(
                    StatusCode::BAD_GATEWAY,
                    "DEFAULT_BACKEND_FAILED",
                    &e.to_string(),
                )
            }
        }
    }
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response<Body> {
    let body = serde_json::json!({ "error": message, "code": code });
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

fn status_class(status: StatusCode) -> &'static str {
    match status.as_u16() {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}
