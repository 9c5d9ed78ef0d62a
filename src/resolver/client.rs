//! HTTP client for the resolution API.
//!
//! Two protocol versions share the retry plumbing: a bounded number of
//! attempts per version with a fixed delay in between, retrying only
//! transport failures. A non-200 status is a definitive answer and is
//! never retried.

use hyper::body::Bytes;
use hyper::client::HttpConnector;
use hyper::{Body, Client, StatusCode, Uri};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::ResolverConfig;
use crate::error::{GateError, GateResult};
use crate::resolver::{LegacyResolution, Resolution};
use crate::tls;

type HttpsClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Body>;

struct RawResponse {
    status: StatusCode,
    body: Bytes,
}

/// Pooled client for the resolution API, TLS-verified against the CA
/// bundle loaded at startup.
#[derive(Clone)]
pub struct ResolutionClient {
    client: HttpsClient,
    base_url: String,
    request_timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
}

impl ResolutionClient {
    pub fn new(config: &ResolverConfig, tls_config: rustls::ClientConfig) -> Self {
        Self {
            client: build_client(tls_config),
            base_url: config.backend_url.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    /// `GET /resolve/v2/{tenant}`.
    pub async fn resolve_v2(&self, tenant: &str) -> GateResult<Resolution> {
        let url = format!("{}/resolve/v2/{}", self.base_url, tenant);
        let raw = self.get_with_retries(&url, "resolve v2").await?;
        if raw.status != StatusCode::OK {
            debug!(tenant, status = %raw.status, "v2 resolution non-200");
            return Err(GateError::not_found(tenant));
        }
        let resolution: Resolution = serde_json::from_slice(&raw.body)?;
        Ok(resolution)
    }

    /// `GET /resolve/{tenant}`, reshaped to the v2 model.
    pub async fn resolve_v1(&self, tenant: &str) -> GateResult<Resolution> {
        let url = format!("{}/resolve/{}", self.base_url, tenant);
        let raw = self.get_with_retries(&url, "resolve v1").await?;
        if raw.status != StatusCode::OK {
            debug!(tenant, status = %raw.status, "v1 resolution non-200");
            return Err(GateError::not_found(tenant));
        }
        let legacy: LegacyResolution = serde_json::from_slice(&raw.body)?;
        Ok(legacy.into_resolution())
    }

    /// GET with per-attempt timeout and bounded fixed-delay retries.
    /// Any HTTP response ends the loop; only transport failures retry.
    async fn get_with_retries(&self, url: &str, operation: &str) -> GateResult<RawResponse> {
        let uri: Uri = url.parse()?;
        let mut last_error = GateError::backend_unavailable("no attempts made");

        for attempt in 1..=self.max_retries {
            let fut = self.client.get(uri.clone());
            match timeout(self.request_timeout, fut).await {
                Ok(Ok(response)) => {
                    let status = response.status();
                    let body = hyper::body::to_bytes(response.into_body())
                        .await
                        .map_err(|e| {
                            GateError::backend_unavailable(format!("body read failed: {}", e))
                        })?;
                    return Ok(RawResponse { status, body });
                }
                Ok(Err(e)) => {
                    debug!(%uri, attempt, error = %e, "{} attempt failed", operation);
                    last_error =
                        GateError::backend_unavailable(format!("{}: {}", operation, e));
                }
                Err(_) => {
                    debug!(%uri, attempt, "{} attempt timed out", operation);
                    last_error = GateError::timeout(self.request_timeout, operation.to_string());
                }
            }

            if attempt < self.max_retries {
                sleep(self.retry_delay).await;
            }
        }

        Err(last_error)
    }
}

fn build_client(tls_config: rustls::ClientConfig) -> HttpsClient {
    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(tls_config)
        .https_or_http()
        .enable_http1()
        .build();

    Client::builder()
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(8)
        .build::<_, Body>(https)
}

/// Fetch the CA bundle from `{backend_url}/ca-cert` and persist it at the
/// configured path. Retries for a long window so the gateway can come up
/// before the resolution API does.
pub async fn bootstrap_ca_bundle(config: &ResolverConfig) -> GateResult<PathBuf> {
    let url = format!("{}/ca-cert", config.backend_url.trim_end_matches('/'));
    let uri: Uri = url.parse()?;
    // The bundle itself establishes trust, so this fetch runs without it.
    let client = build_client(tls::empty_roots_client_config());
    let delay = Duration::from_secs(config.ca_fetch_delay_secs);

    for attempt in 1..=config.ca_fetch_retries {
        match timeout(Duration::from_secs(config.request_timeout_secs), client.get(uri.clone()))
            .await
        {
            Ok(Ok(response)) if response.status() == StatusCode::OK => {
                let body = hyper::body::to_bytes(response.into_body())
                    .await
                    .map_err(|e| GateError::tls(format!("CA bundle read failed: {}", e)))?;
                let path = PathBuf::from(&config.ca_bundle_path);
                tokio::fs::write(&path, &body).await?;
                info!(path = %path.display(), bytes = body.len(), "CA bundle written");
                return Ok(path);
            }
            Ok(Ok(response)) => {
                warn!(attempt, status = %response.status(), "CA bundle fetch non-200");
            }
            Ok(Err(e)) => {
                warn!(attempt, error = %e, "CA bundle fetch failed");
            }
            Err(_) => {
                warn!(attempt, "CA bundle fetch timed out");
            }
        }

        if attempt < config.ca_fetch_retries {
            sleep(delay).await;
        }
    }

    Err(GateError::tls(format!(
        "CA bundle unavailable after {} attempts",
        config.ca_fetch_retries
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Response, Server};
    use std::convert::Infallible;
    use std::net::SocketAddr;

    fn test_config(base_url: String) -> ResolverConfig {
        ResolverConfig {
            backend_url: base_url,
            request_timeout_secs: 2,
            max_retries: 3,
            retry_delay_ms: 10,
            ..ResolverConfig::default()
        }
    }

    fn test_client(base_url: String) -> ResolutionClient {
        ResolutionClient::new(&test_config(base_url), tls::empty_roots_client_config())
    }

    async fn spawn_stub(body: &'static str, status: StatusCode) -> SocketAddr {
        let make_svc = make_service_fn(move |_| async move {
            Ok::<_, Infallible>(service_fn(move |_req| async move {
                Ok::<_, Infallible>(
                    Response::builder()
                        .status(status)
                        .body(Body::from(body))
                        .unwrap(),
                )
            }))
        });
        let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make_svc);
        let addr = server.local_addr();
        tokio::spawn(server);
        addr
    }

    #[tokio::test]
    async fn test_v2_success() {
        let addr = spawn_stub(
            r#"{"routes":[{"ip":"203.0.113.5","port":443,"priority":1,"source":"agent"}]}"#,
            StatusCode::OK,
        )
        .await;
        let client = test_client(format!("http://{}", addr));

        let resolution = client.resolve_v2("alice").await.unwrap();
        assert_eq!(resolution.routes.len(), 1);
        assert_eq!(resolution.routes[0].ip, "203.0.113.5");
    }

    #[tokio::test]
    async fn test_non_200_is_not_found_without_retries() {
        let addr = spawn_stub("gone", StatusCode::NOT_FOUND).await;
        let client = test_client(format!("http://{}", addr));

        let err = client.resolve_v2("alice").await.unwrap_err();
        assert!(matches!(err, GateError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_undecodable_body_is_invalid_response() {
        let addr = spawn_stub("<html>oops</html>", StatusCode::OK).await;
        let client = test_client(format!("http://{}", addr));

        let err = client.resolve_v2("alice").await.unwrap_err();
        assert!(matches!(err, GateError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn test_transport_failure_exhausts_retries() {
        // Bind-then-drop gives a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = test_client(format!("http://{}", addr));
        let start = std::time::Instant::now();
        let err = client.resolve_v2("alice").await.unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, GateError::BackendUnavailable { .. }));
        // Two inter-attempt delays of 10ms must have elapsed
        assert!(elapsed >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_v1_reshape() {
        let addr = spawn_stub(r#"{"hostIp":"198.51.100.9","targetPort":8080}"#, StatusCode::OK)
            .await;
        let client = test_client(format!("http://{}", addr));

        let resolution = client.resolve_v1("alice").await.unwrap();
        assert_eq!(resolution.routes.len(), 1);
        assert_eq!(resolution.routes[0].port, 8080);
        assert_eq!(resolution.routes[0].priority, 1);
    }
}
