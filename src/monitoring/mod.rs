//! Operational side-server: liveness and Prometheus metrics.

use anyhow::Result;
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use serde_json::json;
use std::convert::Infallible;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::MonitoringConfig;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();
static START_TIME: OnceCell<Instant> = OnceCell::new();

/// Install the Prometheus recorder. Safe to call more than once; later
/// calls are no-ops (the recorder is process-global).
pub fn install_recorder() {
    let _ = START_TIME.set(Instant::now());
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = PROMETHEUS_HANDLE.set(handle);
        }
        Err(e) => {
            debug!("Prometheus recorder install skipped: {}", e);
        }
    }
}

/// Spawn the monitoring server when enabled.
pub async fn start_monitoring_server(config: MonitoringConfig) -> Result<JoinHandle<()>> {
    let handle = tokio::spawn(async move {
        if !config.enabled {
            info!("monitoring is disabled");
            return;
        }
        if let Err(e) = run_monitoring_server(config).await {
            error!("monitoring server error: {}", e);
        }
    });
    Ok(handle)
}

async fn run_monitoring_server(config: MonitoringConfig) -> Result<()> {
    let make_service = make_service_fn(|_conn: &AddrStream| async {
        Ok::<_, Infallible>(service_fn(handle))
    });

    let server = Server::try_bind(&config.bind)?.serve(make_service);
    info!("monitoring server listening on {}", config.bind);
    server.await?;
    Ok(())
}

async fn handle(req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/_health") => {
            let body = json!({
                "status": "ok",
                "version": env!("CARGO_PKG_VERSION"),
                "uptime_seconds": uptime_seconds(),
            });
            Response::builder()
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap()
        }
        (&Method::GET, "/_metrics") => {
            let rendered = PROMETHEUS_HANDLE
                .get()
                .map(|h| h.render())
                .unwrap_or_default();
            Response::builder()
                .header("content-type", "text/plain; version=0.0.4")
                .body(Body::from(rendered))
                .unwrap()
        }
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::from("Not found. Available endpoints: /_health, /_metrics"))
            .unwrap(),
    };
    Ok(response)
}

fn uptime_seconds() -> u64 {
    START_TIME
        .get()
        .map(|t| t.elapsed().as_secs())
        .unwrap_or(0)
}
