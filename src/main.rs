use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

use meshgate::config::Config;
use meshgate::health::PassiveHealthStore;
use meshgate::proxy::{GatewayHandler, GatewayServer, ProxyEngine};
use meshgate::resolver::{client, ResolutionClient, Resolver};
use meshgate::tls::{self, TlsManager};
use meshgate::monitoring;

#[derive(Parser)]
#[command(name = "meshgate")]
#[command(about = "Multi-tenant wildcard subdomain reverse-proxy gateway")]
struct Args {
    /// Configuration file; the process environment is used when absent
    #[arg(short, long)]
    config: Option<String>,

    /// Override the HTTP listener address
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("meshgate={},hyper=info", level))
        .init();

    info!("starting meshgate");

    let mut config = match &args.config {
        Some(path) => Config::from_file_with_env(path).await?,
        None => Config::from_env()?,
    };
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    info!(
        server_domain = %config.domain.server_domain,
        backend_url = %config.resolver.backend_url,
        "configuration loaded"
    );

    monitoring::install_recorder();
    let _monitoring_handle =
        monitoring::start_monitoring_server(config.monitoring.clone()).await?;

    // Trust bundle for resolver and route connections; the gateway still
    // serves plain-HTTP backends when the bundle cannot be obtained.
    let route_tls = match client::bootstrap_ca_bundle(&config.resolver).await {
        Ok(path) => tls::client_config_from_ca(&path)?,
        Err(e) => {
            let existing = Path::new(&config.resolver.ca_bundle_path);
            if existing.exists() {
                warn!(error = %e, "CA fetch failed, reusing bundle on disk");
                tls::client_config_from_ca(existing)?
            } else {
                warn!(error = %e, "no CA bundle available, HTTPS routes will fail verification");
                tls::empty_roots_client_config()
            }
        }
    };

    let resolution_client = ResolutionClient::new(&config.resolver, route_tls.clone());
    let resolver = Resolver::new(&config.resolver, resolution_client);
    let _sweeper = resolver.cache().spawn_sweeper(Duration::from_secs(30));

    let health = PassiveHealthStore::new(
        config.proxy.failure_threshold,
        Duration::from_secs(config.proxy.passive_unhealthy_ttl_secs),
    );
    let engine = ProxyEngine::new(&config.proxy, health.clone(), route_tls);
    let handler = GatewayHandler::new(&config, resolver, health, engine);

    let tls_manager = match &config.tls {
        Some(tls_config) if tls_config.enabled => {
            let mut manager = TlsManager::new(tls_config.clone());
            manager.initialize()?;
            Some(manager)
        }
        _ => None,
    };

    let server = GatewayServer::new(config.server.bind, handler, tls_manager);

    let shutdown_signal = async {
        signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C signal handler");
        warn!("received CTRL+C, shutting down");
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                tracing::error!("gateway server error: {}", e);
            }
        }
        _ = shutdown_signal => {
            info!("shutdown signal received");
        }
    }

    info!("meshgate shutdown complete");
    Ok(())
}
