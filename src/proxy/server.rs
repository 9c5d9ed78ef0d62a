//! Client-facing listeners.
//!
//! The plain-HTTP listener and the TLS-terminating HTTPS listener share
//! one [`GatewayHandler`]; each stamps the connection's remote address and
//! listener scheme into the request extensions before dispatch.

use anyhow::Result;
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use std::convert::Infallible;
use std::net::SocketAddr;
use tracing::{debug, error, info, warn};

use super::handler::GatewayHandler;
use super::{ClientMeta, ListenerScheme};
use crate::tls::TlsManager;

pub struct GatewayServer {
    bind_addr: SocketAddr,
    handler: GatewayHandler,
    tls_manager: Option<TlsManager>,
}

impl GatewayServer {
    pub fn new(
        bind_addr: SocketAddr,
        handler: GatewayHandler,
        tls_manager: Option<TlsManager>,
    ) -> Self {
        Self {
            bind_addr,
            handler,
            tls_manager,
        }
    }

    pub async fn run(self) -> Result<()> {
        let GatewayServer {
            bind_addr,
            handler,
            tls_manager,
        } = self;

        let https = tls_manager
            .as_ref()
            .and_then(|tls| tls.acceptor().map(|acceptor| (tls.bind_addr(), acceptor)));

        match https {
            Some((https_addr, acceptor)) => {
                info!(http = %bind_addr, https = %https_addr, "starting gateway listeners");
                let https_handler = handler.clone();
                tokio::select! {
                    result = run_http(bind_addr, handler) => result,
                    result = run_https(https_addr, acceptor, https_handler) => result,
                }
            }
            None => {
                info!(http = %bind_addr, "starting gateway listener");
                run_http(bind_addr, handler).await
            }
        }
    }
}

async fn run_http(bind_addr: SocketAddr, handler: GatewayHandler) -> Result<()> {
    let make_service = make_service_fn(move |conn: &AddrStream| {
        let handler = handler.clone();
        let meta = ClientMeta {
            remote_addr: conn.remote_addr(),
            scheme: ListenerScheme::Http,
        };
        async move {
            Ok::<_, Infallible>(service_fn(move |mut req| {
                let handler = handler.clone();
                req.extensions_mut().insert(meta);
                async move { handler.handle_request(req).await }
            }))
        }
    });

    let server = Server::try_bind(&bind_addr)?.serve(make_service);
    if let Err(e) = server.await {
        error!("HTTP listener error: {}", e);
    }
    Ok(())
}

async fn run_https(
    bind_addr: SocketAddr,
    acceptor: tokio_rustls::TlsAcceptor,
    handler: GatewayHandler,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTPS listener bound on {}", bind_addr);

    loop {
        let (tcp_stream, remote_addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("failed to accept connection: {}", e);
                continue;
            }
        };

        let acceptor = acceptor.clone();
        let handler = handler.clone();

        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(tcp_stream).await {
                Ok(stream) => stream,
                Err(e) => {
                    debug!("TLS handshake failed from {}: {}", remote_addr, e);
                    return;
                }
            };

            let meta = ClientMeta {
                remote_addr,
                scheme: ListenerScheme::Https,
            };
            let service = service_fn(move |mut req| {
                let handler = handler.clone();
                req.extensions_mut().insert(meta);
                async move { handler.handle_request(req).await }
            });

            if let Err(e) = hyper::server::conn::Http::new()
                .serve_connection(tls_stream, service)
                .with_upgrades()
                .await
            {
                debug!("error serving HTTPS connection from {}: {}", remote_addr, e);
            }
        });
    }
}
