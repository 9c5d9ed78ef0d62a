//! Streaming upgrade dispatch.
//!
//! Upgrade requests (`websocket`, `mqtt`, `wss`) cannot be retried once
//! bytes have crossed, so they bypass the failover loop entirely: the
//! first route in the sequence is dialed once, the upgrade request is
//! relayed with all of its headers, and on a `101` both sides are joined
//! into a transparent bidirectional byte stream.

use hyper::{Body, Request, Response, StatusCode};
use tracing::{debug, warn};

use crate::error::GateResult;
use crate::proxy::forwarder::{build_attempt_request, AttemptTarget, TlsVerify};
use crate::proxy::{ProxyEngine, RequestContext};
use crate::resolver::Route;

/// Upgrade tokens that select the streaming path.
const UPGRADE_PROTOCOLS: &[&str] = &["websocket", "mqtt", "wss"];

/// Whether a request asks for a streaming upgrade the gateway relays.
pub fn is_upgrade_request(req: &Request<Body>) -> bool {
    req.headers()
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .map(|p| p.trim().to_ascii_lowercase())
                .any(|p| UPGRADE_PROTOCOLS.contains(&p.as_str()))
        })
        .unwrap_or(false)
}

/// Relay an upgrade request to a single route and splice the byte streams.
///
/// The `101` response is forwarded verbatim (upgrade headers preserved);
/// the relay task runs until either side closes.
pub async fn relay(
    engine: &ProxyEngine,
    route: &Route,
    ctx: &RequestContext,
    mut req: Request<Body>,
) -> GateResult<Response<Body>> {
    // Take the client's upgrade handle before the request moves upstream.
    let client_upgrade = hyper::upgrade::on(&mut req);

    let (parts, body) = req.into_parts();
    let upstream_req =
        build_attempt_request(ctx, &parts.method, &parts.uri, &parts.headers, body, false)?;

    let target = AttemptTarget {
        scheme: route.wire_scheme(),
        host: route.ip.clone(),
        port: route.port,
        sni_host: ctx.sni_host().to_string(),
        verify: TlsVerify::CaBundle,
    };

    debug!(
        req_id = %ctx.req_id,
        target = %target.address(),
        source = %route.source,
        "upgrade relay attempt"
    );

    let mut response = engine.dispatch(&target, upstream_req).await?;

    if response.status() == StatusCode::SWITCHING_PROTOCOLS {
        let backend_upgrade = hyper::upgrade::on(&mut response);
        let req_id = ctx.req_id.clone();
        tokio::spawn(async move {
            match tokio::try_join!(client_upgrade, backend_upgrade) {
                Ok((mut client_io, mut backend_io)) => {
                    match tokio::io::copy_bidirectional(&mut client_io, &mut backend_io).await {
                        Ok((to_backend, to_client)) => {
                            debug!(req_id = %req_id, to_backend, to_client, "upgrade stream closed");
                        }
                        Err(e) => {
                            debug!(req_id = %req_id, error = %e, "upgrade stream ended with error");
                        }
                    }
                }
                Err(e) => {
                    warn!(req_id = %req_id, error = %e, "upgrade completion failed");
                }
            }
        });
    } else {
        debug!(
            req_id = %ctx.req_id,
            status = %response.status(),
            "backend declined upgrade, forwarding response as-is"
        );
    }

    Ok(response)
}
