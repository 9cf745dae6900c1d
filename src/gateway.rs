// src/gateway.rs
// Connection-level service: isolation headers, then upgrade dispatch or the router

use axum::Router;
use axum::body::{Body, Bytes, HttpBody};
use axum::http::{HeaderName, HeaderValue, Request, Response};
use futures::future::BoxFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{BoxError, Service, ServiceBuilder, ServiceExt};
use tower_http::set_header::{SetResponseHeader, SetResponseHeaderLayer};
use tracing::debug;

use crate::error::{GateError, Result};
use crate::state::AppState;
use crate::tunnel::{self, Tunnel, UpgradeRoute};
use crate::web;

pub const CROSS_ORIGIN_OPENER_POLICY: HeaderName =
    HeaderName::from_static("cross-origin-opener-policy");
pub const CROSS_ORIGIN_EMBEDDER_POLICY: HeaderName =
    HeaderName::from_static("cross-origin-embedder-policy");

/// Remote address of the connection a request arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr(pub SocketAddr);

/// Routes upgrade requests to the tunnel (or rejects them) and everything
/// else to the axum router.
#[derive(Clone)]
pub struct Gateway {
    router: Router,
    tunnel: Arc<dyn Tunnel>,
}

impl Gateway {
    pub fn new(router: Router, tunnel: Arc<dyn Tunnel>) -> Self {
        Self { router, tunnel }
    }
}

impl<B> Service<Request<B>> for Gateway
where
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    type Response = Response<Body>;
    type Error = GateError;
    type Future = BoxFuture<'static, Result<Response<Body>>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        if !tunnel::is_upgrade_request(&req) {
            let router = self.router.clone();
            return Box::pin(async move {
                let response = router
                    .oneshot(req)
                    .await
                    .unwrap_or_else(|never| match never {});
                Ok(response)
            });
        }

        let target = tunnel::request_target(&req).to_string();
        match tunnel::route_upgrade(&target) {
            UpgradeRoute::Tunnel => {
                let result = tunnel::accept(req, self.tunnel.clone());
                if let Err(e) = &result {
                    debug!(%target, "tunnel handshake refused: {}", e);
                }
                Box::pin(async move { result })
            }
            UpgradeRoute::Reject => {
                debug!(%target, "closing non-tunnel upgrade");
                Box::pin(async move { Err(GateError::UpgradeRejected { target }) })
            }
        }
    }
}

/// The full per-connection service stack
pub type GatewayService =
    SetResponseHeader<SetResponseHeader<Gateway, HeaderValue>, HeaderValue>;

/// Wrap a gateway so every response carries the cross-origin isolation headers
pub fn with_isolation_headers(gateway: Gateway) -> GatewayService {
    ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            CROSS_ORIGIN_OPENER_POLICY,
            HeaderValue::from_static("same-origin"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            CROSS_ORIGIN_EMBEDDER_POLICY,
            HeaderValue::from_static("require-corp"),
        ))
        .service(gateway)
}

/// Build the service a listener serves: router plus tunnel behind the
/// header injector
pub fn gateway(state: AppState, tunnel: Arc<dyn Tunnel>) -> GatewayService {
    let router = web::create_router(state);
    with_isolation_headers(Gateway::new(router, tunnel))
}
