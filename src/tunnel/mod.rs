// src/tunnel/mod.rs
// Upgrade routing and handoff to the tunnel backend
//
// Upgrade requests never reach the axum router. The gateway asks
// `route_upgrade` where a request belongs; tunnel-bound requests complete the
// WebSocket handshake here and the raw socket is handed to a `Tunnel`
// implementation once hyper finishes the upgrade.

pub mod relay;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request, Response, StatusCode, header};
use axum::response::IntoResponse;
use futures::StreamExt;
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role};
use tracing::{debug, warn};

use crate::error::{GateError, Result};
use crate::gateway::PeerAddr;

pub use relay::{UPSTREAM_UNAVAILABLE_REASON, UpstreamTunnel};

/// Suffix of the request target that marks the tunnel endpoint
pub const TUNNEL_SUFFIX: &str = "/wisp/";

/// Server side of an accepted tunnel WebSocket
pub type TunnelSocket = WebSocketStream<TokioIo<Upgraded>>;

/// Where an upgrade request goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeRoute {
    Tunnel,
    Reject,
}

/// Decide the fate of an upgrade request from its target (path plus query,
/// exactly as sent by the client).
pub fn route_upgrade(target: &str) -> UpgradeRoute {
    if target.ends_with(TUNNEL_SUFFIX) {
        UpgradeRoute::Tunnel
    } else {
        UpgradeRoute::Reject
    }
}

/// Request target as it appeared on the request line, minus scheme and authority
pub fn request_target<B>(req: &Request<B>) -> &str {
    req.uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
}

/// True for any protocol upgrade request, not only WebSocket ones
pub fn is_upgrade_request<B>(req: &Request<B>) -> bool {
    let headers = req.headers();
    let connection_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));

    connection_upgrade && headers.contains_key(header::UPGRADE)
}

/// External tunnel entry point. Receives the socket after the handshake.
#[async_trait]
pub trait Tunnel: Send + Sync {
    async fn serve(&self, socket: TunnelSocket, peer: Option<SocketAddr>);
}

/// Stand-in used when no tunnel backend is configured: completes the
/// handshake, then closes with 1011.
pub struct UnavailableTunnel;

pub const UNAVAILABLE_REASON: &str = "tunnel backend not configured";

#[async_trait]
impl Tunnel for UnavailableTunnel {
    async fn serve(&self, mut socket: TunnelSocket, peer: Option<SocketAddr>) {
        warn!(?peer, "tunnel requested but no backend is configured");
        close_with_error(&mut socket, UNAVAILABLE_REASON, CLOSE_GRACE).await;
    }
}

/// How long a closing socket waits for the peer's close acknowledgement
pub const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Send a 1011 close frame, then drain until the peer answers or `grace` runs out
pub async fn close_with_error<S>(socket: &mut WebSocketStream<S>, reason: &str, grace: Duration)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = CloseFrame {
        code: CloseCode::Error,
        reason: reason.to_string().into(),
    };
    if let Err(e) = socket.close(Some(frame)).await {
        debug!("close failed: {}", e);
        return;
    }

    let drain = async { while let Some(Ok(_)) = socket.next().await {} };
    if tokio::time::timeout(grace, drain).await.is_err() {
        debug!("close not acknowledged within {:?}, dropping socket", grace);
    }
}

/// Check the WebSocket handshake headers and return the accept key
fn accept_key(headers: &HeaderMap) -> Result<String> {
    let upgrade = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(GateError::InvalidHandshake(format!(
            "unsupported upgrade protocol {upgrade:?}"
        )));
    }

    let version = headers
        .get(header::SEC_WEBSOCKET_VERSION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if version.trim() != "13" {
        return Err(GateError::InvalidHandshake(format!(
            "unsupported websocket version {version:?}"
        )));
    }

    let key = headers
        .get(header::SEC_WEBSOCKET_KEY)
        .ok_or_else(|| GateError::InvalidHandshake("missing Sec-WebSocket-Key".to_string()))?;

    Ok(derive_accept_key(key.as_bytes()))
}

/// Answer a tunnel-bound upgrade with 101 and hand the upgraded connection to
/// `tunnel` in the background.
pub fn accept<B>(mut req: Request<B>, tunnel: Arc<dyn Tunnel>) -> Result<Response<Body>> {
    let accept = accept_key(req.headers())?;
    let peer = req.extensions().get::<PeerAddr>().map(|p| p.0);
    let on_upgrade = hyper::upgrade::on(&mut req);

    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                let socket =
                    WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None)
                        .await;
                debug!(?peer, "tunnel connection established");
                tunnel.serve(socket, peer).await;
                debug!(?peer, "tunnel connection finished");
            }
            Err(e) => {
                debug!(?peer, "upgrade did not complete: {}", e);
            }
        }
    });

    let response = (
        StatusCode::SWITCHING_PROTOCOLS,
        [
            (header::UPGRADE, "websocket".to_string()),
            (header::CONNECTION, "upgrade".to_string()),
            (header::SEC_WEBSOCKET_ACCEPT, accept),
        ],
    )
        .into_response();
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upgrade_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::CONNECTION, "keep-alive, Upgrade")
            .header(header::UPGRADE, "websocket")
            .header(header::SEC_WEBSOCKET_VERSION, "13")
            .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_route_upgrade_tunnel_suffix() {
        assert_eq!(route_upgrade("/wisp/"), UpgradeRoute::Tunnel);
        assert_eq!(route_upgrade("/proxy/wisp/"), UpgradeRoute::Tunnel);
    }

    #[test]
    fn test_route_upgrade_rejects_everything_else() {
        assert_eq!(route_upgrade("/"), UpgradeRoute::Reject);
        assert_eq!(route_upgrade("/wisp"), UpgradeRoute::Reject);
        assert_eq!(route_upgrade("/wisp/extra"), UpgradeRoute::Reject);
        assert_eq!(route_upgrade("/wisp/?token=1"), UpgradeRoute::Reject);
    }

    #[test]
    fn test_request_target_keeps_query() {
        let req = upgrade_request("/wisp/?a=b");
        assert_eq!(request_target(&req), "/wisp/?a=b");
    }

    #[test]
    fn test_is_upgrade_request() {
        assert!(is_upgrade_request(&upgrade_request("/wisp/")));

        let plain = Request::builder().uri("/").body(Body::empty()).unwrap();
        assert!(!is_upgrade_request(&plain));

        let header_only = Request::builder()
            .uri("/")
            .header(header::UPGRADE, "websocket")
            .body(Body::empty())
            .unwrap();
        assert!(!is_upgrade_request(&header_only));
    }

    #[test]
    fn test_accept_key_rfc_sample() {
        let req = upgrade_request("/wisp/");
        assert_eq!(
            accept_key(req.headers()).unwrap(),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_accept_key_requires_websocket_protocol() {
        let mut req = upgrade_request("/wisp/");
        req.headers_mut()
            .insert(header::UPGRADE, "h2c".parse().unwrap());
        assert!(matches!(
            accept_key(req.headers()),
            Err(GateError::InvalidHandshake(_))
        ));
    }

    #[test]
    fn test_accept_key_requires_key_and_version() {
        let mut req = upgrade_request("/wisp/");
        req.headers_mut().remove(header::SEC_WEBSOCKET_KEY);
        assert!(accept_key(req.headers()).is_err());

        let mut req = upgrade_request("/wisp/");
        req.headers_mut()
            .insert(header::SEC_WEBSOCKET_VERSION, "8".parse().unwrap());
        assert!(accept_key(req.headers()).is_err());
    }

    #[tokio::test]
    async fn test_close_with_error_gives_up_on_silent_peer() {
        // Peer end of the pipe is never read, so no acknowledgement arrives
        let (server_io, _peer_io) = tokio::io::duplex(4096);
        let mut socket = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;

        let closed = tokio::time::timeout(
            Duration::from_secs(2),
            close_with_error(&mut socket, UNAVAILABLE_REASON, Duration::from_millis(50)),
        )
        .await;
        assert!(closed.is_ok());
    }

    #[tokio::test]
    async fn test_close_with_error_sends_code_and_reason() {
        let (server_io, client_io) = tokio::io::duplex(4096);
        let mut server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let mut client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;

        let client_task = tokio::spawn(async move {
            loop {
                match client.next().await {
                    Some(Ok(tokio_tungstenite::tungstenite::Message::Close(frame))) => break frame,
                    Some(Ok(_)) => continue,
                    other => panic!("expected close frame, got {other:?}"),
                }
            }
        });

        close_with_error(&mut server, "going away", CLOSE_GRACE).await;

        let frame = client_task.await.unwrap().unwrap();
        assert_eq!(frame.code, CloseCode::Error);
        assert_eq!(frame.reason.as_str(), "going away");
    }

    #[tokio::test]
    async fn test_accept_answers_switching_protocols() {
        let response = accept(upgrade_request("/wisp/"), Arc::new(UnavailableTunnel)).unwrap();
        assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(
            response.headers()[header::SEC_WEBSOCKET_ACCEPT],
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
        assert_eq!(response.headers()[header::UPGRADE], "websocket");
    }
}
