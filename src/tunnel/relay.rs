// src/tunnel/relay.rs
// Tunnel backend that relays frames to an upstream wisp server

use async_trait::async_trait;
use futures::StreamExt;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::connect_async;
use tracing::{debug, warn};
use url::Url;

use super::{CLOSE_GRACE, Tunnel, TunnelSocket, close_with_error};

/// Close reason sent to the client when the upstream cannot be reached
pub const UPSTREAM_UNAVAILABLE_REASON: &str = "tunnel upstream unavailable";

/// Forwards every tunnel connection to a WebSocket endpoint that speaks the
/// tunnel protocol. Frames are passed through untouched.
pub struct UpstreamTunnel {
    url: Url,
}

impl UpstreamTunnel {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Tunnel for UpstreamTunnel {
    async fn serve(&self, mut socket: TunnelSocket, peer: Option<SocketAddr>) {
        let upstream = match connect_async(self.url.as_str()).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                warn!(?peer, upstream = %self.url, "upstream connection failed: {}", e);
                close_with_error(&mut socket, UPSTREAM_UNAVAILABLE_REASON, CLOSE_GRACE).await;
                return;
            }
        };
        debug!(?peer, upstream = %self.url, "upstream connected");
        relay(socket, upstream).await;
    }
}

/// Pump messages both ways until either side ends
pub async fn relay<C, U>(client: WebSocketStream<C>, upstream: WebSocketStream<U>)
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let (client_tx, client_rx) = client.split();
    let (upstream_tx, upstream_rx) = upstream.split();

    tokio::select! {
        result = client_rx.forward(upstream_tx) => {
            if let Err(e) = result {
                debug!("client -> upstream ended: {}", e);
            }
        }
        result = upstream_rx.forward(client_tx) => {
            if let Err(e) = result {
                debug!("upstream -> client ended: {}", e);
            }
        }
    }
}
