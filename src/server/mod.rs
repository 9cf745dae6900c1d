//! Listener lifecycle: bind, announce, accept, shut down on signal.
//!
//! Connections are served by hyper directly rather than `axum::serve` so
//! that a rejected upgrade can drop the socket without writing a response.

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tower::ServiceExt;
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::gateway::{GatewayService, PeerAddr};

/// Bind the listening socket on all interfaces at the configured port
pub async fn bind(config: &ServerConfig) -> Result<TcpListener> {
    let listener = TcpListener::bind(config.listen_addr()).await?;
    Ok(listener)
}

/// Addresses a browser on this machine or the local network can use
pub fn reachable_addresses(port: u16) -> Vec<String> {
    let mut addresses = vec![format!("http://localhost:{port}")];
    match hostname::get() {
        Ok(name) => addresses.push(format!("http://{}:{port}", name.to_string_lossy())),
        Err(e) => debug!("hostname lookup failed: {}", e),
    }
    addresses
}

pub fn log_reachable_addresses(port: u16) {
    info!("Listening on:");
    for address in reachable_addresses(port) {
        info!("\t{}", address);
    }
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Accept connections until `shutdown` resolves, then close the listener.
///
/// Open connections are not drained: once this returns and the runtime is
/// dropped, in-flight requests are cut off.
pub async fn run<F>(listener: TcpListener, service: GatewayService, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(serve_connection(stream, peer, service.clone()));
                    }
                    Err(e) => {
                        error!("failed to accept connection: {}", e);
                    }
                }
            }
            _ = &mut shutdown => {
                info!("SIGTERM signal received: closing HTTP server");
                break;
            }
        }
    }

    drop(listener);
    Ok(())
}

async fn serve_connection(stream: TcpStream, peer: SocketAddr, service: GatewayService) {
    let svc = service_fn(move |mut req: hyper::Request<Incoming>| {
        req.extensions_mut().insert(PeerAddr(peer));
        service.clone().oneshot(req)
    });

    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), svc)
        .with_upgrades()
        .await
    {
        debug!(%peer, "connection closed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Gateway, with_isolation_headers};
    use crate::tunnel::UnavailableTunnel;
    use axum::Router;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_reachable_addresses_start_with_localhost() {
        let addresses = reachable_addresses(8080);
        assert_eq!(addresses[0], "http://localhost:8080");
        assert!(addresses.iter().all(|a| a.ends_with(":8080")));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_and_closes_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let service = with_isolation_headers(Gateway::new(Router::new(), Arc::new(UnavailableTunnel)));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(run(listener, service, async {
            let _ = rx.await;
        }));

        // Serves while running
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /missing HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        let text = String::from_utf8_lossy(&buf).to_lowercase();
        assert!(text.starts_with("http/1.1 404"));
        assert!(text.contains("cross-origin-opener-policy: same-origin"));

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();

        assert!(TcpStream::connect(addr).await.is_err());
    }
}
