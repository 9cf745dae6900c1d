// src/error.rs
// Error types for the gateway

use thiserror::Error;

/// Main error type for tunnelgate
#[derive(Error, Debug)]
pub enum GateError {
    /// Upgrade request aimed somewhere other than the tunnel endpoint.
    /// Surfacing this to hyper closes the connection without a response.
    #[error("upgrade rejected for {target}")]
    UpgradeRejected { target: String },

    #[error("invalid websocket handshake: {0}")]
    InvalidHandshake(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Convenience type alias for Result using GateError
pub type Result<T> = std::result::Result<T, GateError>;
