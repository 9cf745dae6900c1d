// src/lib.rs

pub mod config;
pub mod error;
pub mod gateway;
pub mod server;
pub mod session;
pub mod state;
pub mod tunnel;
pub mod web;

pub use config::{Args, ServerConfig};
pub use error::{GateError, Result};
pub use gateway::{GatewayService, gateway};
pub use state::AppState;
