// src/state.rs
// Shared application state for the HTTP layer

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use rand::RngCore;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::session::SessionStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Immutable process configuration
    pub config: Arc<ServerConfig>,

    /// Session backing store (in-memory by default)
    pub sessions: Arc<dyn SessionStore>,

    /// Signing key for the session cookie, regenerated on every start
    pub cookie_key: Key,
}

impl AppState {
    /// Create new application state with a fresh random cookie key
    pub fn new(config: Arc<ServerConfig>, sessions: Arc<dyn SessionStore>) -> Self {
        Self::with_key(config, sessions, random_key())
    }

    pub fn with_key(config: Arc<ServerConfig>, sessions: Arc<dyn SessionStore>, cookie_key: Key) -> Self {
        Self {
            config,
            sessions,
            cookie_key,
        }
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

fn random_key() -> Key {
    let mut material = [0u8; 64];
    rand::rng().fill_bytes(&mut material);
    Key::from(&material)
}
