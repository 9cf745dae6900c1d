// src/session.rs
// Server-side session state behind a pluggable store

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

/// Name of the signed cookie carrying the session id
pub const SESSION_COOKIE: &str = "tunnelgate.sid";

/// How often expired sessions are swept from the in-memory store
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 10);

/// Opaque session identifier (UUID v4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a new random session ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Per-client state. `authenticated` is the only thing the gate looks at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionState {
    pub authenticated: bool,
}

/// Session backing store. The gate and the login handler only talk to this.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Current state, or `None` when unknown or expired
    async fn get(&self, id: &SessionId) -> Option<SessionState>;

    /// Insert or replace, restarting the session lifetime
    async fn set(&self, id: SessionId, state: SessionState);

    /// Explicit invalidation
    async fn remove(&self, id: &SessionId);

    /// Drop expired entries, returning how many were removed
    async fn purge_expired(&self) -> usize {
        0
    }
}

struct Entry {
    state: SessionState,
    expires_at: Instant,
}

/// In-process store with a fixed time-to-live per entry
pub struct MemorySessionStore {
    ttl: Duration,
    entries: RwLock<HashMap<SessionId, Entry>>,
}

impl MemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of entries held, expired or not
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, id: &SessionId) -> Option<SessionState> {
        let entries = self.entries.read().await;
        entries
            .get(id)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.state)
    }

    async fn set(&self, id: SessionId, state: SessionState) {
        let expires_at = Instant::now() + self.ttl;
        let mut entries = self.entries.write().await;
        entries.insert(id, Entry { state, expires_at });
    }

    async fn remove(&self, id: &SessionId) {
        self.entries.write().await.remove(id);
    }

    async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }
}

/// Spawn a background task that periodically purges expired sessions
pub fn spawn_session_sweeper(store: Arc<dyn SessionStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = store.purge_expired().await;
            if purged > 0 {
                debug!(purged, "expired sessions removed");
            }
        }
    })
}
