//! Session tracking
//!
//! Allocates session ids and tracks active sessions so a shutdown can fan
//! out through every session's shared close signal.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Unique session identifier
pub type SessionId = u64;

/// Information about an active session
#[derive(Debug, Clone)]
struct SessionEntry {
    #[allow(dead_code)]
    peer_addr: String,
    #[allow(dead_code)]
    started_at: Instant,
    close: CancellationToken,
}

/// Manager for active sessions with shutdown fan-out
#[derive(Debug, Clone)]
pub struct SessionManager {
    /// Counter for generating unique session IDs
    next_id: Arc<AtomicU64>,
    /// Map from session id to active session
    active: Arc<DashMap<SessionId, SessionEntry>>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    /// Create a new SessionManager
    pub fn new() -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(1)),
            active: Arc::new(DashMap::new()),
        }
    }

    /// Register a new session and return its id and shared close signal
    pub fn register(&self, peer_addr: String) -> (SessionId, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let close = CancellationToken::new();
        self.active.insert(
            id,
            SessionEntry {
                peer_addr,
                started_at: Instant::now(),
                close: close.clone(),
            },
        );
        (id, close)
    }

    /// Unregister a session
    pub fn unregister(&self, id: SessionId) {
        self.active.remove(&id);
    }

    /// Raise every active session's close signal.
    /// Returns the number of sessions signalled.
    pub fn shutdown_all(&self) -> usize {
        let mut signalled = 0;
        for entry in self.active.iter() {
            entry.value().close.cancel();
            signalled += 1;
        }
        signalled
    }

    /// Number of active sessions
    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}
