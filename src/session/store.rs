//! Session storage.
//!
//! # Responsibilities
//! - Keep sessions by id for the session and CSRF layers
//! - Expire sessions that sit idle past the timeout
//! - Bound the number of live sessions
//!
//! # Design Decisions
//! - Expired entries are dropped lazily on lookup and by a periodic sweep
//! - At capacity the least recently seen session is evicted

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::security::csrf::CsrfToken;
use crate::session::{Session, SessionId};

/// Idle time after which a session is dropped (12 hours).
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(12 * 60 * 60);

/// Live sessions kept before eviction starts.
pub const DEFAULT_MAX_SESSIONS: usize = 100_000;

/// Storage collaborator for sessions. Implementations must be safe to call
/// from many requests at once.
pub trait SessionStore: Send + Sync + 'static {
    fn get(&self, id: &SessionId) -> Option<Session>;

    fn set(&self, session: Session);

    fn destroy(&self, id: &SessionId);

    /// Bind `token` to the session unless one is already bound, and return
    /// whichever token is bound afterwards. `None` if the session is gone.
    fn attach_token_if_absent(&self, id: &SessionId, token: CsrfToken) -> Option<CsrfToken>;
}

struct StoredSession {
    session: Session,
    last_seen: Instant,
}

/// A thread-safe in-process session store with idle expiry and a size cap.
#[derive(Clone)]
pub struct MemorySessionStore {
    inner: Arc<DashMap<SessionId, StoredSession>>,
    idle_timeout: Duration,
    max_sessions: usize,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_SESSIONS)
    }

    pub fn with_limits(idle_timeout: Duration, max_sessions: usize) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            idle_timeout,
            max_sessions: max_sessions.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn is_expired(&self, stored: &StoredSession) -> bool {
        stored.last_seen.elapsed() >= self.idle_timeout
    }

    /// Drop every idle session. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.inner.len();
        self.inner.retain(|_, stored| stored.last_seen.elapsed() < self.idle_timeout);
        before.saturating_sub(self.inner.len())
    }

    fn evict_least_recent(&self) {
        let oldest = self
            .inner
            .iter()
            .min_by_key(|entry| entry.value().last_seen)
            .map(|entry| entry.key().clone());
        if let Some(id) = oldest {
            self.inner.remove(&id);
            tracing::debug!("Session store full; evicted least recently seen session");
        }
    }

    /// Purge idle sessions every `interval` until the task is aborted.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = store.purge_expired();
                if removed > 0 {
                    tracing::debug!(removed = removed, live = store.len(), "Expired sessions purged");
                }
            }
        })
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, id: &SessionId) -> Option<Session> {
        if self.inner.remove_if(id, |_, stored| self.is_expired(stored)).is_some() {
            return None;
        }
        let mut stored = self.inner.get_mut(id)?;
        stored.last_seen = Instant::now();
        Some(stored.session.clone())
    }

    fn set(&self, session: Session) {
        if !self.inner.contains_key(session.id()) && self.inner.len() >= self.max_sessions {
            self.purge_expired();
            if self.inner.len() >= self.max_sessions {
                self.evict_least_recent();
            }
        }
        self.inner.insert(
            session.id().clone(),
            StoredSession {
                session,
                last_seen: Instant::now(),
            },
        );
    }

    fn destroy(&self, id: &SessionId) {
        self.inner.remove(id);
    }

    fn attach_token_if_absent(&self, id: &SessionId, token: CsrfToken) -> Option<CsrfToken> {
        match self.inner.entry(id.clone()) {
            Entry::Occupied(mut entry) => {
                let stored = entry.get_mut();
                stored.last_seen = Instant::now();
                if let Some(existing) = stored.session.csrf_token() {
                    return Some(existing.clone());
                }
                stored.session.bind_token(token.clone());
                Some(token)
            }
            Entry::Vacant(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_operations() {
        let store = MemorySessionStore::new();
        let session = Session::new();
        let id = session.id().clone();

        assert!(store.get(&id).is_none());
        store.set(session);
        assert!(store.get(&id).is_some());

        store.destroy(&id);
        assert!(store.get(&id).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_first_token_wins() {
        let store = MemorySessionStore::new();
        let session = Session::new();
        let id = session.id().clone();
        store.set(session);

        let first = CsrfToken::issue(&id);
        let second = CsrfToken::issue(&id);

        let bound = store.attach_token_if_absent(&id, first.clone()).unwrap();
        assert!(bound.matches(first.value()));

        let bound = store.attach_token_if_absent(&id, second.clone()).unwrap();
        assert!(bound.matches(first.value()));
        assert!(!bound.matches(second.value()));
    }

    #[test]
    fn test_attach_to_missing_session() {
        let store = MemorySessionStore::new();
        let id = SessionId::generate();
        assert!(store.attach_token_if_absent(&id, CsrfToken::issue(&id)).is_none());
    }

    #[test]
    fn test_idle_sessions_expire() {
        let store = MemorySessionStore::with_limits(Duration::ZERO, 10);
        let session = Session::new();
        let id = session.id().clone();
        store.set(session);

        assert!(store.get(&id).is_none());
        assert!(store.is_empty());

        store.set(Session::new());
        store.set(Session::new());
        assert_eq!(store.purge_expired(), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn test_active_sessions_survive_purge() {
        let store = MemorySessionStore::with_limits(Duration::from_secs(3600), 10);
        let session = Session::new();
        let id = session.id().clone();
        store.set(session);

        assert_eq!(store.purge_expired(), 0);
        assert!(store.get(&id).is_some());
    }

    #[test]
    fn test_capacity_is_bounded() {
        let store = MemorySessionStore::with_limits(Duration::from_secs(3600), 2);
        let mut last = None;
        for _ in 0..5 {
            let session = Session::new();
            last = Some(session.id().clone());
            store.set(session);
        }

        assert_eq!(store.len(), 2);
        assert!(store.get(&last.unwrap()).is_some());
    }

    #[tokio::test]
    async fn test_sweeper_purges_in_background() {
        let store = MemorySessionStore::with_limits(Duration::ZERO, 10);
        store.set(Session::new());
        let sweeper = store.spawn_sweeper(Duration::from_millis(10));

        for _ in 0..50 {
            if store.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        sweeper.abort();
        assert!(store.is_empty());
    }
}
