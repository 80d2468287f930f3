//! Session handles and storage.
//!
//! # Data Flow
//! ```text
//! Cookie header
//!     → security::cookies (read session id)
//!     → store.rs (look up or create Session)
//!     → security::csrf (attach token binding)
//!     → handler (may request renew/destroy via SessionControl)
//!     → security::cookies (write Set-Cookie)
//! ```
//!
//! # Design Decisions
//! - The security layer only stores token bindings, never business payload
//! - A session is stored only once a token is issued or it is renewed, so
//!   anonymous traffic leaves nothing behind
//! - Storage is a trait so a persistent store can replace the in-memory one

pub mod store;

use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::security::csrf::CsrfToken;
use crate::security::random_hex;

pub use store::{MemorySessionStore, SessionStore, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_SESSIONS};

/// Bytes of randomness behind a session id.
const SESSION_ID_BYTES: usize = 32;

/// Opaque session identifier. `Debug` does not print the value.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(random_hex(SESSION_ID_BYTES))
    }

    /// Accept an id read from a cookie. Anything that could not have been
    /// produced by `generate` is refused.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = raw.len() == SESSION_ID_BYTES * 2 && raw.bytes().all(|b| b.is_ascii_hexdigit());
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionId(<redacted>)")
    }
}

/// A session as the security layer sees it.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    csrf_token: Option<CsrfToken>,
    created_at: SystemTime,
}

impl Session {
    /// A fresh session with a new id and no token.
    pub fn new() -> Self {
        Self {
            id: SessionId::generate(),
            csrf_token: None,
            created_at: SystemTime::now(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn csrf_token(&self) -> Option<&CsrfToken> {
        self.csrf_token.as_ref()
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub(crate) fn bind_token(&mut self, token: CsrfToken) {
        self.csrf_token = Some(token);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Request extension marking a session minted for this request and not yet
/// in the store. It is persisted only if something binds state to it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Unsaved;

/// What the handler asked to happen to its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionAction {
    Keep = 0,
    Renew = 1,
    Destroy = 2,
}

/// Per-request handle through which a handler asks for the session to be
/// renewed (login) or destroyed (logout). The cookie itself is written by
/// the session layer, never by the handler.
#[derive(Debug, Clone, Default)]
pub struct SessionControl {
    action: Arc<AtomicU8>,
}

impl SessionControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the session with a fresh one. Its CSRF token goes with it.
    pub fn renew(&self) {
        self.action.fetch_max(SessionAction::Renew as u8, Ordering::AcqRel);
    }

    /// Destroy the session and clear the cookie. Wins over `renew`.
    pub fn destroy(&self) {
        self.action.fetch_max(SessionAction::Destroy as u8, Ordering::AcqRel);
    }

    pub fn requested(&self) -> SessionAction {
        match self.action.load(Ordering::Acquire) {
            2 => SessionAction::Destroy,
            1 => SessionAction::Renew,
            _ => SessionAction::Keep,
        }
    }
}

impl<S> FromRequestParts<S> for SessionControl
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Outside the pipeline the handle is detached and has no effect.
        Ok(parts.extensions.get::<SessionControl>().cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_round_trip() {
        let id = SessionId::generate();
        assert_eq!(id.as_str().len(), 64);
        assert_eq!(SessionId::parse(id.as_str()), Some(id.clone()));
        assert!(SessionId::parse("not-a-session").is_none());
        assert!(!format!("{:?}", id).contains(id.as_str()));
    }

    #[test]
    fn test_destroy_wins_over_renew() {
        let control = SessionControl::new();
        assert_eq!(control.requested(), SessionAction::Keep);
        control.renew();
        assert_eq!(control.requested(), SessionAction::Renew);
        control.destroy();
        control.renew();
        assert_eq!(control.requested(), SessionAction::Destroy);
    }
}
