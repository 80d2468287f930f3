//! Composition of the security layers around an application router.
//!
//! # Responsibilities
//! - Build every guard from the one frozen `PolicyProfile`
//! - Stack the guards in a fixed order around any `Router`
//!
//! # Data Flow
//! ```text
//! request  → trace → header_guard → upload_guard → session_guard
//!          → csrf_guard → fault_boundary → catch_panic → handler
//! response ← trace ← header_guard ← session_guard ← fault_boundary ← handler
//! ```
//!
//! # Design Decisions
//! - Headers are outermost so redirects and rejections carry them too
//! - The body is capped and buffered before CSRF reads the form
//! - Handlers never touch security concerns directly

use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, middleware, Router};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::security::cookies::{session_guard, SessionCookiePolicy, SessionLayerState};
use crate::security::csrf::{csrf_guard, CsrfGuard};
use crate::security::headers::{header_guard, HeaderGuard};
use crate::security::limits::{upload_guard, BodyLimit};
use crate::security::profile::PolicyProfile;
use crate::security::report::{fault_boundary, panic_fault, ErrorReporter};
use crate::session::SessionStore;

/// Default session cookie name.
pub const DEFAULT_COOKIE_NAME: &str = "session";

/// The request pipeline: every security layer, configured from one profile.
#[derive(Clone)]
pub struct SecurityPipeline {
    profile: Arc<PolicyProfile>,
    store: Arc<dyn SessionStore>,
    reporter: ErrorReporter,
    cookie_name: String,
    trust_forwarded_proto: bool,
    canonical_host: Option<String>,
}

impl SecurityPipeline {
    pub fn new(profile: Arc<PolicyProfile>, store: Arc<dyn SessionStore>, reporter: ErrorReporter) -> Self {
        Self {
            profile,
            store,
            reporter,
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            trust_forwarded_proto: false,
            canonical_host: None,
        }
    }

    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    /// Honor `X-Forwarded-Proto` when deciding whether a request used TLS.
    pub fn with_trusted_forwarded_proto(mut self, trust: bool) -> Self {
        self.trust_forwarded_proto = trust;
        self
    }

    /// Redirect plaintext requests to this host instead of the client's `Host`.
    pub fn with_canonical_host(mut self, host: Option<String>) -> Self {
        self.canonical_host = host;
        self
    }

    pub fn profile(&self) -> &PolicyProfile {
        &self.profile
    }

    /// Wrap `app` in the security layers.
    pub fn wrap(&self, app: Router) -> Router {
        let limit = self.profile.max_body_bytes();
        let headers = HeaderGuard::new(self.profile.clone(), self.trust_forwarded_proto)
            .with_canonical_host(self.canonical_host.clone());
        let csrf = CsrfGuard::new(self.profile.csrf_enabled(), self.store.clone());
        let sessions = SessionLayerState {
            policy: Arc::new(SessionCookiePolicy::from_profile(&self.profile, self.cookie_name.clone())),
            store: self.store.clone(),
        };

        // Last added is outermost.
        app.layer(CatchPanicLayer::custom(panic_fault))
            .layer(middleware::from_fn_with_state(self.reporter.clone(), fault_boundary))
            .layer(middleware::from_fn_with_state(csrf, csrf_guard))
            .layer(middleware::from_fn_with_state(sessions, session_guard))
            .layer(DefaultBodyLimit::max(usize::try_from(limit).unwrap_or(usize::MAX)))
            .layer(middleware::from_fn_with_state(BodyLimit(limit), upload_guard))
            .layer(middleware::from_fn_with_state(headers, header_guard))
            .layer(TraceLayer::new_for_http())
    }
}
