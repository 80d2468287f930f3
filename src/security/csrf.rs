//! Cross-site request forgery protection.
//!
//! # Responsibilities
//! - Issue one token per session, the first time a handler asks for it
//! - Expose the token to handlers so forms can embed it
//! - Verify the submitted token on POST/PUT/PATCH/DELETE before the handler runs
//!
//! # Design Decisions
//! - Tokens are per session, not per request, so concurrent tabs keep working
//! - Issuance persists a not-yet-stored session; requests that never ask
//!   for a token never create server-side state
//! - Comparison is constant-time
//! - Submitted values are never logged; rejections log the reason only

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use axum::{
    body::{Body, Bytes},
    extract::{FromRequest, FromRequestParts, Multipart, Request, State},
    http::{header, request::Parts, HeaderMap, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::security::error::{CsrfFailure, SecurityError};
use crate::security::random_hex;
use crate::session::{Session, SessionId, SessionStore, Unsaved};

/// Form field carrying the token.
pub const CSRF_FIELD_NAME: &str = "csrf_token";

/// Headers accepted for scripted clients, checked in order.
pub const CSRF_HEADER_NAMES: [&str; 2] = ["x-csrf-token", "x-csrftoken"];

const TOKEN_BYTES: usize = 32;

/// A session-bound CSRF token. `Debug` does not print the value.
#[derive(Clone)]
pub struct CsrfToken {
    value: String,
    issued_for_session_id: SessionId,
    created_at: SystemTime,
}

impl CsrfToken {
    /// Mint a fresh token for `session_id`.
    pub fn issue(session_id: &SessionId) -> Self {
        Self {
            value: random_hex(TOKEN_BYTES),
            issued_for_session_id: session_id.clone(),
            created_at: SystemTime::now(),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn issued_for(&self) -> &SessionId {
        &self.issued_for_session_id
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Constant-time comparison against a submitted value.
    pub fn matches(&self, submitted: &str) -> bool {
        self.value.as_bytes().ct_eq(submitted.as_bytes()).into()
    }
}

impl fmt::Debug for CsrfToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsrfToken")
            .field("value", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// The current session's token, for embedding in rendered forms.
#[derive(Clone)]
pub struct CsrfField(String);

impl CsrfField {
    pub fn value(&self) -> &str {
        &self.0
    }

    /// Hidden input ready to drop into a form. The value is hex, so it needs
    /// no escaping.
    pub fn hidden_input(&self) -> String {
        format!(
            r#"<input type="hidden" name="{}" value="{}">"#,
            CSRF_FIELD_NAME, self.0
        )
    }
}

impl<S> FromRequestParts<S> for CsrfField
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let issuer = parts
            .extensions
            .get::<CsrfIssuer>()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;
        let issued = issuer
            .guard
            .ensure_token(&issuer.session, issuer.unsaved)
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;
        Ok(CsrfField(issued.token.value().to_string()))
    }
}

/// Request extension that lets `CsrfField` issue the token on demand.
#[derive(Clone)]
struct CsrfIssuer {
    guard: CsrfGuard,
    session: Session,
    unsaved: bool,
}

/// Token issuance and verification against a session store.
#[derive(Clone)]
pub struct CsrfGuard {
    enabled: bool,
    store: Arc<dyn SessionStore>,
}

/// Result of making sure a session has a token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: CsrfToken,
    /// True when the token was minted by this call.
    pub fresh: bool,
}

impl CsrfGuard {
    pub fn new(enabled: bool, store: Arc<dyn SessionStore>) -> Self {
        Self { enabled, store }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Return the session's token, issuing one if it has none yet. An
    /// `unsaved` session is stored with the new token bound. `None` when a
    /// stored session no longer exists.
    pub fn ensure_token(&self, session: &Session, unsaved: bool) -> Option<IssuedToken> {
        if let Some(token) = session.csrf_token() {
            return Some(IssuedToken { token: token.clone(), fresh: false });
        }

        let candidate = CsrfToken::issue(session.id());
        let bound = match self.store.attach_token_if_absent(session.id(), candidate.clone()) {
            Some(bound) => bound,
            None if unsaved => {
                let mut persisted = session.clone();
                persisted.bind_token(candidate.clone());
                self.store.set(persisted);
                candidate.clone()
            }
            None => return None,
        };
        let fresh = bound.matches(candidate.value());
        if fresh {
            tracing::debug!("CSRF token issued for session");
        }
        Some(IssuedToken { token: bound, fresh })
    }

    /// Compare a submitted value with the token the session held before
    /// this request.
    pub fn verify(
        &self,
        expected: Option<&CsrfToken>,
        submitted: Option<&str>,
    ) -> Result<(), CsrfFailure> {
        if !self.enabled {
            return Ok(());
        }
        let submitted = match submitted {
            Some(s) if !s.is_empty() => s,
            _ => return Err(CsrfFailure::Missing),
        };
        let expected = expected.ok_or(CsrfFailure::NoSessionToken)?;
        if expected.matches(submitted) {
            Ok(())
        } else {
            Err(CsrfFailure::Mismatch)
        }
    }
}

/// Methods that change server state.
pub fn is_mutating(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
}

fn header_token(headers: &HeaderMap) -> Option<String> {
    CSRF_HEADER_NAMES
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|v| v.to_str().ok())
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Find the submitted token in a buffered body.
async fn body_token(parts: &Parts, body: &Bytes) -> Option<String> {
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())?;
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match mime.as_str() {
        "application/x-www-form-urlencoded" => url::form_urlencoded::parse(body)
            .find(|(k, _)| k == CSRF_FIELD_NAME)
            .map(|(_, v)| v.into_owned()),
        "multipart/form-data" => multipart_token(parts, content_type, body.clone()).await,
        _ => None,
    }
}

async fn multipart_token(parts: &Parts, content_type: &str, body: Bytes) -> Option<String> {
    let mut probe = Request::new(Body::from(body));
    // Carry the body-limit extension so the extractor honours the profile ceiling.
    *probe.extensions_mut() = parts.extensions.clone();
    let content_type = header::HeaderValue::from_str(content_type).ok()?;
    probe.headers_mut().insert(header::CONTENT_TYPE, content_type);

    let mut multipart = Multipart::from_request(probe, &()).await.ok()?;
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some(CSRF_FIELD_NAME) {
            return field.text().await.ok();
        }
    }
    None
}

/// Middleware: make token issuance available to handlers, then verify the
/// token on mutating requests.
pub async fn csrf_guard(State(guard): State<CsrfGuard>, mut request: Request, next: Next) -> Response {
    let session = request.extensions().get::<Session>().cloned();
    let unsaved = request.extensions().get::<Unsaved>().is_some();

    // Only the token the session held before this request can validate it.
    let expected = session.as_ref().and_then(|s| s.csrf_token()).cloned();

    if let Some(session) = session {
        request.extensions_mut().insert(CsrfIssuer {
            guard: guard.clone(),
            session,
            unsaved,
        });
    }

    if !guard.enabled() || !is_mutating(request.method()) {
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    let (submitted, body) = match header_token(&parts.headers) {
        Some(token) => (Some(token), body),
        None => {
            let bytes = match axum::body::to_bytes(body, usize::MAX).await {
                Ok(bytes) => bytes,
                Err(_) => return SecurityError::BodyUnreadable.into_response(),
            };
            (body_token(&parts, &bytes).await, Body::from(bytes))
        }
    };

    match guard.verify(expected.as_ref(), submitted.as_deref()) {
        Ok(()) => next.run(Request::from_parts(parts, body)).await,
        Err(failure) => {
            tracing::warn!(
                method = %parts.method,
                path = %parts.uri.path(),
                reason = failure.reason(),
                "CSRF validation failed"
            );
            SecurityError::CsrfValidationFailure(failure).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySessionStore;
    use axum::{
        middleware,
        routing::{get, post},
        Extension, Router,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    fn guard_with_session(enabled: bool) -> (CsrfGuard, Session, String) {
        let store = Arc::new(MemorySessionStore::new());
        let session = Session::new();
        store.set(session.clone());
        let guard = CsrfGuard::new(enabled, store.clone());
        let token = guard.ensure_token(&session, false).unwrap().token;
        let session = store.get(session.id()).unwrap();
        (guard, session, token.value().to_string())
    }

    fn app(guard: CsrfGuard, session: Session, hits: Arc<AtomicUsize>) -> Router {
        Router::new()
            .route(
                "/items",
                post(move || {
                    let hits = hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        "ok"
                    }
                }),
            )
            .layer(middleware::from_fn_with_state(guard, csrf_guard))
            .layer(Extension(session))
    }

    fn form_post(body: String) -> Request {
        axum::http::Request::builder()
            .method(Method::POST)
            .uri("/items")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap()
    }

    #[test]
    fn test_verify_outcomes() {
        let (guard, session, token) = guard_with_session(true);
        let expected = session.csrf_token();

        assert_eq!(guard.verify(expected, Some(token.as_str())), Ok(()));
        assert_eq!(guard.verify(expected, None), Err(CsrfFailure::Missing));
        assert_eq!(guard.verify(expected, Some("")), Err(CsrfFailure::Missing));
        assert_eq!(guard.verify(expected, Some("deadbeef")), Err(CsrfFailure::Mismatch));
        assert_eq!(guard.verify(None, Some(token.as_str())), Err(CsrfFailure::NoSessionToken));
    }

    #[test]
    fn test_token_is_stable_for_session() {
        let (guard, session, token) = guard_with_session(true);
        let again = guard.ensure_token(&session, false).unwrap();
        assert!(!again.fresh);
        assert_eq!(again.token.value(), token);
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let id = SessionId::generate();
        let token = CsrfToken::issue(&id);
        assert!(!format!("{:?}", token).contains(token.value()));
    }

    #[tokio::test]
    async fn test_post_without_token_is_rejected_before_handler() {
        let hits = Arc::new(AtomicUsize::new(0));
        let (guard, session, _) = guard_with_session(true);
        let res = app(guard, session, hits.clone())
            .oneshot(form_post("description=milk".into()))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_post_with_form_token_proceeds() {
        let hits = Arc::new(AtomicUsize::new(0));
        let (guard, session, token) = guard_with_session(true);
        let res = app(guard, session, hits.clone())
            .oneshot(form_post(format!("description=milk&csrf_token={}", token)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_post_with_header_token_proceeds() {
        let hits = Arc::new(AtomicUsize::new(0));
        let (guard, session, token) = guard_with_session(true);
        let req = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/items")
            .header("X-CSRF-Token", token)
            .body(Body::empty())
            .unwrap();
        let res = app(guard, session, hits.clone()).oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_multipart_token_proceeds() {
        let hits = Arc::new(AtomicUsize::new(0));
        let (guard, session, token) = guard_with_session(true);
        let boundary = "XBOUNDARY";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"csrf_token\"\r\n\r\n{t}\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"csv-input\"; filename=\"items.csv\"\r\n\
             Content-Type: text/csv\r\n\r\nid,description\r\n1,milk\r\n--{b}--\r\n",
            b = boundary,
            t = token
        );
        let req = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/items")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap();
        let res = app(guard, session, hits.clone()).oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_guard_always_proceeds() {
        let hits = Arc::new(AtomicUsize::new(0));
        let (guard, session, _) = guard_with_session(false);
        let res = app(guard, session, hits.clone())
            .oneshot(form_post("csrf_token=wrong".into()))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    fn form_app(guard: CsrfGuard, session: Session) -> Router {
        Router::new()
            .route("/form", get(|field: CsrfField| async move { field.value().to_string() }))
            .route("/healthz", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(guard, csrf_guard))
            .layer(Extension(session))
            .layer(Extension(Unsaved))
    }

    #[tokio::test]
    async fn test_unsaved_session_stored_only_when_token_requested() {
        let store = MemorySessionStore::new();
        let guard = CsrfGuard::new(true, Arc::new(store.clone()));
        let session = Session::new();
        let id = session.id().clone();

        let req = axum::http::Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        let res = form_app(guard.clone(), session.clone()).oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(store.is_empty());

        let req = axum::http::Request::builder().uri("/form").body(Body::empty()).unwrap();
        let res = form_app(guard, session).oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let field = String::from_utf8(bytes.to_vec()).unwrap();

        let stored = store.get(&id).unwrap();
        assert!(stored.csrf_token().unwrap().matches(&field));
    }

    #[tokio::test]
    async fn test_empty_header_falls_back_to_form_token() {
        let hits = Arc::new(AtomicUsize::new(0));
        let (guard, session, token) = guard_with_session(true);
        let req = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/items")
            .header("X-CSRF-Token", "")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(format!("description=milk&csrf_token={}", token)))
            .unwrap();
        let res = app(guard, session, hits.clone()).oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
