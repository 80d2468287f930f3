//! Session cookie policy.
//!
//! # Responsibilities
//! - Resolve the request's session from the cookie, minting one if needed
//! - Write the session `Set-Cookie` with the profile's attributes
//! - Carry out renew/destroy requests made by handlers
//!
//! # Design Decisions
//! - This is the only place that writes the session cookie
//! - HttpOnly is unconditional; Secure and SameSite come from the profile
//! - A minted session gets a cookie only if a later layer stored it

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};

use crate::security::profile::{PolicyProfile, SameSite};
use crate::session::{Session, SessionAction, SessionControl, SessionId, SessionStore, Unsaved};

/// Attributes for the session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookiePolicy {
    name: String,
    secure: bool,
    same_site: SameSite,
}

impl SessionCookiePolicy {
    pub fn from_profile(profile: &PolicyProfile, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            secure: profile.cookie_secure(),
            same_site: profile.cookie_same_site(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn attributes(&self) -> String {
        let mut attrs = format!("; Path=/; HttpOnly; SameSite={}", self.same_site.as_str());
        if self.secure {
            attrs.push_str("; Secure");
        }
        attrs
    }

    /// `Set-Cookie` value establishing `id`.
    pub fn issue(&self, id: &SessionId) -> String {
        format!("{}={}{}", self.name, id.as_str(), self.attributes())
    }

    /// `Set-Cookie` value expiring the cookie.
    pub fn clear(&self) -> String {
        format!("{}=; Max-Age=0{}", self.name, self.attributes())
    }

    /// Session id from the request's `Cookie` headers, if well-formed.
    pub fn session_id(&self, headers: &HeaderMap) -> Option<SessionId> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.name)
            .and_then(|(_, value)| SessionId::parse(value.trim()))
    }

    /// Replace any session `Set-Cookie` on the response with `value`.
    /// Cookies with other names are left alone.
    pub fn write(&self, headers: &mut HeaderMap, value: &str) {
        let prefix = format!("{}=", self.name);
        let others: Vec<HeaderValue> = headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter(|v| !v.as_bytes().starts_with(prefix.as_bytes()))
            .cloned()
            .collect();

        headers.remove(header::SET_COOKIE);
        for other in others {
            headers.append(header::SET_COOKIE, other);
        }

        match HeaderValue::from_str(value) {
            Ok(v) => {
                headers.append(header::SET_COOKIE, v);
            }
            Err(_) => tracing::error!(cookie = %self.name, "Session cookie is not a valid header value"),
        }
    }
}

/// State for the session middleware.
#[derive(Clone)]
pub struct SessionLayerState {
    pub policy: Arc<SessionCookiePolicy>,
    pub store: Arc<dyn SessionStore>,
}

/// Middleware: attach a session to the request and write its cookie.
pub async fn session_guard(State(state): State<SessionLayerState>, mut request: Request, next: Next) -> Response {
    let existing = state
        .policy
        .session_id(request.headers())
        .and_then(|id| state.store.get(&id));

    let (session, created) = match existing {
        Some(session) => (session, false),
        None => (Session::new(), true),
    };

    let control = SessionControl::new();
    let session_id = session.id().clone();
    request.extensions_mut().insert(session);
    request.extensions_mut().insert(control.clone());
    if created {
        request.extensions_mut().insert(Unsaved);
    }

    let mut response = next.run(request).await;

    match control.requested() {
        SessionAction::Keep => {
            if created && state.store.get(&session_id).is_some() {
                state.policy.write(response.headers_mut(), &state.policy.issue(&session_id));
                tracing::debug!("New session created");
            }
        }
        SessionAction::Renew => {
            state.store.destroy(&session_id);
            let fresh = Session::new();
            let cookie = state.policy.issue(fresh.id());
            state.store.set(fresh);
            state.policy.write(response.headers_mut(), &cookie);
            tracing::debug!("Session renewed");
        }
        SessionAction::Destroy => {
            state.store.destroy(&session_id);
            if !created {
                state.policy.write(response.headers_mut(), &state.policy.clear());
            }
            tracing::debug!("Session destroyed");
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySessionStore;
    use axum::{body::Body, http::StatusCode, middleware, routing::post, Router};
    use tower::ServiceExt;

    fn state(profile: &PolicyProfile) -> (SessionLayerState, MemorySessionStore) {
        let store = MemorySessionStore::new();
        let state = SessionLayerState {
            policy: Arc::new(SessionCookiePolicy::from_profile(profile, "session")),
            store: Arc::new(store.clone()),
        };
        (state, store)
    }

    fn app(state: SessionLayerState) -> Router {
        Router::new()
            .route("/", post(|| async { "home" }))
            .route(
                "/remember",
                post({
                    let store = state.store.clone();
                    move |axum::Extension(session): axum::Extension<Session>| {
                        let store = store.clone();
                        async move {
                            store.set(session);
                            "stored"
                        }
                    }
                }),
            )
            .route(
                "/login",
                post(|control: SessionControl| async move {
                    control.renew();
                    ([(header::SET_COOKIE, "session=forged")], "logged in")
                }),
            )
            .route(
                "/logout",
                post(|control: SessionControl| async move {
                    control.destroy();
                    "bye"
                }),
            )
            .layer(middleware::from_fn_with_state(state, session_guard))
    }

    fn post_to(uri: &str, cookie: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().method("POST").uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn set_cookies(res: &Response) -> Vec<String> {
        res.headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_cookie_attributes_per_profile() {
        let id = SessionId::generate();

        let prod = SessionCookiePolicy::from_profile(&PolicyProfile::production(), "session");
        let cookie = prod.issue(&id);
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("SameSite=Lax"));

        for profile in [PolicyProfile::development(), PolicyProfile::testing()] {
            let policy = SessionCookiePolicy::from_profile(&profile, "session");
            let cookie = policy.issue(&id);
            assert!(cookie.contains("HttpOnly"));
            assert!(!cookie.contains("Secure"));
            assert!(cookie.contains("SameSite=Lax"));
        }
    }

    #[test]
    fn test_session_id_from_cookie_header() {
        let policy = SessionCookiePolicy::from_profile(&PolicyProfile::development(), "session");
        let id = SessionId::generate();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            format!("theme=dark; session={}", id.as_str()).parse().unwrap(),
        );
        assert_eq!(policy.session_id(&headers), Some(id));

        headers.insert(header::COOKIE, "session=../../etc".parse().unwrap());
        assert_eq!(policy.session_id(&headers), None);
    }

    #[tokio::test]
    async fn test_untouched_session_leaves_no_state() {
        let (state, store) = state(&PolicyProfile::development());
        for _ in 0..100 {
            let res = app(state.clone()).oneshot(post_to("/", None)).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
            assert!(set_cookies(&res).is_empty());
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_stored_session_sets_cookie_once() {
        let (state, store) = state(&PolicyProfile::development());
        let res = app(state.clone()).oneshot(post_to("/remember", None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let cookies = set_cookies(&res);
        assert_eq!(cookies.len(), 1);
        assert!(cookies[0].starts_with("session="));
        assert_eq!(store.len(), 1);

        // Returning with the cookie neither creates a session nor rewrites it.
        let pair = cookies[0].split(';').next().unwrap().to_string();
        let res = app(state).oneshot(post_to("/", Some(&pair))).await.unwrap();
        assert!(set_cookies(&res).is_empty());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_renew_replaces_session_and_handler_cookie() {
        let (state, store) = state(&PolicyProfile::production());
        let existing = Session::new();
        let old_id = existing.id().clone();
        store.set(existing);

        let res = app(state)
            .oneshot(post_to("/login", Some(&format!("session={}", old_id.as_str()))))
            .await
            .unwrap();

        let cookies = set_cookies(&res);
        assert_eq!(cookies.len(), 1);
        assert!(!cookies[0].contains("forged"));
        assert!(!cookies[0].contains(old_id.as_str()));
        assert!(cookies[0].contains("Secure"));
        assert!(store.get(&old_id).is_none());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_destroy_clears_cookie() {
        let (state, store) = state(&PolicyProfile::development());
        let existing = Session::new();
        let id = existing.id().clone();
        store.set(existing);

        let res = app(state)
            .oneshot(post_to("/logout", Some(&format!("session={}", id.as_str()))))
            .await
            .unwrap();

        let cookies = set_cookies(&res);
        assert_eq!(cookies.len(), 1);
        assert!(cookies[0].contains("Max-Age=0"));
        assert!(cookies[0].contains("HttpOnly"));
        assert!(store.is_empty());
    }
}
