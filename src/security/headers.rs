//! Response header hardening and HTTPS enforcement.
//!
//! # Responsibilities
//! - Redirect plaintext requests to HTTPS when the profile enforces it
//! - Mint a per-request CSP nonce and hand it to handlers
//! - Add nosniff, frame options, CSP and (production) HSTS to every response
//!
//! # Design Decisions
//! - The guard owns its header names: values are replaced, never appended,
//!   so applying it twice leaves one value per name
//! - Guard rejections pass back out through here too, so no response
//!   leaves without the headers

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, uri::Authority, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::security::error::SecurityError;
use crate::security::profile::PolicyProfile;
use crate::security::random_hex;

const NONCE_BYTES: usize = 16;

/// Used if a configured CSP cannot be encoded as a header value.
static FALLBACK_CSP: HeaderValue = HeaderValue::from_static("default-src 'none'");
static NOSNIFF: HeaderValue = HeaderValue::from_static("nosniff");
static SAMEORIGIN: HeaderValue = HeaderValue::from_static("SAMEORIGIN");

const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// How the request reached us. A TLS-terminating acceptor inserts this
/// extension; without it the guard falls back to the URI scheme and, when
/// trusted, `X-Forwarded-Proto`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Plaintext,
    Encrypted,
}

/// Per-request CSP nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CspNonce(String);

impl CspNonce {
    pub fn generate() -> Self {
        Self(random_hex(NONCE_BYTES))
    }

    pub fn value(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for CspNonce
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CspNonce>()
            .cloned()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// Computes and injects the security headers for one profile.
#[derive(Debug, Clone)]
pub struct HeaderGuard {
    profile: Arc<PolicyProfile>,
    trust_forwarded_proto: bool,
    canonical_host: Option<String>,
    hsts: Option<HeaderValue>,
}

impl HeaderGuard {
    pub fn new(profile: Arc<PolicyProfile>, trust_forwarded_proto: bool) -> Self {
        let hsts = profile.hsts_enabled().then(|| {
            HeaderValue::from_str(&format!("max-age={}", profile.hsts_max_age_seconds()))
                .unwrap_or_else(|_| HeaderValue::from_static("max-age=31536000"))
        });
        Self {
            profile,
            trust_forwarded_proto,
            canonical_host: None,
            hsts,
        }
    }

    /// Redirect to this host instead of the one the client named.
    pub fn with_canonical_host(mut self, host: Option<String>) -> Self {
        self.canonical_host = host;
        self
    }

    /// Host for the HTTPS redirect. A client-supplied host must be a bare
    /// `host[:port]` authority.
    fn redirect_host<B>(&self, request: &axum::http::Request<B>) -> Option<String> {
        if let Some(host) = &self.canonical_host {
            return Some(host.clone());
        }
        let raw = request
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| request.uri().authority().map(|a| a.to_string()))?;
        let authority = raw.parse::<Authority>().ok()?;
        if authority.as_str().contains('@') || authority.host().is_empty() {
            return None;
        }
        Some(authority.as_str().to_string())
    }

    /// Render the CSP: tokens space-separated, directives `; `-separated,
    /// in profile order. The nonce is appended to the configured directives.
    pub fn content_security_policy(&self, nonce: Option<&CspNonce>) -> String {
        self.profile
            .csp_directives()
            .iter()
            .map(|directive| {
                let mut tokens = Vec::with_capacity(directive.sources.len() + 2);
                tokens.push(directive.name.clone());
                tokens.extend(directive.sources.iter().cloned());
                if let Some(nonce) = nonce {
                    if self
                        .profile
                        .csp_nonce_directives()
                        .iter()
                        .any(|n| n.eq_ignore_ascii_case(&directive.name))
                    {
                        tokens.push(format!("'nonce-{}'", nonce.value()));
                    }
                }
                tokens.join(" ")
            })
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Write the owned headers, replacing whatever is there.
    pub fn apply(&self, headers: &mut HeaderMap, nonce: Option<&CspNonce>) {
        headers.insert(header::X_CONTENT_TYPE_OPTIONS, NOSNIFF.clone());
        headers.insert(header::X_FRAME_OPTIONS, SAMEORIGIN.clone());

        let csp = match HeaderValue::from_str(&self.content_security_policy(nonce)) {
            Ok(value) => value,
            Err(_) => {
                tracing::error!("Configured CSP is not a valid header value, using fallback");
                FALLBACK_CSP.clone()
            }
        };
        headers.insert(header::CONTENT_SECURITY_POLICY, csp);

        match &self.hsts {
            Some(value) => {
                headers.insert(header::STRICT_TRANSPORT_SECURITY, value.clone());
            }
            None => {
                headers.remove(header::STRICT_TRANSPORT_SECURITY);
            }
        }
    }

    /// Whether the request arrived without TLS.
    pub fn is_plaintext<B>(&self, request: &axum::http::Request<B>) -> bool {
        if let Some(transport) = request.extensions().get::<Transport>() {
            return *transport == Transport::Plaintext;
        }
        if let Some(scheme) = request.uri().scheme_str() {
            return !scheme.eq_ignore_ascii_case("https");
        }
        if self.trust_forwarded_proto {
            if let Some(proto) = request
                .headers()
                .get(X_FORWARDED_PROTO)
                .and_then(|v| v.to_str().ok())
            {
                // Left-most value is the client-facing hop.
                let first = proto.split(',').next().unwrap_or_default().trim();
                return !first.eq_ignore_ascii_case("https");
            }
        }
        true
    }

    /// Redirect for a plaintext request, or `None` when it may proceed.
    pub fn https_redirect<B>(&self, request: &axum::http::Request<B>) -> Option<Response> {
        if !self.profile.enforce_https() || !self.is_plaintext(request) {
            return None;
        }

        let host = self.redirect_host(request);
        let path = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let location = host
            .and_then(|h| HeaderValue::from_str(&format!("https://{}{}", h, path)).ok());

        let response = match location {
            Some(location) => {
                tracing::debug!(path = %request.uri().path(), "Redirecting plaintext request to HTTPS");
                (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
            }
            None => {
                tracing::warn!("Plaintext request without usable host under HTTPS enforcement");
                SecurityError::UnroutableRedirect.into_response()
            }
        };
        Some(response)
    }
}

/// Middleware: outermost security layer.
pub async fn header_guard(State(guard): State<HeaderGuard>, mut request: Request, next: Next) -> Response {
    if let Some(mut redirect) = guard.https_redirect(&request) {
        guard.apply(redirect.headers_mut(), None);
        return redirect;
    }

    let nonce = CspNonce::generate();
    request.extensions_mut().insert(nonce.clone());

    let mut response = next.run(request).await;
    guard.apply(response.headers_mut(), Some(&nonce));
    response
}
