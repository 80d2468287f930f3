//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges and header-safe strings
//! - Reject option combinations that make no sense for the environment
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use axum::http::uri::Authority;
use thiserror::Error;

use crate::config::schema::GuardConfig;
use crate::security::profile::Environment;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("server.bind_address {0:?} is not a socket address")]
    BindAddress(String),

    #[error("server.canonical_host {0:?} is not a host[:port]")]
    CanonicalHost(String),

    #[error("session.cookie_name {0:?} is not a valid cookie name")]
    CookieName(String),

    #[error("session.idle_timeout_secs must be greater than zero")]
    IdleTimeout,

    #[error("session.max_sessions must be greater than zero")]
    MaxSessions,

    #[error("security.csp directive name {0:?} is invalid")]
    CspDirectiveName(String),

    #[error("security.csp source {source_token:?} in {directive:?} is invalid")]
    CspSource { directive: String, source_token: String },

    #[error("security.csrf_testing requires the testing environment, not {0}")]
    CsrfTestingOutsideTesting(Environment),

    #[error("observability.diagnostic_buffer must be greater than zero")]
    DiagnosticBuffer,
}

/// RFC 6265 cookie-name token characters.
fn is_cookie_name(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_graphic() && !matches!(b, b'(' | b')' | b'<' | b'>' | b'@' | b',' | b';' | b':' | b'\\' | b'"' | b'/' | b'[' | b']' | b'?' | b'=' | b'{' | b'}')
        })
}

fn is_host(host: &str) -> bool {
    match host.parse::<Authority>() {
        Ok(authority) => !authority.host().is_empty() && !authority.as_str().contains('@'),
        Err(_) => false,
    }
}

fn is_csp_token(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_graphic() && b != b';' && b != b',')
}

pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.server.bind_address.clone()));
    }

    if let Some(host) = &config.server.canonical_host {
        if !is_host(host) {
            errors.push(ValidationError::CanonicalHost(host.clone()));
        }
    }

    if !is_cookie_name(&config.session.cookie_name) {
        errors.push(ValidationError::CookieName(config.session.cookie_name.clone()));
    }

    if config.session.idle_timeout_secs == 0 {
        errors.push(ValidationError::IdleTimeout);
    }

    if config.session.max_sessions == 0 {
        errors.push(ValidationError::MaxSessions);
    }

    for directive in config.security.csp.iter().flatten() {
        if !is_csp_token(&directive.name) {
            errors.push(ValidationError::CspDirectiveName(directive.name.clone()));
        }
        for source in &directive.sources {
            if !is_csp_token(source) {
                errors.push(ValidationError::CspSource {
                    directive: directive.name.clone(),
                    source_token: source.clone(),
                });
            }
        }
    }

    for name in config.security.csp_nonce_directives.iter().flatten() {
        if !is_csp_token(name) {
            errors.push(ValidationError::CspDirectiveName(name.clone()));
        }
    }

    if config.security.csrf_testing && config.security.environment != Environment::Testing {
        errors.push(ValidationError::CsrfTestingOutsideTesting(config.security.environment));
    }

    if config.observability.diagnostic_buffer == 0 {
        errors.push(ValidationError::DiagnosticBuffer);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
