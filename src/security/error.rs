//! Rejections raised at the guard boundary.

use std::fmt;

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Why a CSRF check failed. Never carries the submitted value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrfFailure {
    /// No token was submitted.
    Missing,
    /// A token was submitted but does not match the session's.
    Mismatch,
    /// The session had no token before this request.
    NoSessionToken,
}

impl CsrfFailure {
    pub fn reason(&self) -> &'static str {
        match self {
            CsrfFailure::Missing => "missing",
            CsrfFailure::Mismatch => "mismatch",
            CsrfFailure::NoSessionToken => "no_session_token",
        }
    }
}

impl fmt::Display for CsrfFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// Terminal outcomes for a request that the security layer owns.
#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("CSRF validation failed: {0}")]
    CsrfValidationFailure(CsrfFailure),

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error("request body could not be read")]
    BodyUnreadable,

    #[error("plaintext request has no host to redirect to")]
    UnroutableRedirect,

    #[error("internal fault in {category}")]
    InternalFault { category: String },
}

impl SecurityError {
    pub fn status(&self) -> StatusCode {
        match self {
            SecurityError::CsrfValidationFailure(_) => StatusCode::BAD_REQUEST,
            SecurityError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            SecurityError::BodyUnreadable => StatusCode::BAD_REQUEST,
            SecurityError::UnroutableRedirect => StatusCode::BAD_REQUEST,
            SecurityError::InternalFault { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Body shown to the caller. Generic by construction.
    fn public_message(&self) -> String {
        match self {
            SecurityError::CsrfValidationFailure(_) => {
                "Bad Request: the form could not be verified. Reload the page and try again.".to_string()
            }
            SecurityError::PayloadTooLarge { .. } => "Payload Too Large".to_string(),
            SecurityError::BodyUnreadable | SecurityError::UnroutableRedirect => {
                "Bad Request".to_string()
            }
            SecurityError::InternalFault { category } => {
                format!("Unable to complete {}. Please try again.", category)
            }
        }
    }
}

impl IntoResponse for SecurityError {
    fn into_response(self) -> Response {
        (
            self.status(),
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.public_message(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            SecurityError::CsrfValidationFailure(CsrfFailure::Missing).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            SecurityError::PayloadTooLarge { limit: 10 }.status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            SecurityError::InternalFault { category: "search".into() }.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_public_message_is_generic() {
        let err = SecurityError::CsrfValidationFailure(CsrfFailure::Mismatch);
        assert!(!err.public_message().contains("mismatch"));

        let err = SecurityError::InternalFault { category: "search".into() };
        assert_eq!(err.public_message(), "Unable to complete search. Please try again.");
    }
}
