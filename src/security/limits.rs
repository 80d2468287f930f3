//! Request body limits.
//!
//! # Responsibilities
//! - Reject a declared `Content-Length` above the ceiling without reading
//! - Cap cumulative bytes for chunked or streamed bodies
//! - Hand the handler a body that is already within bounds
//!
//! # Design Decisions
//! - Checked before any handler or extractor touches the body
//! - Each request owns its buffer; dropping the future releases it
//! - Return 413 Payload Too Large

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures_util::StreamExt;

use crate::security::error::SecurityError;

/// Byte ceiling for request bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyLimit(pub u64);

/// Why a body could not be buffered.
#[derive(Debug)]
pub enum BodyReadError {
    TooLarge,
    Transport(axum::Error),
}

/// Declared `Content-Length`, if present and well-formed.
pub fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Most memory reserved up front for a body. Anything beyond this is only
/// allocated as bytes actually arrive.
const INITIAL_BUFFER_BYTES: u64 = 64 * 1024;

/// Starting capacity for a body buffer. The client's `Content-Length` is a
/// claim, so it can shrink the reservation but never grow it past
/// `INITIAL_BUFFER_BYTES`.
fn initial_capacity(size_hint: Option<u64>, limit: u64) -> usize {
    let capacity = size_hint.unwrap_or(0).min(limit).min(INITIAL_BUFFER_BYTES);
    usize::try_from(capacity).unwrap_or(0)
}

/// Read `body` into memory, failing as soon as more than `limit` bytes
/// have arrived.
pub async fn read_capped(body: Body, limit: u64, size_hint: Option<u64>) -> Result<Bytes, BodyReadError> {
    let mut buf: Vec<u8> = Vec::with_capacity(initial_capacity(size_hint, limit));
    let mut stream = body.into_data_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(BodyReadError::Transport)?;
        if (buf.len() + chunk.len()) as u64 > limit {
            return Err(BodyReadError::TooLarge);
        }
        buf.extend_from_slice(&chunk);
    }

    Ok(Bytes::from(buf))
}

/// Middleware: enforce the body ceiling before the rest of the stack runs.
pub async fn upload_guard(State(BodyLimit(limit)): State<BodyLimit>, request: Request, next: Next) -> Response {
    let declared = declared_length(request.headers());
    if declared.is_some_and(|len| len > limit) {
        tracing::warn!(
            path = %request.uri().path(),
            declared = ?declared,
            limit = limit,
            "Declared body length exceeds limit"
        );
        return SecurityError::PayloadTooLarge { limit }.into_response();
    }

    let (parts, body) = request.into_parts();
    match read_capped(body, limit, declared).await {
        Ok(bytes) => next.run(Request::from_parts(parts, Body::from(bytes))).await,
        Err(BodyReadError::TooLarge) => {
            tracing::warn!(path = %parts.uri.path(), limit = limit, "Streamed body exceeds limit");
            SecurityError::PayloadTooLarge { limit }.into_response()
        }
        Err(BodyReadError::Transport(e)) => {
            tracing::debug!(path = %parts.uri.path(), error = %e, "Failed to read request body");
            SecurityError::BodyUnreadable.into_response()
        }
    }
}
