//! Two-channel error reporting.
//!
//! # Responsibilities
//! - Turn one failure into a `DiagnosticRecord` for operators and a
//!   `UserFacingError` for the caller
//! - Deliver records to an operator-only sink without blocking responses
//! - Catch handler faults and panics at the outer boundary
//!
//! # Design Decisions
//! - `report` never fails: missing detail becomes a placeholder and sink
//!   failures are swallowed
//! - The two values share only the category label
//! - `DiagnosticRecord` has no `Serialize` impl, so it cannot be rendered

use std::any::Any;
use std::borrow::Cow;
use std::error::Error as StdError;
use std::panic::{self, AssertUnwindSafe, Location};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::security::error::SecurityError;

/// Placeholder when the source location cannot be determined.
pub const UNKNOWN_LOCATION: &str = "unknown";

/// Category used when a handler does not name one.
pub const DEFAULT_CATEGORY: &str = "your request";

/// Log target for diagnostic records.
pub const DIAGNOSTICS_TARGET: &str = "backstock_guard::diagnostics";

/// Full failure detail. Operator eyes only.
#[derive(Debug, Clone)]
pub struct DiagnosticRecord {
    pub category: String,
    pub exception_kind: String,
    pub exception_message: String,
    pub source_location: String,
    pub timestamp: SystemTime,
}

/// What the caller is allowed to see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserFacingError {
    category: String,
}

impl UserFacingError {
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Generic sentence for rendering.
    pub fn message(&self) -> String {
        format!("Unable to complete {}. Please try again.", self.category)
    }
}

/// Detail captured at the point of failure, before it is reported.
#[derive(Debug, Clone)]
pub struct FaultDetail {
    kind: String,
    message: String,
    location: Option<String>,
}

impl FaultDetail {
    pub fn from_error<E>(error: &E, location: Option<&Location<'_>>) -> Self
    where
        E: StdError + ?Sized,
    {
        Self {
            kind: std::any::type_name::<E>().to_string(),
            message: describe(error),
            location: location.map(|l| l.to_string()),
        }
    }

    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "<non-string panic payload>".to_string());
        Self {
            kind: "panic".to_string(),
            message,
            location: None,
        }
    }
}

/// Error message with its source chain. A panicking `Display` impl yields a
/// placeholder instead of propagating.
fn describe<E: StdError + ?Sized>(error: &E) -> String {
    panic::catch_unwind(AssertUnwindSafe(|| {
        let mut message = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }))
    .unwrap_or_else(|_| "<message unavailable>".to_string())
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("diagnostic sink is full")]
    Full,
    #[error("diagnostic sink is closed")]
    Closed,
}

/// Operator-only destination for diagnostic records.
pub trait DiagnosticSink: Send + Sync + 'static {
    fn write(&self, record: DiagnosticRecord) -> Result<(), SinkError>;
}

/// Emits records as structured `tracing` events on [`DIAGNOSTICS_TARGET`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn write(&self, record: DiagnosticRecord) -> Result<(), SinkError> {
        let timestamp_ms = record
            .timestamp
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        tracing::error!(
            target: DIAGNOSTICS_TARGET,
            category = %record.category,
            kind = %record.exception_kind,
            location = %record.source_location,
            timestamp_ms = timestamp_ms,
            error_message = %record.exception_message,
            "Request failed"
        );
        Ok(())
    }
}

/// Hands records to a background task so the response path never waits on
/// the inner sink. Records are dropped when the buffer is full.
#[derive(Debug, Clone)]
pub struct BufferedSink {
    tx: mpsc::Sender<DiagnosticRecord>,
}

impl BufferedSink {
    /// Spawn the drain task. Must be called inside a Tokio runtime.
    pub fn spawn(inner: Arc<dyn DiagnosticSink>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<DiagnosticRecord>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(e) = inner.write(record) {
                    tracing::warn!(error = %e, "Diagnostic sink write failed");
                }
            }
        });
        Self { tx }
    }
}

impl DiagnosticSink for BufferedSink {
    fn write(&self, record: DiagnosticRecord) -> Result<(), SinkError> {
        self.tx.try_send(record).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Keeps records in memory. Used by tests.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<DiagnosticRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DiagnosticRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DiagnosticSink for MemorySink {
    fn write(&self, record: DiagnosticRecord) -> Result<(), SinkError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        Ok(())
    }
}

/// The single entry point the application uses for error handling.
#[derive(Clone)]
pub struct ErrorReporter {
    sink: Arc<dyn DiagnosticSink>,
}

impl ErrorReporter {
    pub fn new(sink: Arc<dyn DiagnosticSink>) -> Self {
        Self { sink }
    }

    /// Record `error` for operators and return the caller-safe value.
    /// The source location is the caller of `report`.
    #[track_caller]
    pub fn report<E>(&self, error: &E, category: &str) -> UserFacingError
    where
        E: StdError + ?Sized,
    {
        let detail = FaultDetail::from_error(error, Some(Location::caller()));
        self.report_detail(detail, category)
    }

    /// Record already-captured detail.
    pub fn report_detail(&self, detail: FaultDetail, category: &str) -> UserFacingError {
        let record = DiagnosticRecord {
            category: category.to_string(),
            exception_kind: detail.kind,
            exception_message: detail.message,
            source_location: detail
                .location
                .unwrap_or_else(|| UNKNOWN_LOCATION.to_string()),
            timestamp: SystemTime::now(),
        };

        match panic::catch_unwind(AssertUnwindSafe(|| self.sink.write(record))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(category = %category, error = %e, "Diagnostic record dropped"),
            Err(_) => tracing::warn!(category = %category, "Diagnostic sink panicked"),
        }

        UserFacingError {
            category: category.to_string(),
        }
    }
}

impl<S> FromRequestParts<S> for ErrorReporter
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ErrorReporter>()
            .cloned()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// A handler failure on its way to the fault boundary.
///
/// Built from any error with `?`; the location of the `?` is kept. As a
/// response it is an empty 500, and the detail rides in a response
/// extension that only the boundary reads.
#[derive(Debug, Clone)]
pub struct HandlerFault {
    category: Cow<'static, str>,
    detail: FaultDetail,
}

impl HandlerFault {
    #[track_caller]
    pub fn new<E>(category: impl Into<Cow<'static, str>>, error: &E) -> Self
    where
        E: StdError + ?Sized,
    {
        Self {
            category: category.into(),
            detail: FaultDetail::from_error(error, Some(Location::caller())),
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }
}

impl<E> From<E> for HandlerFault
where
    E: StdError,
{
    #[track_caller]
    fn from(error: E) -> Self {
        Self::new(DEFAULT_CATEGORY, &error)
    }
}

impl IntoResponse for HandlerFault {
    fn into_response(self) -> Response {
        let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
        response.extensions_mut().insert(self);
        response
    }
}

/// Attach a category to a fallible result.
pub trait FaultContext<T> {
    fn in_category(self, category: &'static str) -> Result<T, HandlerFault>;
}

impl<T, E> FaultContext<T> for Result<T, E>
where
    E: StdError,
{
    #[track_caller]
    fn in_category(self, category: &'static str) -> Result<T, HandlerFault> {
        match self {
            Ok(value) => Ok(value),
            Err(error) => Err(HandlerFault::new(category, &error)),
        }
    }
}

/// `CatchPanicLayer` hook: turn a panic into a fault for the boundary.
pub fn panic_fault(payload: Box<dyn Any + Send + 'static>) -> Response<Body> {
    HandlerFault {
        category: Cow::Borrowed(DEFAULT_CATEGORY),
        detail: FaultDetail::from_panic(payload.as_ref()),
    }
    .into_response()
}

/// Middleware: report faults and replace them with a generic page.
pub async fn fault_boundary(State(reporter): State<ErrorReporter>, mut request: Request, next: Next) -> Response {
    request.extensions_mut().insert(reporter.clone());
    let mut response = next.run(request).await;
    match response.extensions_mut().remove::<HandlerFault>() {
        Some(fault) => {
            let user = reporter.report_detail(fault.detail, &fault.category);
            SecurityError::InternalFault {
                category: user.category().to_string(),
            }
            .into_response()
        }
        None => response,
    }
}
