//! Environment-aware security layer for the Backstock inventory app.
//!
//! A single [`PolicyProfile`] chosen at startup drives every guard in the
//! request pipeline: response headers and HTTPS enforcement, CSRF tokens,
//! session cookie attributes, the upload ceiling and the fault boundary.
//!
//! ```text
//! request → HeaderGuard → UploadGuard → SessionCookiePolicy → CsrfGuard
//!         → ErrorReporter boundary → handler
//! ```

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;
pub mod session;

pub use config::GuardConfig;
pub use http::{HttpServer, SecurityPipeline};
pub use lifecycle::Shutdown;
pub use security::{Environment, ErrorReporter, PolicyProfile};
