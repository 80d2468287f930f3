//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → headers.rs (HTTPS redirect, mint CSP nonce)
//!     → limits.rs (cap body size)
//!     → cookies.rs (resolve session)
//!     → csrf.rs (issue token, verify on mutating methods)
//!     → report.rs (fault boundary around the handler)
//!     → Application handler
//! Outgoing response:
//!     → cookies.rs (Set-Cookie with profile attributes)
//!     → headers.rs (nosniff, frame options, CSP, HSTS)
//! ```
//!
//! # Design Decisions
//! - Every guard reads the one `PolicyProfile` built at startup
//! - Fail closed: reject on any security check failure
//! - Rejections carry generic bodies; detail goes to the operator log only

pub mod cookies;
pub mod csrf;
pub mod error;
pub mod headers;
pub mod limits;
pub mod profile;
pub mod report;

use rand::RngCore;

pub use cookies::{SessionCookiePolicy, SessionLayerState};
pub use csrf::{CsrfField, CsrfGuard, CsrfToken};
pub use error::{CsrfFailure, SecurityError};
pub use headers::{CspNonce, HeaderGuard, Transport};
pub use limits::BodyLimit;
pub use profile::{CspDirective, Environment, PolicyProfile, SameSite};
pub use report::{
    BufferedSink, DiagnosticRecord, DiagnosticSink, ErrorReporter, FaultContext, HandlerFault,
    MemorySink, SinkError, TracingSink, UserFacingError,
};

/// Hex encoding of `len` bytes from the thread-local CSPRNG.
pub(crate) fn random_hex(len: usize) -> String {
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}
