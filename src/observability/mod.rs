//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Security layers and handlers produce:
//!     → tracing events (rejections, session changes, request spans)
//!     → diagnostic records (security::report, target backstock_guard::diagnostics)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout, pretty or JSON)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing in production
//! - Secrets (session ids, tokens) never appear in log fields

pub mod logging;
