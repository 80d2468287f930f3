//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum::serve, graceful shutdown)
//!     → pipeline.rs (security layers around the app)
//!     → handlers.rs (placeholder inventory routes)
//!     → Send to client
//! ```

pub mod handlers;
pub mod pipeline;
pub mod server;

pub use pipeline::SecurityPipeline;
pub use server::HttpServer;
