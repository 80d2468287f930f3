//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize, environment override)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated, immutable)
//!     → GuardConfig::policy_profile() frozen behind Arc
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{GuardConfig, LogFormat, ObservabilityConfig, SecurityConfig, ServerConfig, SessionConfig};
