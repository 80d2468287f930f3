//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::security::profile::{CspDirective, Environment, PolicyProfile};
use crate::session::{DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_SESSIONS};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Listener settings.
    pub server: ServerConfig,

    /// Deployment mode and CSP overrides.
    pub security: SecurityConfig,

    /// Session cookie settings.
    pub session: SessionConfig,

    /// Logging settings.
    pub observability: ObservabilityConfig,
}

impl GuardConfig {
    /// Build the profile for the configured environment. Called once at
    /// startup; the result is frozen behind `Arc` afterwards.
    pub fn policy_profile(&self) -> PolicyProfile {
        let mut profile = if self.security.csrf_testing {
            PolicyProfile::security_testing()
        } else {
            PolicyProfile::for_environment(self.security.environment)
        };
        if let Some(csp) = &self.security.csp {
            profile = profile.with_csp(csp.clone());
        }
        if let Some(names) = &self.security.csp_nonce_directives {
            profile = profile.with_nonce_directives(names.clone());
        }
        profile
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:5000").
    pub bind_address: String,

    /// Treat `X-Forwarded-Proto` as authoritative. Only enable behind a
    /// proxy that overwrites the header.
    pub trust_forwarded_proto: bool,

    /// Seconds to wait for in-flight requests after a shutdown signal.
    pub shutdown_grace_secs: u64,

    /// Host (with optional port) used in HTTPS redirects. When unset the
    /// request's own `Host` is used.
    pub canonical_host: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:5000".to_string(),
            trust_forwarded_proto: false,
            shutdown_grace_secs: 10,
            canonical_host: None,
        }
    }
}

/// Security configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SecurityConfig {
    /// Deployment mode (development, testing, production).
    pub environment: Environment,

    /// Use the CSRF-enabled testing profile. Testing environment only.
    pub csrf_testing: bool,

    /// Replace the default CSP directives, in order.
    pub csp: Option<Vec<CspDirective>>,

    /// Directives that receive the per-request nonce.
    pub csp_nonce_directives: Option<Vec<String>>,
}

/// Session cookie configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Cookie name.
    pub cookie_name: String,

    /// Seconds a session may sit unused before it is dropped.
    pub idle_timeout_secs: u64,

    /// Live sessions kept in memory before the least recent is evicted.
    pub max_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "session".to_string(),
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT.as_secs(),
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON in production, pretty elsewhere.
    #[default]
    Auto,
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins.
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Diagnostic records buffered before new ones are dropped.
    pub diagnostic_buffer: usize,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Auto,
            diagnostic_buffer: 1024,
        }
    }
}
