//! Per-environment security posture.
//!
//! # Responsibilities
//! - Map a deployment mode to one fixed bundle of security settings
//! - Carry the content-security-policy directives in insertion order
//!
//! # Design Decisions
//! - A profile is built once at startup and shared read-only behind `Arc`
//! - Fields are private; the only way to get a profile is a named constructor
//! - The CSRF-enabled testing posture is its own constructor, never a mutation

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Body ceiling shared by every environment (16 MiB).
pub const MAX_BODY_BYTES: u64 = 16 * 1024 * 1024;

/// HSTS max-age (one year).
pub const HSTS_MAX_AGE_SECONDS: u64 = 31_536_000;

/// Deployment mode, read once at process start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    #[serde(alias = "dev")]
    Development,
    #[serde(alias = "test")]
    Testing,
    #[serde(alias = "prod")]
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Testing => "testing",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown environment {0:?} (expected dev, test or prod)")]
pub struct UnknownEnvironment(pub String);

impl FromStr for Environment {
    type Err = UnknownEnvironment;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Development),
            "test" | "testing" => Ok(Environment::Testing),
            "prod" | "production" => Ok(Environment::Production),
            _ => Err(UnknownEnvironment(s.to_string())),
        }
    }
}

/// Cookie `SameSite` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// One CSP directive with its ordered source list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CspDirective {
    pub name: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

impl CspDirective {
    pub fn new(name: &str, sources: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            sources: sources.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Directives every profile starts with.
pub fn default_csp() -> Vec<CspDirective> {
    vec![
        CspDirective::new("default-src", &["'self'"]),
        CspDirective::new("script-src", &["'self'"]),
        CspDirective::new("style-src", &["'self'", "'unsafe-inline'"]),
        CspDirective::new("img-src", &["'self'", "data:"]),
        CspDirective::new("font-src", &["'self'"]),
        CspDirective::new("object-src", &["'none'"]),
        CspDirective::new("base-uri", &["'self'"]),
        CspDirective::new("form-action", &["'self'"]),
        CspDirective::new("frame-ancestors", &["'self'"]),
    ]
}

/// Immutable security posture for one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyProfile {
    name: Environment,
    enforce_https: bool,
    hsts_enabled: bool,
    hsts_max_age_seconds: u64,
    csrf_enabled: bool,
    cookie_secure: bool,
    cookie_same_site: SameSite,
    max_body_bytes: u64,
    csp_directives: Vec<CspDirective>,
    csp_nonce_directives: Vec<String>,
}

impl PolicyProfile {
    /// The fixed profile for a deployment mode.
    pub fn for_environment(env: Environment) -> Self {
        let production = env == Environment::Production;
        Self {
            name: env,
            enforce_https: production,
            hsts_enabled: production,
            hsts_max_age_seconds: HSTS_MAX_AGE_SECONDS,
            csrf_enabled: env != Environment::Testing,
            cookie_secure: production,
            cookie_same_site: SameSite::Lax,
            max_body_bytes: MAX_BODY_BYTES,
            csp_directives: default_csp(),
            csp_nonce_directives: vec!["script-src".to_string()],
        }
    }

    pub fn development() -> Self {
        Self::for_environment(Environment::Development)
    }

    pub fn testing() -> Self {
        Self::for_environment(Environment::Testing)
    }

    pub fn production() -> Self {
        Self::for_environment(Environment::Production)
    }

    /// Testing posture with CSRF verification switched on, for suites that
    /// exercise the token checks.
    pub fn security_testing() -> Self {
        Self {
            csrf_enabled: true,
            ..Self::testing()
        }
    }

    /// Replace the CSP directive list. Only meant for startup, before the
    /// profile is shared.
    pub fn with_csp(self, directives: Vec<CspDirective>) -> Self {
        Self {
            csp_directives: directives,
            ..self
        }
    }

    /// Replace the set of directives that receive the per-request nonce.
    pub fn with_nonce_directives(self, names: Vec<String>) -> Self {
        Self {
            csp_nonce_directives: names,
            ..self
        }
    }

    pub fn name(&self) -> Environment {
        self.name
    }

    pub fn enforce_https(&self) -> bool {
        self.enforce_https
    }

    pub fn hsts_enabled(&self) -> bool {
        self.hsts_enabled
    }

    pub fn hsts_max_age_seconds(&self) -> u64 {
        self.hsts_max_age_seconds
    }

    pub fn csrf_enabled(&self) -> bool {
        self.csrf_enabled
    }

    pub fn cookie_secure(&self) -> bool {
        self.cookie_secure
    }

    pub fn cookie_same_site(&self) -> SameSite {
        self.cookie_same_site
    }

    pub fn max_body_bytes(&self) -> u64 {
        self.max_body_bytes
    }

    pub fn csp_directives(&self) -> &[CspDirective] {
        &self.csp_directives
    }

    pub fn csp_nonce_directives(&self) -> &[String] {
        &self.csp_nonce_directives
    }
}
