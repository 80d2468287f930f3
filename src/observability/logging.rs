//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global subscriber once at startup
//! - Pick the output format for the deployment mode
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development
//! - Log level configurable via config and `RUST_LOG`

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, ObservabilityConfig};
use crate::security::profile::Environment;

/// Whether JSON output is used for this format and environment.
pub fn use_json(format: LogFormat, environment: Environment) -> bool {
    match format {
        LogFormat::Json => true,
        LogFormat::Pretty => false,
        LogFormat::Auto => environment == Environment::Production,
    }
}

/// Filter directives when `RUST_LOG` is unset.
fn default_directives(level: &str) -> String {
    format!("backstock_guard={level},tower_http={level}")
}

/// Install the global subscriber. A second call is a no-op.
pub fn init(config: &ObservabilityConfig, environment: Environment) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directives(&config.log_level).into());

    let json = use_json(config.log_format, environment);
    let json_layer = json.then(|| fmt::layer().json().with_current_span(false));
    let pretty_layer = (!json).then(fmt::layer);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(pretty_layer)
        .try_init();
}
