//! Backstock inventory server with the security pipeline in front.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use backstock_guard::config::load_config;
use backstock_guard::lifecycle::{signals, Shutdown};
use backstock_guard::observability::logging;
use backstock_guard::security::{BufferedSink, Environment, ErrorReporter, TracingSink};
use backstock_guard::HttpServer;

#[derive(Debug, Parser)]
#[command(name = "backstock-guard", version, about = "Inventory server with environment-aware security policy")]
struct Args {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Deployment mode (dev, test, prod). Overrides BACKSTOCK_ENV and the config file.
    #[arg(short, long)]
    env: Option<Environment>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref(), args.env)?;
    let environment = config.security.environment;

    logging::init(&config.observability, environment);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "backstock-guard starting");

    let profile = Arc::new(config.policy_profile());
    tracing::info!(
        environment = %profile.name(),
        enforce_https = profile.enforce_https(),
        csrf_enabled = profile.csrf_enabled(),
        max_body_bytes = profile.max_body_bytes(),
        "Security profile selected"
    );

    let sink = BufferedSink::spawn(Arc::new(TracingSink), config.observability.diagnostic_buffer);
    let reporter = ErrorReporter::new(Arc::new(sink));
    let server = HttpServer::new(&config, profile, reporter);

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    tokio::spawn(signals::wait_for_signal(shutdown.clone()));
    server.run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
