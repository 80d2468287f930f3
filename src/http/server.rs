//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the application router and wrap it in the security pipeline
//! - Bind server to listener
//! - Drain in-flight requests on shutdown, bounded by the grace period

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;

use crate::config::GuardConfig;
use crate::http::handlers::{self, Inventory};
use crate::http::pipeline::SecurityPipeline;
use crate::lifecycle::Shutdown;
use crate::security::profile::PolicyProfile;
use crate::security::report::ErrorReporter;
use crate::session::{MemorySessionStore, SessionStore};

/// HTTP server for the inventory application.
pub struct HttpServer {
    router: Router,
    sessions: MemorySessionStore,
    sweep_interval: Duration,
    grace: Duration,
}

/// Upper bound on the time between expired-session sweeps.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

impl HttpServer {
    /// Create a server with the placeholder inventory routes.
    pub fn new(config: &GuardConfig, profile: Arc<PolicyProfile>, reporter: ErrorReporter) -> Self {
        Self::with_app(config, profile, reporter, handlers::router(Inventory::new()))
    }

    /// Create a server around a caller-supplied application router.
    pub fn with_app(config: &GuardConfig, profile: Arc<PolicyProfile>, reporter: ErrorReporter, app: Router) -> Self {
        let idle_timeout = Duration::from_secs(config.session.idle_timeout_secs);
        let sessions = MemorySessionStore::with_limits(idle_timeout, config.session.max_sessions);
        let store: Arc<dyn SessionStore> = Arc::new(sessions.clone());
        let pipeline = SecurityPipeline::new(profile, store, reporter)
            .with_cookie_name(config.session.cookie_name.clone())
            .with_trusted_forwarded_proto(config.server.trust_forwarded_proto)
            .with_canonical_host(config.server.canonical_host.clone());

        Self {
            router: pipeline.wrap(app),
            sessions,
            sweep_interval: idle_timeout.clamp(Duration::from_secs(1), MAX_SWEEP_INTERVAL),
            grace: Duration::from_secs(config.server.shutdown_grace_secs),
        }
    }

    /// The fully wrapped router.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let sweeper = self.sessions.spawn_sweeper(self.sweep_interval);
        let result = self.serve(listener, shutdown).await;
        sweeper.abort();
        result
    }

    async fn serve(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let triggered = shutdown.subscribe();
        let serving = axum::serve(listener, self.router)
            .with_graceful_shutdown(Shutdown::wait(shutdown.subscribe()))
            .into_future();
        tokio::pin!(serving);

        tokio::select! {
            result = &mut serving => return result,
            _ = Shutdown::wait(triggered) => {}
        }

        tracing::info!(grace_secs = self.grace.as_secs(), "Draining in-flight requests");
        match tokio::time::timeout(self.grace, serving).await {
            Ok(result) => result?,
            Err(_) => tracing::warn!("Grace period elapsed with requests still in flight"),
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
