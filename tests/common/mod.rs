//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::sync::Arc;

use backstock_guard::config::GuardConfig;
use backstock_guard::security::MemorySink;
use backstock_guard::{ErrorReporter, HttpServer, PolicyProfile, Shutdown};
use tokio::net::TcpListener;

/// A server running on an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub sink: MemorySink,
    pub shutdown: Shutdown,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start the full application with `profile`.
pub async fn spawn_server(profile: PolicyProfile) -> TestServer {
    spawn_server_with(profile, GuardConfig::default()).await
}

#[allow(dead_code)]
pub async fn spawn_server_with(profile: PolicyProfile, config: GuardConfig) -> TestServer {
    let sink = MemorySink::new();
    let reporter = ErrorReporter::new(Arc::new(sink.clone()));
    let server = HttpServer::new(&config, Arc::new(profile), reporter);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let handle = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(listener, handle).await;
    });

    TestServer { addr, sink, shutdown }
}

/// Client that leaves redirects and cookies to the test.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

/// `name=value` of the first `Set-Cookie` on the response.
#[allow(dead_code)]
pub fn session_cookie(res: &reqwest::Response) -> String {
    res.headers()
        .get(reqwest::header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string()
}

/// Pull the hidden CSRF input's value out of a rendered page.
#[allow(dead_code)]
pub fn csrf_from_page(html: &str) -> String {
    let marker = r#"name="csrf_token" value=""#;
    let start = html.find(marker).unwrap() + marker.len();
    let end = start + html[start..].find('"').unwrap();
    html[start..end].to_string()
}
