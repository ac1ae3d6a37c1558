use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use platform_common::AppConfig;
use reqwest::Client;
use tempfile::TempDir;

/// A running `platform-server` instance bound to a loopback port, backed
/// by a temporary data directory that is removed when the handle drops.
pub struct TestServer {
    pub base_url: String,
    pub client: Client,
    _data_dir: TempDir,
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("failed to bind an ephemeral port")
        .local_addr()
        .expect("failed to read local addr")
        .port()
}

impl TestServer {
    /// Boot a fresh server with its own data directory and auth secret,
    /// and block until its `/health` endpoint responds.
    pub async fn spawn() -> Self {
        let data_dir = TempDir::new().expect("failed to create temp data dir");
        let port = free_port();

        let mut config = AppConfig::default();
        config.server.port = port;
        config.server.data_dir = data_dir.path().to_path_buf();
        config.server.auth_secret = Some("e2e-test-secret".to_string());
        // No container runtime is available in the test environment;
        // workspace/action tests only exercise the parts of the flow
        // that don't require a real container to start successfully.
        config.runtime.container_runtime_bin = "true".to_string();

        tokio::spawn(platform_server::run(Arc::new(config)));

        let client = Client::builder()
            .cookie_store(true)
            .build()
            .expect("failed to build reqwest client");
        let base_url = format!("http://127.0.0.1:{port}");

        wait_until_ready(&client, &base_url).await;

        Self { base_url, client, _data_dir: data_dir }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

async fn wait_until_ready(client: &Client, base_url: &str) {
    for _ in 0..100 {
        if let Ok(resp) = client.get(format!("{base_url}/health")).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("server at {base_url} did not become ready in time");
}
