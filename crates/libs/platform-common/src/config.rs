use config::{Config, File};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// HMAC secret used to sign session cookies and access tokens. Required
    /// in any environment that isn't local development.
    pub auth_secret: Option<String>,
    /// Path prefix the app is mounted under behind a reverse proxy, e.g. `/git`.
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_theme")]
    pub theme: String,
    /// Root directory for repository bare stores, workspace volumes, and
    /// action artifacts.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub ai_enabled: bool,
}

fn default_theme() -> String {
    "auto".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    #[serde(default = "default_event_worker_count")]
    pub event_worker_count: usize,
    #[serde(default = "default_container_runtime_bin")]
    pub container_runtime_bin: String,
    #[serde(default = "default_sandbox_output_cap_bytes")]
    pub sandbox_output_cap_bytes: u64,
    #[serde(default = "default_sandbox_cleanup_grace_secs")]
    pub sandbox_cleanup_grace_secs: u64,
    #[serde(default = "default_workspace_port_range_start")]
    pub workspace_port_range_start: u16,
    #[serde(default = "default_workspace_port_range_end")]
    pub workspace_port_range_end: u16,
}

fn default_event_worker_count() -> usize {
    num_cpus::get().clamp(2, 8)
}

fn default_container_runtime_bin() -> String {
    "docker".to_string()
}

fn default_sandbox_output_cap_bytes() -> u64 {
    2 * 1024 * 1024
}

fn default_sandbox_cleanup_grace_secs() -> u64 {
    300
}

fn default_workspace_port_range_start() -> u16 {
    8000
}

fn default_workspace_port_range_end() -> u16 {
    9000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 5000,
                auth_secret: None,
                prefix: String::new(),
                theme: default_theme(),
                data_dir: default_data_dir(),
                ai_enabled: false,
            },
            runtime: RuntimeConfig {
                event_worker_count: default_event_worker_count(),
                container_runtime_bin: default_container_runtime_bin(),
                sandbox_output_cap_bytes: default_sandbox_output_cap_bytes(),
                sandbox_cleanup_grace_secs: default_sandbox_cleanup_grace_secs(),
                workspace_port_range_start: default_workspace_port_range_start(),
                workspace_port_range_end: default_workspace_port_range_end(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration with 12-factor app compliant env var support.
    ///
    /// Priority order (highest to lowest):
    /// 1. `PORT` / `HOST` / `AUTH_SECRET` / `DATA_DIR` env vars
    /// 2. `SERVER__*` / `RUNTIME__*` namespaced env overrides
    /// 3. Config files (`config/default.toml`, `config/{run_mode}.toml`)
    /// 4. Hardcoded defaults (port 5000)
    pub fn load() -> crate::error::Result<Self> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let mut builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 5000)?
            .set_default("server.prefix", "")?
            .set_default("server.theme", default_theme())?
            .set_default("server.data_dir", default_data_dir().to_string_lossy().into_owned())?
            .set_default("server.ai_enabled", false)?
            .set_default("runtime.event_worker_count", default_event_worker_count() as i64)?
            .set_default("runtime.container_runtime_bin", default_container_runtime_bin())?
            .set_default(
                "runtime.sandbox_output_cap_bytes",
                default_sandbox_output_cap_bytes() as i64,
            )?
            .set_default(
                "runtime.sandbox_cleanup_grace_secs",
                default_sandbox_cleanup_grace_secs() as i64,
            )?
            .set_default(
                "runtime.workspace_port_range_start",
                default_workspace_port_range_start() as i64,
            )?
            .set_default(
                "runtime.workspace_port_range_end",
                default_workspace_port_range_end() as i64,
            )?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(port) = env::var("PORT") {
            if let Ok(p) = port.parse::<i64>() {
                builder = builder.set_override("server.port", p)?;
            }
        }
        if let Ok(host) = env::var("HOST") {
            builder = builder.set_override("server.host", host)?;
        }
        if let Ok(secret) = env::var("AUTH_SECRET") {
            builder = builder.set_override("server.auth_secret", secret)?;
        }
        if let Ok(data_dir) = env::var("DATA_DIR") {
            builder = builder.set_override("server.data_dir", data_dir)?;
        }

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Require `auth_secret` to be present, failing fast outside local dev.
    pub fn require_auth_secret(&self) -> crate::error::Result<&str> {
        self.server
            .auth_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(crate::error::Error::MissingAuthSecret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_port_and_worker_count() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 5000);
        assert!(config.runtime.event_worker_count >= 2);
    }

    #[tokio::test]
    async fn load_honors_port_and_auth_secret_env_overrides() {
        let result = temp_env::async_with_vars(
            [
                ("PORT", Some("9090")),
                ("AUTH_SECRET", Some("test-secret")),
                ("RUN_MODE", Some("test")),
            ],
            async { AppConfig::load() },
        )
        .await;

        let config = result.expect("config should load with overrides applied");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.require_auth_secret().unwrap(), "test-secret");
    }

    #[tokio::test]
    async fn missing_auth_secret_is_rejected() {
        let result = temp_env::async_with_vars(
            [("AUTH_SECRET", None::<&str>), ("RUN_MODE", Some("test"))],
            async { AppConfig::load() },
        )
        .await;

        let config = result.expect("config should still load without a secret");
        assert!(config.require_auth_secret().is_err());
    }
}
