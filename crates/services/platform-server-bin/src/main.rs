use clap::Parser;
use platform_common::AppConfig;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "platform-server")]
#[command(about = "Self-hosted git hosting, IDE workspaces, and CI/CD action runner")]
#[command(version)]
struct Cli {
    /// Port to bind, overriding configuration
    #[arg(short, long)]
    port: Option<u16>,

    /// Log format: plain or json
    #[arg(long, default_value = "plain")]
    log_format: String,
}

fn load_config() -> AppConfig {
    AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!("failed to load config file: {e}. Using defaults.");
        AppConfig::default()
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config();
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    let _tracing_guard = platform_common::tracing_init::setup_tracing(cli.log_format == "json", Some(&config.server.data_dir))?;
    config.require_auth_secret()?;

    info!(port = config.server.port, "starting platform-server");
    platform_server::run(Arc::new(config)).await?;
    Ok(())
}
