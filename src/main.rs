use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;
use web_agent_dispatch::config::{ConfigManager, FileConfigManager};
use web_agent_dispatch::{api, AgentHub};

/// Stdout logging plus an optional plain-text file. The guard flushes the file on drop.
fn init_logging(file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match file {
        Some(path) => {
            let directory = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let file_name = path.file_name().context("logging.file must name a file")?;
            std::fs::create_dir_all(directory)
                .with_context(|| format!("creating log directory {}", directory.display()))?;

            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(directory, file_name));
            let layer = tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init()
        .context("installing tracing subscriber")?;
    Ok(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));
    let config_manager = FileConfigManager::new(config_path.clone());
    let config = config_manager
        .load_config()
        .await
        .with_context(|| format!("loading {}", config_path.display()))?;
    let config = Arc::new(config);

    let _log_guard = init_logging(config.logging.file.as_deref())?;
    tracing::info!("Starting web agent dispatch on {}:{}", config.server.host, config.server.port);

    let hub = AgentHub::from_config(&config)
        .await
        .context("building agent hub")?;
    api::start_api_server(Arc::new(hub), config).await?;

    tracing::info!("Web agent dispatch stopped.");
    Ok(())
}
