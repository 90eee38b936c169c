use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::PilotConfig;

pub fn init_logging(level: &str, debug: bool, json: bool) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));
    let registry = tracing_subscriber::registry().with(filter);

    // Diagnostics go to stderr; stdout carries command output.
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .init();
    }

    Ok(())
}

pub struct LoadedConfig {
    pub config: PilotConfig,
    pub path: PathBuf,
}

pub fn default_config_path() -> Result<PathBuf> {
    // Priority: ./config/pilot.yaml > ~/.config/bookpilot/pilot.yaml
    let local_config = PathBuf::from("config/pilot.yaml");
    if local_config.exists() {
        return Ok(local_config);
    }
    let mut path = dirs::config_dir().context("Failed to get config directory")?;
    path.push("bookpilot");
    path.push("pilot.yaml");
    Ok(path)
}

pub async fn load_config(config_path: Option<&PathBuf>) -> Result<LoadedConfig> {
    let config_path = match config_path {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };

    let config = read_config(&config_path).await?;
    Ok(LoadedConfig {
        config,
        path: config_path,
    })
}

pub(crate) async fn read_config(path: &Path) -> Result<PilotConfig> {
    if !path.exists() {
        warn!("Config file not found, using defaults: {}", path.display());
        return Ok(PilotConfig::default());
    }

    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: PilotConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;

    info!("Loaded configuration from: {}", path.display());
    Ok(config)
}
