use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use tokio::fs;
use tracing::info;

use crate::cli::context::CliContext;
use crate::cli::output::{emit, OutputFormat};
use crate::cli::runtime::read_config;
use crate::config::PilotConfig;

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration and stored settings
    Show,

    /// Set a value in the configuration file (dotted key)
    Set {
        /// Configuration key, e.g. controller.max_retries
        key: String,

        /// Configuration value
        value: String,
    },

    /// Get a value from the configuration file
    Get {
        /// Configuration key
        key: String,
    },

    /// Validate the configuration file
    Validate,

    /// Store the allow-listed domain used by future runs
    SetDomain {
        /// Domain such as rides.example.com
        domain: Option<String>,

        /// Remove the stored domain
        #[arg(long, conflicts_with = "domain")]
        clear: bool,
    },
}

#[derive(Debug, Serialize)]
struct ConfigReport<'a> {
    config_path: String,
    config: &'a PilotConfig,
    stored_domain: Option<String>,
    run_in_progress: bool,
}

pub async fn cmd_config(args: ConfigArgs, ctx: &CliContext) -> Result<()> {
    let path = ctx.config_path().to_path_buf();
    match args.action {
        ConfigAction::Show => {
            let store = ctx.store()?;
            let report = ConfigReport {
                config_path: path.display().to_string(),
                config: ctx.config(),
                stored_domain: store.allow_listed_domain()?,
                run_in_progress: store.run_in_progress()?,
            };
            emit(ctx.output(), &report, || {
                let body = serde_yaml::to_string(report.config).unwrap_or_default();
                format!(
                    "Current configuration ({}):\n{}\nStored domain: {}\nRun in progress: {}",
                    report.config_path,
                    body,
                    report.stored_domain.as_deref().unwrap_or("<unset>"),
                    report.run_in_progress
                )
            })?;
        }
        ConfigAction::Set { key, value } => {
            let config = read_config(&path).await?.with_value(&key, &value)?;
            save_config_file(&path, &config).await?;
            info!("Updated configuration key {}", key);
            println!("Saved configuration to {}", path.display());
        }
        ConfigAction::Get { key } => {
            let value = read_config(&path).await?.value_at(&key)?;
            emit(ctx.output(), &value, || {
                serde_yaml::to_string(&value)
                    .unwrap_or_default()
                    .trim_end()
                    .to_string()
            })?;
        }
        ConfigAction::Validate => {
            read_config(&path)
                .await?
                .validate()
                .with_context(|| format!("validating {}", path.display()))?;
            println!("Configuration at {} is valid", path.display());
        }
        ConfigAction::SetDomain { domain, clear } => {
            let store = ctx.store()?;
            match (domain, clear) {
                (Some(domain), _) => {
                    store.set_allow_listed_domain(Some(&domain))?;
                    info!(%domain, "allow-listed domain stored");
                }
                (None, true) => {
                    store.set_allow_listed_domain(None)?;
                    info!("allow-listed domain cleared");
                }
                (None, false) => {}
            }
            let stored = store.allow_listed_domain()?;
            emit(ctx.output(), &stored, || match &stored {
                Some(domain) => format!("Allow-listed domain: {domain}"),
                None => "Allow-listed domain: <unset>".to_string(),
            })?;
            if ctx.output() == OutputFormat::Human && ctx.config().allow_listed_domain.is_some() {
                println!("Note: the configuration file domain replaces this at the next run");
            }
        }
    }

    Ok(())
}

async fn save_config_file(path: &Path, config: &PilotConfig) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(path, serde_yaml::to_string(config)?)
        .await
        .with_context(|| format!("writing {}", path.display()))
}
