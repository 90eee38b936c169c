use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use pilot_state_center::PilotStore;

use super::output::OutputFormat;
use crate::config::PilotConfig;
use crate::pilot::open_store;

pub struct CliContext {
    config: Arc<PilotConfig>,
    config_path: PathBuf,
    output: OutputFormat,
}

impl CliContext {
    pub fn new(config: PilotConfig, config_path: PathBuf, output: OutputFormat) -> Self {
        Self {
            config: Arc::new(config),
            config_path,
            output,
        }
    }

    pub fn config(&self) -> &PilotConfig {
        self.config.as_ref()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn output(&self) -> OutputFormat {
        self.output
    }

    pub fn store(&self) -> Result<PilotStore> {
        open_store(self.config())
    }
}
