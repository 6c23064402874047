//! CLI commands module
//!
//! Contains all CLI command implementations.

pub mod cache;
pub mod config;
pub mod history;
pub mod status;
pub mod watch;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use quotameter_core::quota::{create_engine, ProviderId, QuotaEngine};
use quotameter_core::{EngineConfig, SharedSettings};

use crate::output::OutputFormat;

/// Shared context for all commands
pub struct Context {
    pub config_path: PathBuf,
    pub format: OutputFormat,
    pub quiet: bool,
}

impl Context {
    /// Read and validate the configuration file
    pub fn load_config(&self) -> Result<EngineConfig> {
        EngineConfig::load_from(&self.config_path).with_context(|| {
            format!("Failed to load config from {}", self.config_path.display())
        })
    }

    /// Build an engine over the configured storage and sources
    pub async fn engine(&self, config: &EngineConfig) -> Result<Arc<QuotaEngine>> {
        let settings = Arc::new(SharedSettings::new(config.clone()));
        let engine = create_engine(config, settings)
            .await
            .context("Failed to open quota cache")?;
        Ok(Arc::new(engine))
    }
}

/// Ids of enabled providers, in configuration order
pub fn enabled_ids(config: &EngineConfig) -> Vec<ProviderId> {
    config.enabled_providers().map(|p| p.id.clone()).collect()
}
