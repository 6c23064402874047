//! # quotameter-core
//!
//! Usage state engine for rolling-window AI subscription quotas - shared
//! between the CLI and desktop shells.
//!
//! This crate provides:
//! - Configuration and per-provider settings (`config` module)
//! - SQLite persistence (`db` module)
//! - Polling, caching, state machine and display rules (`quota` module)
//! - Unified error handling (`error` module)

pub mod config;
pub mod db;
pub mod error;
pub mod quota;

// Re-exports for convenience
pub use config::{EngineConfig, ProviderSettings, SettingsStore, SharedSettings, SourceConfig};
pub use db::Database;
pub use error::{Error, Result};

pub use quota::{
    create_engine, DisplaySnapshot, DisplayState, EngineEvent, PollScheduler, ProviderId,
    QuotaEngine, SchedulerOptions, SeverityZone, ThresholdConfig, TimeBand,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the library version
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_exists() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_version_format() {
        let v = version();
        let parts: Vec<&str> = v.split('.').collect();
        assert_eq!(parts.len(), 3, "Version should be in x.y.z format");
    }
}
