//! Engine configuration
//!
//! JSON settings file describing tunables and the tracked providers, plus the
//! [`SettingsStore`] seam the engine reads thresholds through.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::quota::threshold::ThresholdConfig;
use crate::quota::types::ProviderId;

// ============================================================================
// Constants
// ============================================================================

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "QUOTAMETER_CONFIG";

/// Minimum recurring poll interval in seconds
pub const MIN_POLL_INTERVAL_SECS: u64 = 30;

/// Default recurring poll interval in seconds
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 120;

/// Default staleness threshold in seconds
pub const DEFAULT_STALE_AFTER_SECS: u64 = 300;

/// Default oracle request timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 12;

/// Bounds for the oracle request timeout
pub const MIN_REQUEST_TIMEOUT_SECS: u64 = 1;
pub const MAX_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Default number of completed windows remembered per provider
pub const DEFAULT_WINDOW_HISTORY_LEN: usize = 6;

const APP_DIR: &str = "quotameter";

// ============================================================================
// Provider Settings
// ============================================================================

/// Where a provider's usage comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Anthropic OAuth usage endpoint
    ClaudeOauth {
        /// Override for `~/.claude/.credentials.json`
        #[serde(default)]
        credentials_path: Option<String>,
        /// Environment variable holding a manually configured token
        #[serde(default)]
        token_env: Option<String>,
    },
    /// Usage document written by another tool
    JsonFile { path: String },
}

/// Settings for one tracked provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub id: ProviderId,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Recurring poll interval (minimum 30s)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Length of the primary rolling window
    #[serde(default = "default_window_hours")]
    pub window_hours: u32,
    /// Length of the secondary window, if the oracle reports one
    #[serde(default = "default_secondary_window_hours")]
    pub secondary_window_hours: Option<u32>,
    pub source: SourceConfig,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
}

impl ProviderSettings {
    pub fn new(id: impl Into<ProviderId>, source: SourceConfig) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            enabled: true,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            window_hours: default_window_hours(),
            secondary_window_hours: default_secondary_window_hours(),
            source,
            thresholds: ThresholdConfig::default(),
        }
    }

    pub fn with_poll_interval(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    pub fn with_thresholds(mut self, thresholds: ThresholdConfig) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.window_hours as i64)
    }

    pub fn secondary_window(&self) -> Option<chrono::Duration> {
        self.secondary_window_hours
            .map(|h| chrono::Duration::hours(h as i64))
    }

    pub fn label(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_window_hours() -> u32 {
    5
}

fn default_secondary_window_hours() -> Option<u32> {
    Some(24 * 7)
}

// ============================================================================
// Engine Config
// ============================================================================

/// Durable cache backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    #[default]
    Sqlite,
    Json,
    Memory,
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Cached readings older than this are stale
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
    /// Bound on every oracle request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Delay before the first poll of the first provider
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,
    /// Extra delay per provider index, spreading initial polls
    #[serde(default = "default_stagger")]
    pub stagger_secs: u64,
    /// Random jitter added to each initial delay (upper bound)
    #[serde(default = "default_jitter")]
    pub jitter_ms: u64,
    /// Completed windows remembered per provider
    #[serde(default = "default_history_len")]
    pub window_history_len: usize,
    #[serde(default)]
    pub storage: StorageKind,
    /// Cache location; defaults under the local data directory
    #[serde(default)]
    pub cache_path: Option<String>,
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderSettings>,
}

fn default_stale_after() -> u64 {
    DEFAULT_STALE_AFTER_SECS
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_initial_delay() -> u64 {
    3
}

fn default_stagger() -> u64 {
    2
}

fn default_jitter() -> u64 {
    750
}

fn default_history_len() -> usize {
    DEFAULT_WINDOW_HISTORY_LEN
}

fn default_providers() -> Vec<ProviderSettings> {
    vec![ProviderSettings {
        display_name: Some("Claude Code".to_string()),
        ..ProviderSettings::new(
            "claude",
            SourceConfig::ClaudeOauth {
                credentials_path: None,
                token_env: None,
            },
        )
    }]
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after(),
            request_timeout_secs: default_request_timeout(),
            initial_delay_secs: default_initial_delay(),
            stagger_secs: default_stagger(),
            jitter_ms: default_jitter(),
            window_history_len: default_history_len(),
            storage: StorageKind::default(),
            cache_path: None,
            providers: default_providers(),
        }
    }
}

impl EngineConfig {
    /// Normalize tunables and reject inconsistent provider lists
    ///
    /// Intervals and timeouts are clamped to their bounds. Threshold
    /// ordering is already enforced when thresholds are constructed.
    pub fn validate(&self) -> Result<Self> {
        let mut seen = HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.id.clone()) {
                return Err(Error::config(format!("duplicate provider id: {}", provider.id)));
            }
            if provider.window_hours == 0 {
                return Err(Error::config(format!(
                    "{}: window_hours must be at least 1",
                    provider.id
                )));
            }
        }

        let providers = self
            .providers
            .iter()
            .cloned()
            .map(|mut p| {
                p.poll_interval_secs = p.poll_interval_secs.max(MIN_POLL_INTERVAL_SECS);
                p.secondary_window_hours = p.secondary_window_hours.filter(|h| *h > 0);
                p
            })
            .collect();

        Ok(Self {
            stale_after_secs: self.stale_after_secs.max(1),
            request_timeout_secs: self
                .request_timeout_secs
                .clamp(MIN_REQUEST_TIMEOUT_SECS, MAX_REQUEST_TIMEOUT_SECS),
            initial_delay_secs: self.initial_delay_secs,
            stagger_secs: self.stagger_secs,
            jitter_ms: self.jitter_ms,
            window_history_len: self.window_history_len,
            storage: self.storage,
            cache_path: self.cache_path.clone(),
            providers,
        })
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_secs as i64)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn provider(&self, id: &ProviderId) -> Option<&ProviderSettings> {
        self.providers.iter().find(|p| &p.id == id)
    }

    pub fn enabled_providers(&self) -> impl Iterator<Item = &ProviderSettings> {
        self.providers.iter().filter(|p| p.enabled)
    }

    /// Cache file location for the configured storage backend
    pub fn resolve_cache_path(&self) -> PathBuf {
        if let Some(path) = &self.cache_path {
            return PathBuf::from(shellexpand::tilde(path).as_ref());
        }
        let file = match self.storage {
            StorageKind::Json => "cache.json",
            StorageKind::Sqlite | StorageKind::Memory => "cache.db",
        };
        data_dir().join(file)
    }

    /// Load from a file; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("[config] No config at {:?}, using defaults", path);
            return Self::default().validate();
        }

        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;

        log::info!(
            "[config] Loaded {} providers from {:?}",
            config.providers.len(),
            path
        );
        config.validate()
    }

    /// Load from `QUOTAMETER_CONFIG` or the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Config file path (`QUOTAMETER_CONFIG` wins over the platform default)
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.is_empty() {
            return PathBuf::from(shellexpand::tilde(&path).as_ref());
        }
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("config.json")
}

/// Local data directory for caches
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

// ============================================================================
// Settings Store
// ============================================================================

/// Source of per-provider settings, read on every classification call
pub trait SettingsStore: Send + Sync {
    fn provider_settings(&self, provider: &ProviderId) -> Option<ProviderSettings>;

    fn thresholds(&self, provider: &ProviderId) -> ThresholdConfig {
        self.provider_settings(provider)
            .map(|s| s.thresholds)
            .unwrap_or_default()
    }
}

/// Settings held in memory and replaceable at runtime
#[derive(Debug, Default)]
pub struct SharedSettings {
    inner: RwLock<EngineConfig>,
}

impl SharedSettings {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            inner: RwLock::new(config),
        }
    }

    /// Replace the whole configuration
    pub fn update(&self, config: EngineConfig) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = config;
    }

    /// Replace the thresholds of one provider
    pub fn set_thresholds(&self, provider: &ProviderId, thresholds: ThresholdConfig) -> Result<()> {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let settings = guard
            .providers
            .iter_mut()
            .find(|p| &p.id == provider)
            .ok_or_else(|| Error::not_found(format!("provider {}", provider)))?;
        settings.thresholds = thresholds;
        Ok(())
    }

    pub fn current(&self) -> EngineConfig {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl SettingsStore for SharedSettings {
    fn provider_settings(&self, provider: &ProviderId) -> Option<ProviderSettings> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .provider(provider)
            .cloned()
    }
}
