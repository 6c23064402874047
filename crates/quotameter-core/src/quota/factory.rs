//! Wiring from [`EngineConfig`] to a running engine

use std::path::PathBuf;
use std::sync::Arc;

use super::claude::ClaudeUsageSource;
use super::engine::{EngineOptions, QuotaEngine};
use super::json_file::JsonFileSource;
use super::provider::{CredentialRouter, CredentialSignal, UsageSource};
use super::storage::{CacheStorage, JsonFileStorage, MemoryStorage};
use super::store::SqliteCacheStorage;
use crate::config::{EngineConfig, ProviderSettings, SettingsStore, SourceConfig, StorageKind};
use crate::db::Database;
use crate::error::Result;

/// A usage source and the credential signal that guards it
pub struct SourceBinding {
    pub source: Arc<dyn UsageSource>,
    pub credentials: Arc<dyn CredentialSignal>,
}

/// Build the source for one provider
pub fn create_usage_source(settings: &ProviderSettings) -> SourceBinding {
    match &settings.source {
        SourceConfig::ClaudeOauth {
            credentials_path,
            token_env,
        } => {
            let base = match credentials_path {
                Some(path) => ClaudeUsageSource::with_credentials_path(PathBuf::from(
                    shellexpand::tilde(path).as_ref(),
                )),
                None => ClaudeUsageSource::new(),
            };
            let manual_token = token_env.as_ref().and_then(|name| std::env::var(name).ok());
            let source = Arc::new(
                base.with_provider_id(settings.id.clone())
                    .with_manual_token(manual_token),
            );
            SourceBinding {
                source: source.clone(),
                credentials: source,
            }
        }
        SourceConfig::JsonFile { path } => {
            let source = Arc::new(JsonFileSource::new(settings.id.clone(), path));
            SourceBinding {
                source: source.clone(),
                credentials: source,
            }
        }
    }
}

/// Open the configured cache backend
pub async fn create_storage(config: &EngineConfig) -> Result<Arc<dyn CacheStorage>> {
    let storage: Arc<dyn CacheStorage> = match config.storage {
        StorageKind::Sqlite => match Database::open_or_recover(config.resolve_cache_path()).await {
            Ok(db) => Arc::new(SqliteCacheStorage::from_database(&db)),
            Err(e) => {
                log::error!(
                    "[quota:store] Cannot open cache database, keeping cache in memory: {}",
                    e
                );
                Arc::new(MemoryStorage::new())
            }
        },
        StorageKind::Json => Arc::new(JsonFileStorage::new(config.resolve_cache_path())),
        StorageKind::Memory => Arc::new(MemoryStorage::new()),
    };
    Ok(storage)
}

/// Build an engine with a source for every configured provider
///
/// Disabled providers still get a source so their cached state can be
/// rendered; they are simply never activated.
pub async fn create_engine(
    config: &EngineConfig,
    settings: Arc<dyn SettingsStore>,
) -> Result<QuotaEngine> {
    let storage = create_storage(config).await?;

    let mut router = CredentialRouter::new();
    let mut sources = Vec::with_capacity(config.providers.len());
    for provider in &config.providers {
        let binding = create_usage_source(provider);
        router.insert(provider.id.clone(), binding.credentials);
        sources.push(binding.source);
    }

    Ok(QuotaEngine::builder(settings, storage)
        .credentials(Arc::new(router))
        .sources(sources)
        .options(EngineOptions::from(config))
        .build()
        .await)
}
