//! Usage state engine
//!
//! Owns the snapshot cache and the registry of active providers, runs polls
//! through the state machine and publishes [`EngineEvent`]s.
//!
//! Every provider that is enabled gets a fresh *generation* number. A poll
//! captures the generation when it starts and its result is applied only if
//! that generation is still current, so completions that arrive after a
//! provider was disabled (or disabled and re-enabled) never touch the cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, RwLock};

use super::alert::{AlertTracker, ThresholdCrossing};
use super::cache::{CacheEntry, PutOutcome, SnapshotCache, DEFAULT_STALE_AFTER_SECS};
use super::display::DisplaySnapshot;
use super::history::{CompletedWindow, WindowHistory};
use super::provider::{query_usage, CredentialSignal, UsageSource};
use super::state::{transition, CacheAction, Transition};
use super::storage::CacheStorage;
use super::threshold::{classify_usage, ThresholdConfig};
use super::types::{FailureKind, ProviderId, UsageQueryResult};
use crate::config::{
    EngineConfig, SettingsStore, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_WINDOW_HISTORY_LEN,
};

/// Capacity of the event channel; slow subscribers see `Lagged`
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Fallback window length for providers missing from settings
const DEFAULT_WINDOW_HOURS: i64 = 5;

// ============================================================================
// Events
// ============================================================================

/// Notifications for UI layers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A provider's display snapshot was recomputed after a poll or an
    /// enable/disable
    StateChanged(DisplaySnapshot),
    /// A provider escalated into a more severe zone
    ThresholdCrossed(ThresholdCrossing),
    /// A window reset and its final reading was recorded
    WindowCompleted {
        provider: ProviderId,
        window: CompletedWindow,
    },
}

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub stale_after: chrono::Duration,
    pub request_timeout: Duration,
    pub window_history_len: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            stale_after: chrono::Duration::seconds(DEFAULT_STALE_AFTER_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            window_history_len: DEFAULT_WINDOW_HISTORY_LEN,
        }
    }
}

impl From<&EngineConfig> for EngineOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            stale_after: config.stale_after(),
            request_timeout: config.request_timeout(),
            window_history_len: config.window_history_len,
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

pub struct QuotaEngineBuilder {
    settings: Arc<dyn SettingsStore>,
    storage: Arc<dyn CacheStorage>,
    credentials: Option<Arc<dyn CredentialSignal>>,
    sources: Vec<Arc<dyn UsageSource>>,
    options: EngineOptions,
}

impl QuotaEngineBuilder {
    pub fn credentials(mut self, credentials: Arc<dyn CredentialSignal>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn source(mut self, source: Arc<dyn UsageSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn sources<I>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn UsageSource>>,
    {
        self.sources.extend(sources);
        self
    }

    pub fn options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Load the persisted cache and history, then build the engine
    ///
    /// Without an explicit credential signal every provider is treated as
    /// having no token.
    pub async fn build(self) -> QuotaEngine {
        let now = Utc::now();
        let cache = SnapshotCache::load(self.storage.clone(), self.options.stale_after, now).await;

        let history = match self.storage.load_windows().await {
            Ok(rows) => WindowHistory::from_rows(self.options.window_history_len, rows),
            Err(e) => {
                log::warn!("[quota:engine] Ignoring unreadable window history: {}", e);
                WindowHistory::new(self.options.window_history_len)
            }
        };

        let credentials = self
            .credentials
            .unwrap_or_else(|| Arc::new(super::provider::StaticCredentials::new()));

        let sources = self
            .sources
            .into_iter()
            .map(|s| (s.provider_id().clone(), s))
            .collect::<HashMap<_, _>>();

        log::info!(
            "[quota:engine] Engine ready with {} sources, {} cached snapshots",
            sources.len(),
            cache.len()
        );

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        QuotaEngine {
            sources,
            credentials,
            settings: self.settings,
            storage: self.storage,
            options: self.options,
            cache: Mutex::new(cache),
            generations: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            alerts: Mutex::new(AlertTracker::new()),
            history: Mutex::new(history),
            events,
        }
    }
}

// ============================================================================
// QuotaEngine
// ============================================================================

pub struct QuotaEngine {
    sources: HashMap<ProviderId, Arc<dyn UsageSource>>,
    credentials: Arc<dyn CredentialSignal>,
    settings: Arc<dyn SettingsStore>,
    storage: Arc<dyn CacheStorage>,
    options: EngineOptions,
    /// Held across every compare-and-write
    cache: Mutex<SnapshotCache>,
    /// Active providers and their current generation
    generations: RwLock<HashMap<ProviderId, u64>>,
    next_generation: AtomicU64,
    alerts: Mutex<AlertTracker>,
    history: Mutex<WindowHistory>,
    events: broadcast::Sender<EngineEvent>,
}

impl QuotaEngine {
    pub fn builder(
        settings: Arc<dyn SettingsStore>,
        storage: Arc<dyn CacheStorage>,
    ) -> QuotaEngineBuilder {
        QuotaEngineBuilder {
            settings,
            storage,
            credentials: None,
            sources: Vec::new(),
            options: EngineOptions::default(),
        }
    }

    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Providers with a registered source, sorted by id
    pub fn provider_ids(&self) -> Vec<ProviderId> {
        let mut ids: Vec<ProviderId> = self.sources.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------------
    // Activation
    // ------------------------------------------------------------------------

    /// Mark a provider enabled, starting a new generation
    pub async fn activate(&self, provider: &ProviderId) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        self.generations
            .write()
            .await
            .insert(provider.clone(), generation);
        log::info!(
            "[quota:engine] Activated {} (generation {})",
            provider,
            generation
        );
        generation
    }

    /// Mark a provider disabled; in-flight results for it will be discarded
    pub async fn deactivate(&self, provider: &ProviderId) -> bool {
        let removed = self.generations.write().await.remove(provider).is_some();
        if removed {
            self.alerts.lock().await.reset(provider);
            log::info!("[quota:engine] Deactivated {}", provider);
            let snapshot = self.display(provider, Utc::now()).await;
            let _ = self.events.send(EngineEvent::StateChanged(snapshot));
        }
        removed
    }

    pub async fn generation(&self, provider: &ProviderId) -> Option<u64> {
        self.generations.read().await.get(provider).copied()
    }

    /// Whether `generation` is still the provider's current one
    pub async fn is_current(&self, provider: &ProviderId, generation: u64) -> bool {
        self.generation(provider).await == Some(generation)
    }

    pub async fn is_active(&self, provider: &ProviderId) -> bool {
        self.generations.read().await.contains_key(provider)
    }

    /// Active providers, sorted by id
    pub async fn active_providers(&self) -> Vec<ProviderId> {
        let mut ids: Vec<ProviderId> = self.generations.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    // ------------------------------------------------------------------------
    // Polling
    // ------------------------------------------------------------------------

    /// Poll a provider under its current generation
    ///
    /// Returns `None` if the provider is not active or its result was
    /// discarded.
    pub async fn poll(&self, provider: &ProviderId) -> Option<DisplaySnapshot> {
        let generation = self.generation(provider).await?;
        self.poll_generation(provider, generation).await
    }

    /// Poll a provider on behalf of a specific generation
    pub async fn poll_generation(
        &self,
        provider: &ProviderId,
        generation: u64,
    ) -> Option<DisplaySnapshot> {
        if !self.is_current(provider, generation).await {
            return None;
        }

        let observed_at = Utc::now();
        let result = match self.sources.get(provider) {
            Some(_) if !self.credentials.has_valid_token(provider) => {
                log::debug!("[quota:engine] {} has no valid token, skipping request", provider);
                UsageQueryResult::failure(FailureKind::CredentialMissing, "no valid token", observed_at)
            }
            Some(source) => {
                query_usage(source.as_ref(), self.options.request_timeout, observed_at).await
            }
            None => {
                log::warn!("[quota:engine] No usage source registered for {}", provider);
                UsageQueryResult::failure(
                    FailureKind::CredentialMissing,
                    "no usage source registered",
                    observed_at,
                )
            }
        };

        self.apply_result(provider, generation, result).await
    }

    /// Feed a poll result through the state machine and update the cache
    ///
    /// Results from a stale generation are dropped without side effects.
    pub async fn apply_result(
        &self,
        provider: &ProviderId,
        generation: u64,
        result: UsageQueryResult,
    ) -> Option<DisplaySnapshot> {
        // Credential checks may hit the filesystem; do them before locking
        let has_token = self.credentials.has_valid_token(provider);
        let mut cache = self.cache.lock().await;

        if !self.is_current(provider, generation).await {
            log::debug!(
                "[quota:engine] Discarding result for {} from generation {}",
                provider,
                generation
            );
            return None;
        }

        if result.failure == Some(FailureKind::AuthExpired) {
            log::warn!(
                "[quota:engine] {} credentials expired or rejected: {}",
                provider,
                result.error_reason.as_deref().unwrap_or("unknown")
            );
        }

        let now = Utc::now();
        cache.refresh_staleness(now);

        let previous = cache.get(provider).cloned();
        let mut t = transition(has_token, previous.as_ref(), Some(&result), now);

        let mut applied = None;
        match t.cache_action.clone() {
            CacheAction::Put(snapshot) => match cache.put(provider, snapshot.clone()).await {
                PutOutcome::Applied => applied = Some(snapshot),
                PutOutcome::Superseded => {
                    t = transition(has_token, cache.get(provider), None, now);
                }
            },
            CacheAction::MarkStale => {
                cache.mark_stale(provider);
            }
            CacheAction::Keep => {}
        }
        drop(cache);

        let thresholds = self.thresholds(provider);

        if let Some(snapshot) = applied {
            if let Some(window) = previous
                .as_ref()
                .and_then(|entry| CompletedWindow::closed_by(&entry.last_good, &snapshot))
            {
                self.record_window(provider, window).await;
            }

            let zone = classify_usage(snapshot.used_percent, &thresholds.usage_zones);
            let crossing = self.alerts.lock().await.observe(
                provider,
                zone,
                snapshot.used_percent,
                snapshot.resets_at,
            );
            if let Some(crossing) = crossing {
                let _ = self.events.send(EngineEvent::ThresholdCrossed(crossing));
            }
        }

        let display = self.build_display(provider, &t, &thresholds, now);
        log::debug!(
            "[quota:engine] {} -> {}",
            provider,
            display.display_state
        );
        let _ = self.events.send(EngineEvent::StateChanged(display.clone()));
        Some(display)
    }

    async fn record_window(&self, provider: &ProviderId, window: CompletedWindow) {
        let recorded = self.history.lock().await.push(provider, window.clone());
        if !recorded {
            return;
        }

        log::info!(
            "[quota:engine] {} window ending {} closed at {:.1}% used",
            provider,
            window.resets_at,
            window.final_used_percent
        );
        if let Err(e) = self.storage.save_window(provider, &window).await {
            log::error!("[quota:engine] Failed to persist window for {}: {}", provider, e);
        }
        let _ = self.events.send(EngineEvent::WindowCompleted {
            provider: provider.clone(),
            window,
        });
    }

    // ------------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------------

    /// Current view of a provider without polling
    pub async fn display(&self, provider: &ProviderId, now: DateTime<Utc>) -> DisplaySnapshot {
        let has_token = self.is_active(provider).await && self.credentials.has_valid_token(provider);

        let t = {
            let mut cache = self.cache.lock().await;
            cache.refresh_staleness(now);
            transition(has_token, cache.get(provider), None, now)
        };

        let thresholds = self.thresholds(provider);
        self.build_display(provider, &t, &thresholds, now)
    }

    /// Views of every registered provider, sorted by id
    pub async fn display_all(&self, now: DateTime<Utc>) -> Vec<DisplaySnapshot> {
        let mut views = Vec::with_capacity(self.sources.len());
        for provider in self.provider_ids() {
            views.push(self.display(&provider, now).await);
        }
        views
    }

    fn build_display(
        &self,
        provider: &ProviderId,
        t: &Transition,
        thresholds: &ThresholdConfig,
        now: DateTime<Utc>,
    ) -> DisplaySnapshot {
        let settings = self.settings.provider_settings(provider);
        let window = settings
            .as_ref()
            .map(|s| s.window())
            .unwrap_or_else(|| chrono::Duration::hours(DEFAULT_WINDOW_HOURS));
        let secondary_window = settings.as_ref().and_then(|s| s.secondary_window());

        DisplaySnapshot::build(provider, t, thresholds, window, secondary_window, now)
    }

    /// Thresholds are read from settings on every call, never cached
    fn thresholds(&self, provider: &ProviderId) -> ThresholdConfig {
        self.settings.thresholds(provider)
    }

    // ------------------------------------------------------------------------
    // Cache & history access
    // ------------------------------------------------------------------------

    /// Read-only copy of the cache contents, sorted by provider
    pub async fn cache_entries(&self) -> Vec<(ProviderId, CacheEntry)> {
        let cache = self.cache.lock().await;
        let mut entries: Vec<(ProviderId, CacheEntry)> = cache
            .entries()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Completed windows for a provider, newest first
    pub async fn history(&self, provider: &ProviderId) -> Vec<CompletedWindow> {
        self.history.lock().await.get(provider)
    }

    /// Completed windows for every provider with history, sorted by id
    pub async fn history_all(&self) -> Vec<(ProviderId, Vec<CompletedWindow>)> {
        let history = self.history.lock().await;
        let mut providers: Vec<ProviderId> = history.providers().cloned().collect();
        providers.sort();
        providers
            .into_iter()
            .map(|p| {
                let windows = history.get(&p);
                (p, windows)
            })
            .collect()
    }

    /// Operator action: drop every cached snapshot and recorded window
    pub async fn reset_cache(&self) -> crate::Result<()> {
        self.cache.lock().await.reset().await?;
        self.history.lock().await.clear();
        self.alerts.lock().await.clear();
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
