//! Poll scheduler
//!
//! One background task per enabled provider, keyed by [`ProviderId`].
//!
//! ```text
//! enable(id, index)
//!     │
//!     ▼
//! sleep(initial_delay + index * stagger + jitter)
//!     │
//!     ▼
//! ┌─► engine.poll_generation(id, gen) ──► sleep(poll_interval) ─┐
//! └─────────────────────────────────────────────────────────────┘
//!            (until disable / shutdown fires the oneshot)
//! ```
//!
//! Manual refreshes run the same poll as an awaited future and leave the
//! timer untouched.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{oneshot, Mutex};
use tokio::task::{JoinHandle, JoinSet};

use super::display::DisplaySnapshot;
use super::engine::QuotaEngine;
use super::types::ProviderId;
use crate::config::{EngineConfig, DEFAULT_POLL_INTERVAL_SECS, MIN_POLL_INTERVAL_SECS};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Delay before the first provider's first poll
    pub initial_delay: Duration,
    /// Added per provider index so startup requests do not burst
    pub stagger: Duration,
    /// Upper bound of the random extra delay
    pub jitter: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(3),
            stagger: Duration::from_secs(2),
            jitter: Duration::from_millis(750),
        }
    }
}

impl From<&EngineConfig> for SchedulerOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            initial_delay: Duration::from_secs(config.initial_delay_secs),
            stagger: Duration::from_secs(config.stagger_secs),
            jitter: Duration::from_millis(config.jitter_ms),
        }
    }
}

impl SchedulerOptions {
    /// First-poll delay for the provider at `index`
    pub fn first_delay(&self, index: usize) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        self.initial_delay + self.stagger * index as u32 + jitter
    }
}

// ============================================================================
// Scheduler
// ============================================================================

struct PollHandle {
    generation: u64,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl PollHandle {
    fn stop(self) {
        let _ = self.shutdown_tx.send(());
        self.task.abort();
    }
}

pub struct PollScheduler {
    engine: Arc<QuotaEngine>,
    options: SchedulerOptions,
    handles: Mutex<HashMap<ProviderId, PollHandle>>,
}

impl PollScheduler {
    pub fn new(engine: Arc<QuotaEngine>, options: SchedulerOptions) -> Self {
        Self {
            engine,
            options,
            handles: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<QuotaEngine> {
        &self.engine
    }

    /// Enable every listed provider, staggered by position
    pub async fn start(&self, providers: &[ProviderId]) {
        for (index, provider) in providers.iter().enumerate() {
            self.enable(provider, index).await;
        }
    }

    /// Enable a provider and start its timer
    ///
    /// Re-enabling an already scheduled provider replaces its timer and
    /// starts a new generation. Returns that generation.
    pub async fn enable(&self, provider: &ProviderId, index: usize) -> u64 {
        let mut handles = self.handles.lock().await;
        if let Some(previous) = handles.remove(provider) {
            previous.stop();
        }

        let generation = self.engine.activate(provider).await;
        let delay = self.options.first_delay(index);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(poll_loop(
            Arc::clone(&self.engine),
            provider.clone(),
            generation,
            delay,
            shutdown_rx,
        ));

        handles.insert(
            provider.clone(),
            PollHandle {
                generation,
                shutdown_tx,
                task,
            },
        );
        generation
    }

    /// Cancel a provider's timer and mark it disabled
    ///
    /// Requests already in flight complete but their results are discarded.
    pub async fn disable(&self, provider: &ProviderId) -> bool {
        let handle = self.handles.lock().await.remove(provider);
        let had_timer = handle.is_some();
        if let Some(handle) = handle {
            log::info!(
                "[quota:timer] Stopping timer for {} (generation {})",
                provider,
                handle.generation
            );
            handle.stop();
        }
        let was_active = self.engine.deactivate(provider).await;
        had_timer || was_active
    }

    /// Poll one provider now, outside its timer
    ///
    /// Returns `None` for providers that are not enabled, or when the
    /// provider was disabled before the result arrived.
    pub async fn refresh_now(&self, provider: &ProviderId) -> Option<DisplaySnapshot> {
        let generation = self.engine.generation(provider).await?;
        log::info!("[quota:timer] Manual refresh for {}", provider);
        self.engine.poll_generation(provider, generation).await
    }

    /// Poll every enabled provider concurrently
    pub async fn refresh_all(&self) -> Vec<DisplaySnapshot> {
        let mut tasks = JoinSet::new();
        for provider in self.engine.active_providers().await {
            let Some(generation) = self.engine.generation(&provider).await else {
                continue;
            };
            let engine = Arc::clone(&self.engine);
            tasks.spawn(async move { engine.poll_generation(&provider, generation).await });
        }

        let mut views = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(view)) => views.push(view),
                Ok(None) => {}
                Err(e) => log::error!("[quota:timer] Refresh task failed: {}", e),
            }
        }
        views.sort_by(|a, b| a.provider.cmp(&b.provider));
        views
    }

    pub async fn is_scheduled(&self, provider: &ProviderId) -> bool {
        self.handles.lock().await.contains_key(provider)
    }

    /// Providers with a running timer, sorted by id
    pub async fn scheduled(&self) -> Vec<ProviderId> {
        let mut ids: Vec<ProviderId> = self.handles.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stop every timer; engine state is left as is
    pub async fn shutdown(&self) {
        let handles: Vec<(ProviderId, PollHandle)> =
            self.handles.lock().await.drain().collect();
        for (provider, handle) in handles {
            log::debug!("[quota:timer] Shutting down timer for {}", provider);
            handle.stop();
        }
        log::info!("[quota:timer] All timers stopped");
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.handles.get_mut().drain() {
            handle.stop();
        }
    }
}

async fn poll_loop(
    engine: Arc<QuotaEngine>,
    provider: ProviderId,
    generation: u64,
    first_delay: Duration,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    log::info!(
        "[quota:timer] Polling loop started for {} (first poll in {:?})",
        provider,
        first_delay
    );

    let mut delay = first_delay;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = &mut shutdown_rx => {
                log::info!("[quota:timer] Received shutdown signal for {}", provider);
                break;
            }
        }

        if !engine.is_current(&provider, generation).await {
            log::info!("[quota:timer] {} no longer enabled, exiting loop", provider);
            break;
        }

        engine.poll_generation(&provider, generation).await;
        delay = poll_interval(&engine, &provider);
    }
}

/// Interval is re-read every cycle so settings changes apply on the next tick
fn poll_interval(engine: &QuotaEngine, provider: &ProviderId) -> Duration {
    let secs = engine
        .settings()
        .provider_settings(provider)
        .map(|s| s.poll_interval_secs)
        .unwrap_or(DEFAULT_POLL_INTERVAL_SECS)
        .max(MIN_POLL_INTERVAL_SECS);
    Duration::from_secs(secs)
}
