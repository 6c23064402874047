//! End-to-end behaviour of the engine and scheduler against scripted sources

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;

use quotameter_core::config::{EngineConfig, ProviderSettings, SharedSettings, SourceConfig};
use quotameter_core::quota::{
    CacheStorage, DisplayState, EngineOptions, MemoryStorage, PollScheduler, ProviderId,
    QuotaEngine, QuotaError, SchedulerOptions, Snapshot, StaticCredentials, UsageReading,
    UsageSource,
};

// ============================================================================
// Fixtures
// ============================================================================

/// Answers every request with the same reading and counts calls
struct CountingSource {
    id: ProviderId,
    used_percent: Option<f64>,
    fail: bool,
    calls: AtomicUsize,
}

impl CountingSource {
    fn ok(id: &str, used: f64) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            used_percent: Some(used),
            fail: false,
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            used_percent: None,
            fail: true,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UsageSource for CountingSource {
    fn provider_id(&self) -> &ProviderId {
        &self.id
    }

    async fn fetch_usage(&self) -> Result<UsageReading, QuotaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(QuotaError::NetworkError("connection refused".into()));
        }
        Ok(UsageReading {
            used_percent: self.used_percent,
            resets_at: Some(Utc::now() + chrono::Duration::hours(2)),
            secondary: None,
        })
    }
}

/// Holds every request until released
struct GatedSource {
    id: ProviderId,
    gate: Notify,
}

#[async_trait]
impl UsageSource for GatedSource {
    fn provider_id(&self) -> &ProviderId {
        &self.id
    }

    async fn fetch_usage(&self) -> Result<UsageReading, QuotaError> {
        self.gate.notified().await;
        Ok(UsageReading {
            used_percent: Some(55.0),
            resets_at: Some(Utc::now() + chrono::Duration::hours(1)),
            secondary: None,
        })
    }
}

fn settings_for(ids: &[&str]) -> Arc<SharedSettings> {
    let mut config = EngineConfig::default();
    config.providers = ids
        .iter()
        .map(|id| {
            ProviderSettings::new(
                *id,
                SourceConfig::JsonFile {
                    path: format!("{}.json", id),
                },
            )
            .with_poll_interval(30)
        })
        .collect();
    Arc::new(SharedSettings::new(config))
}

fn no_jitter() -> SchedulerOptions {
    SchedulerOptions {
        initial_delay: Duration::from_secs(3),
        stagger: Duration::from_secs(2),
        jitter: Duration::ZERO,
    }
}

fn id(s: &str) -> ProviderId {
    ProviderId::new(s)
}

// ============================================================================
// State scenarios
// ============================================================================

#[tokio::test]
async fn first_failed_poll_awaits_first_reading() {
    let storage = Arc::new(MemoryStorage::new());
    let engine = QuotaEngine::builder(settings_for(&["claude"]), storage.clone())
        .credentials(Arc::new(StaticCredentials::with_tokens(["claude"])))
        .source(CountingSource::failing("claude"))
        .build()
        .await;
    engine.activate(&id("claude")).await;

    let view = engine.poll(&id("claude")).await.unwrap();

    assert_eq!(view.display_state, DisplayState::AwaitingFirstReading);
    assert!(!view.is_stale);
    assert_eq!(view.used_percent, None);
    assert_eq!(storage.len().await, 0);
}

#[tokio::test]
async fn disabled_mid_request_discards_result() {
    let storage = Arc::new(MemoryStorage::new());
    let source = Arc::new(GatedSource {
        id: id("claude"),
        gate: Notify::new(),
    });
    let engine = Arc::new(
        QuotaEngine::builder(settings_for(&["claude"]), storage.clone())
            .credentials(Arc::new(StaticCredentials::with_tokens(["claude"])))
            .source(source.clone())
            .build()
            .await,
    );
    let scheduler = PollScheduler::new(engine.clone(), no_jitter());
    engine.activate(&id("claude")).await;

    let in_flight = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.poll(&id("claude")).await })
    };
    tokio::task::yield_now().await;

    scheduler.disable(&id("claude")).await;
    source.gate.notify_one();

    assert!(in_flight.await.unwrap().is_none());
    assert_eq!(storage.len().await, 0);
    let view = engine.display(&id("claude"), Utc::now()).await;
    assert_eq!(view.display_state, DisplayState::NoCredentials);
}

#[tokio::test]
async fn old_cache_is_stale_before_first_poll() {
    let now = Utc::now();
    let storage = Arc::new(MemoryStorage::with_rows([(
        id("claude"),
        Snapshot::new(
            40.0,
            Some(now + chrono::Duration::hours(1)),
            now - chrono::Duration::minutes(10),
        ),
    )]));
    let engine = QuotaEngine::builder(settings_for(&["claude"]), storage)
        .credentials(Arc::new(StaticCredentials::with_tokens(["claude"])))
        .source(CountingSource::ok("claude", 10.0))
        .options(EngineOptions {
            stale_after: chrono::Duration::minutes(5),
            ..Default::default()
        })
        .build()
        .await;
    engine.activate(&id("claude")).await;

    let entries = engine.cache_entries().await;
    assert!(entries[0].1.is_stale);

    let view = engine.display(&id("claude"), Utc::now()).await;
    assert!(view.is_stale);
    assert!(view.stale_age_seconds.unwrap() >= 600);
    assert_eq!(view.remaining_percent, Some(60.0));
}

#[tokio::test]
async fn failure_after_success_never_shows_zero() {
    let storage = Arc::new(MemoryStorage::with_rows([(
        id("claude"),
        Snapshot::new(
            73.0,
            Some(Utc::now() + chrono::Duration::hours(1)),
            Utc::now(),
        ),
    )]));
    let engine = QuotaEngine::builder(settings_for(&["claude"]), storage.clone())
        .credentials(Arc::new(StaticCredentials::with_tokens(["claude"])))
        .source(CountingSource::failing("claude"))
        .build()
        .await;
    engine.activate(&id("claude")).await;

    for _ in 0..3 {
        let view = engine.poll(&id("claude")).await.unwrap();
        assert!(view.is_stale);
        assert_eq!(view.used_percent, Some(73.0));
        assert_eq!(view.remaining_percent, Some(27.0));
    }
    assert_eq!(storage.get(&id("claude")).await.unwrap().used_percent, 73.0);
}

#[tokio::test]
async fn answer_without_utilization_keeps_previous_value() {
    let storage = Arc::new(MemoryStorage::with_rows([(
        id("claude"),
        Snapshot::new(
            12.0,
            Some(Utc::now() + chrono::Duration::hours(1)),
            Utc::now(),
        ),
    )]));
    let source = Arc::new(CountingSource {
        id: id("claude"),
        used_percent: None,
        fail: false,
        calls: AtomicUsize::new(0),
    });
    let engine = QuotaEngine::builder(settings_for(&["claude"]), storage.clone())
        .credentials(Arc::new(StaticCredentials::with_tokens(["claude"])))
        .source(source)
        .build()
        .await;
    engine.activate(&id("claude")).await;

    let view = engine.poll(&id("claude")).await.unwrap();
    assert_eq!(view.used_percent, Some(12.0));
    assert!(view.is_stale);
    assert_eq!(storage.load_all().await.unwrap()[0].1.used_percent, 12.0);
}

// ============================================================================
// Scheduler
// ============================================================================

#[tokio::test(start_paused = true)]
async fn scheduler_staggers_first_polls() {
    let claude = CountingSource::ok("claude", 10.0);
    let codex = CountingSource::ok("codex", 20.0);
    let engine = Arc::new(
        QuotaEngine::builder(settings_for(&["claude", "codex"]), Arc::new(MemoryStorage::new()))
            .credentials(Arc::new(StaticCredentials::with_tokens(["claude", "codex"])))
            .source(claude.clone())
            .source(codex.clone())
            .build()
            .await,
    );
    let scheduler = PollScheduler::new(engine, no_jitter());
    scheduler.start(&[id("claude"), id("codex")]).await;

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!((claude.calls(), codex.calls()), (0, 0));

    // 4s: first provider polled at 3s
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!((claude.calls(), codex.calls()), (1, 0));

    // 6s: second provider polled at 5s
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!((claude.calls(), codex.calls()), (1, 1));

    // 34s: first provider's second tick at 33s
    tokio::time::sleep(Duration::from_secs(28)).await;
    assert_eq!((claude.calls(), codex.calls()), (2, 1));

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn disabled_provider_stops_polling() {
    let source = CountingSource::ok("claude", 10.0);
    let engine = Arc::new(
        QuotaEngine::builder(settings_for(&["claude"]), Arc::new(MemoryStorage::new()))
            .credentials(Arc::new(StaticCredentials::with_tokens(["claude"])))
            .source(source.clone())
            .build()
            .await,
    );
    let scheduler = PollScheduler::new(engine.clone(), no_jitter());
    scheduler.enable(&id("claude"), 0).await;

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(source.calls(), 1);

    assert!(scheduler.disable(&id("claude")).await);
    assert!(!scheduler.is_scheduled(&id("claude")).await);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(source.calls(), 1);
    assert!(scheduler.refresh_now(&id("claude")).await.is_none());

    let view = engine.display(&id("claude"), Utc::now()).await;
    assert_eq!(view.display_state, DisplayState::NoCredentials);
}

#[tokio::test(start_paused = true)]
async fn manual_refresh_leaves_timer_alone() {
    let source = CountingSource::ok("claude", 10.0);
    let engine = Arc::new(
        QuotaEngine::builder(settings_for(&["claude"]), Arc::new(MemoryStorage::new()))
            .credentials(Arc::new(StaticCredentials::with_tokens(["claude"])))
            .source(source.clone())
            .build()
            .await,
    );
    let scheduler = PollScheduler::new(engine, no_jitter());
    scheduler.enable(&id("claude"), 0).await;

    let view = scheduler.refresh_now(&id("claude")).await.unwrap();
    assert_eq!(view.used_percent, Some(10.0));
    assert_eq!(source.calls(), 1);

    // The timer still fires at 3s
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(source.calls(), 2);
    assert!(scheduler.is_scheduled(&id("claude")).await);

    scheduler.shutdown().await;
}

#[tokio::test]
async fn refresh_all_polls_every_active_provider() {
    let claude = CountingSource::ok("claude", 10.0);
    let codex = CountingSource::ok("codex", 20.0);
    let engine = Arc::new(
        QuotaEngine::builder(settings_for(&["claude", "codex"]), Arc::new(MemoryStorage::new()))
            .credentials(Arc::new(StaticCredentials::with_tokens(["claude", "codex"])))
            .source(claude.clone())
            .source(codex.clone())
            .build()
            .await,
    );
    engine.activate(&id("claude")).await;
    engine.activate(&id("codex")).await;

    let scheduler = PollScheduler::new(engine, no_jitter());
    let views = scheduler.refresh_all().await;

    assert_eq!(views.len(), 2);
    assert_eq!(views[0].provider, id("claude"));
    assert_eq!(views[1].used_percent, Some(20.0));
    assert_eq!((claude.calls(), codex.calls()), (1, 1));
}
