//! Quota tracking module
//!
//! Polls usage oracles for rolling-window AI subscription quotas, keeps the
//! last known-good reading per provider and turns it into something a UI can
//! render without ever flashing a phantom zero.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ PollScheduler (one timer per enabled provider)          │
//! │   - enable() / disable() / refresh_now() / shutdown()   │
//! └─────────────────────────────────────────────────────────┘
//!          │ poll_generation(id, gen)
//!          ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │ QuotaEngine                                             │
//! │   query_usage ─► transition ─► SnapshotCache            │
//! │                      │              │                   │
//! │                      ▼              ▼                   │
//! │              DisplaySnapshot   trait CacheStorage       │
//! │              AlertTracker        (sqlite / json / mem)  │
//! │              WindowHistory                              │
//! └─────────────────────────────────────────────────────────┘
//!          ▲
//!          │ fetch_usage()
//! ┌─────────────────────────────────────────────────────────┐
//! │ trait UsageSource + trait CredentialSignal              │
//! └─────────────────────────────────────────────────────────┘
//!          │
//!     ┌────┴─────┐
//!     ▼          ▼
//! ┌──────┐  ┌─────────┐
//! │Claude│  │JSON file│
//! │OAuth │  │         │
//! └──────┘  └─────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use quotameter_core::config::{EngineConfig, SharedSettings};
//! use quotameter_core::quota::{create_engine, PollScheduler, SchedulerOptions};
//!
//! let config = EngineConfig::load()?;
//! let settings = Arc::new(SharedSettings::new(config.clone()));
//! let engine = Arc::new(create_engine(&config, settings).await?);
//!
//! let scheduler = PollScheduler::new(engine.clone(), SchedulerOptions::from(&config));
//! scheduler.start(&ids).await;
//!
//! let mut events = engine.subscribe();
//! while let Ok(event) = events.recv().await {
//!     // render
//! }
//! ```

pub mod types;
pub mod provider;
pub mod claude;
pub mod json_file;
pub mod window;
pub mod threshold;
pub mod cache;
pub mod storage;
pub mod store;
pub mod state;
pub mod display;
pub mod alert;
pub mod history;
pub mod engine;
pub mod timer;
pub mod factory;

pub use types::{
    clamp_percent, remaining_from_used, FailureKind, ProviderId, Snapshot, UsageQueryResult,
    UsageReading, WindowReading,
};
pub use provider::{
    query_usage, CredentialRouter, CredentialSignal, QuotaError, StaticCredentials, UsageSource,
};
pub use claude::{ClaudeUsageSource, CLAUDE_PROVIDER_ID};
pub use json_file::JsonFileSource;
pub use window::{format_countdown, format_duration, WindowProgress, NOT_STARTED};
pub use threshold::{
    classify_elapsed, classify_remaining, classify_usage, SeverityZone, ThresholdConfig,
    TimeBand, TimeZones, UsageZones,
};
pub use cache::{CacheEntry, PutOutcome, SnapshotCache};
pub use storage::{CacheStorage, JsonFileStorage, MemoryStorage};
pub use store::SqliteCacheStorage;
pub use state::{transition, CacheAction, DisplayState, Transition};
pub use display::{DisplaySnapshot, SecondaryView};
pub use alert::{AlertTracker, ThresholdCrossing};
pub use history::{CompletedWindow, WindowHistory};
pub use engine::{EngineEvent, EngineOptions, QuotaEngine, QuotaEngineBuilder};
pub use timer::{PollScheduler, SchedulerOptions};
pub use factory::{create_engine, create_storage, create_usage_source, SourceBinding};
