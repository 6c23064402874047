//! Usage state machine
//!
//! Pure classification of `(credential signal, cache entry, latest poll
//! result, now)` into exactly one [`DisplayState`], plus the cache action the
//! caller must perform. Nothing here touches storage, timers or the clock.
//!
//! Precedence:
//!
//! 1. no token                              -> `NoCredentials`
//! 2. authoritative result                  -> `Live` (written to the cache)
//! 3. cached entry                          -> `StaleFallback` (flag set)
//! 4. nothing                               -> `AwaitingFirstReading`
//!
//! With no new result this cycle, a cached entry that is still fresh renders
//! as `Live`. `Live` and `StaleFallback` are then downgraded to
//! `SessionNotStarted` / `SessionExpired` when the window is not running.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::cache::CacheEntry;
use super::types::{Snapshot, UsageQueryResult};

/// What the UI should show for a provider right now
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DisplayState {
    /// No token (or provider disabled)
    NoCredentials,
    /// Nothing cached and no authoritative reading yet
    AwaitingFirstReading,
    /// Current reading
    Live(Snapshot),
    /// Last known-good reading, shown because the latest attempt failed or aged out
    StaleFallback { snapshot: Snapshot, age_seconds: i64 },
    /// Zero usage with no running window, or a passed reset with zero usage
    SessionNotStarted,
    /// Reset time has passed while usage was non-zero; pending the next poll
    SessionExpired,
}

impl DisplayState {
    /// Short machine-friendly label
    pub fn label(&self) -> &'static str {
        match self {
            DisplayState::NoCredentials => "no_credentials",
            DisplayState::AwaitingFirstReading => "awaiting_first_reading",
            DisplayState::Live(_) => "live",
            DisplayState::StaleFallback { .. } => "stale",
            DisplayState::SessionNotStarted => "session_not_started",
            DisplayState::SessionExpired => "session_expired",
        }
    }

    /// Snapshot backing this state, if it shows one
    pub fn snapshot(&self) -> Option<&Snapshot> {
        match self {
            DisplayState::Live(s) => Some(s),
            DisplayState::StaleFallback { snapshot, .. } => Some(snapshot),
            _ => None,
        }
    }
}

impl std::fmt::Display for DisplayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Cache mutation required by a transition
#[derive(Debug, Clone, PartialEq)]
pub enum CacheAction {
    Put(Snapshot),
    MarkStale,
    Keep,
}

/// Output of one classification step
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: DisplayState,
    pub cache_action: CacheAction,
    /// Snapshot the state was derived from, before any session downgrade
    pub reading: Option<Snapshot>,
    /// Age of the cached reading when it is shown as a fallback; survives
    /// session downgrades
    pub stale_age: Option<i64>,
}

impl Transition {
    fn new(state: DisplayState, cache_action: CacheAction) -> Self {
        let reading = state.snapshot().cloned();
        let stale_age = match &state {
            DisplayState::StaleFallback { age_seconds, .. } => Some(*age_seconds),
            _ => None,
        };
        Self {
            state,
            cache_action,
            reading,
            stale_age,
        }
    }
}

/// Classify a provider's state
///
/// `latest` is the result of a poll that completed this cycle, or `None`
/// when rendering between polls.
pub fn transition(
    has_token: bool,
    entry: Option<&CacheEntry>,
    latest: Option<&UsageQueryResult>,
    now: DateTime<Utc>,
) -> Transition {
    if !has_token {
        return Transition::new(DisplayState::NoCredentials, CacheAction::Keep);
    }

    if let Some(snapshot) = latest.and_then(UsageQueryResult::to_snapshot) {
        let t = Transition::new(
            DisplayState::Live(snapshot.clone()),
            CacheAction::Put(snapshot),
        );
        return downgrade(t, now);
    }

    let t = match entry {
        Some(entry) if latest.is_none() && !entry.is_stale => {
            Transition::new(DisplayState::Live(entry.last_good.clone()), CacheAction::Keep)
        }
        Some(entry) => {
            let action = if entry.is_stale {
                CacheAction::Keep
            } else {
                CacheAction::MarkStale
            };
            Transition::new(
                DisplayState::StaleFallback {
                    snapshot: entry.last_good.clone(),
                    age_seconds: entry.last_good.age_seconds(now),
                },
                action,
            )
        }
        None => Transition::new(DisplayState::AwaitingFirstReading, CacheAction::Keep),
    };

    downgrade(t, now)
}

/// Replace a snapshot-bearing state when its window is not actually running
fn downgrade(mut t: Transition, now: DateTime<Utc>) -> Transition {
    if let Some(session) = t.state.snapshot().and_then(|s| session_state(s, now)) {
        t.state = session;
    }
    t
}

fn session_state(snapshot: &Snapshot, now: DateTime<Utc>) -> Option<DisplayState> {
    match snapshot.resets_at {
        Some(reset) if reset <= now => {
            if snapshot.used_percent > 0.0 {
                Some(DisplayState::SessionExpired)
            } else {
                Some(DisplayState::SessionNotStarted)
            }
        }
        None if snapshot.used_percent == 0.0 => Some(DisplayState::SessionNotStarted),
        _ => None,
    }
}
