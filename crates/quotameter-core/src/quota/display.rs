//! Display snapshot
//!
//! Everything a UI needs to render one provider, derived from a
//! [`Transition`] and the provider's current thresholds. Cache internals are
//! never exposed.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::state::{DisplayState, Transition};
use super::threshold::{classify_elapsed, classify_usage, SeverityZone, ThresholdConfig, TimeBand};
use super::types::{remaining_from_used, ProviderId, WindowReading};
use super::window::{WindowProgress, NOT_STARTED};

/// View of the independent secondary window (e.g. 7-day)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecondaryView {
    pub used_percent: f64,
    pub remaining_percent: f64,
    pub elapsed_percent: Option<f64>,
    pub countdown_text: String,
    pub severity_zone: SeverityZone,
}

impl SecondaryView {
    fn build(
        reading: &WindowReading,
        thresholds: &ThresholdConfig,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let progress = WindowProgress::compute(reading.resets_at, window, now);
        Self {
            used_percent: reading.used_percent,
            remaining_percent: remaining_from_used(reading.used_percent),
            elapsed_percent: progress.elapsed_percent,
            countdown_text: progress.countdown,
            severity_zone: classify_usage(reading.used_percent, &thresholds.usage_zones),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplaySnapshot {
    pub provider: ProviderId,
    pub display_state: DisplayState,
    pub used_percent: Option<f64>,
    pub remaining_percent: Option<f64>,
    pub elapsed_percent: Option<f64>,
    pub countdown_text: String,
    pub severity_zone: Option<SeverityZone>,
    pub time_zone: Option<TimeBand>,
    pub is_stale: bool,
    pub stale_age_seconds: Option<i64>,
    pub secondary: Option<SecondaryView>,
}

impl DisplaySnapshot {
    /// Build the view for one provider
    ///
    /// `window` is the primary window length; `secondary_window` the length
    /// of the longer window, if tracked.
    pub fn build(
        provider: &ProviderId,
        transition: &Transition,
        thresholds: &ThresholdConfig,
        window: Duration,
        secondary_window: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Self {
        let state = &transition.state;

        // Percentages come from the displayed snapshot. A session that has not
        // started shows its confirmed zero; an expired one shows nothing until
        // the next poll.
        let used_percent = match state {
            DisplayState::Live(s) | DisplayState::StaleFallback { snapshot: s, .. } => {
                Some(s.used_percent)
            }
            DisplayState::SessionNotStarted => {
                transition.reading.as_ref().map(|r| r.used_percent)
            }
            _ => None,
        };

        let progress = state
            .snapshot()
            .map(|s| WindowProgress::compute(s.resets_at, window, now));

        let elapsed_percent = progress.as_ref().and_then(|p| p.elapsed_percent);
        let countdown_text = progress
            .map(|p| p.countdown)
            .unwrap_or_else(|| NOT_STARTED.to_string());

        let secondary = match (transition.reading.as_ref(), secondary_window) {
            (Some(reading), Some(len)) => reading
                .secondary
                .as_ref()
                .map(|w| SecondaryView::build(w, thresholds, len, now)),
            _ => None,
        };

        Self {
            provider: provider.clone(),
            display_state: state.clone(),
            used_percent,
            remaining_percent: used_percent.map(remaining_from_used),
            elapsed_percent,
            countdown_text,
            severity_zone: used_percent.map(|u| classify_usage(u, &thresholds.usage_zones)),
            time_zone: elapsed_percent.map(|e| classify_elapsed(e, &thresholds.time_zones)),
            is_stale: transition.stale_age.is_some(),
            stale_age_seconds: transition.stale_age,
            secondary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::state::transition;
    use crate::quota::threshold::UsageZones;
    use crate::quota::types::{FailureKind, Snapshot, UsageQueryResult, UsageReading};
    use crate::quota::cache::CacheEntry;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn claude() -> ProviderId {
        ProviderId::new("claude")
    }

    fn live(used: f64, resets_in: Duration) -> Transition {
        let result = UsageQueryResult::success(
            UsageReading {
                used_percent: Some(used),
                resets_at: Some(now() + resets_in),
                secondary: Some(WindowReading::new(30.0, Some(now() + Duration::days(2)))),
            },
            now(),
        );
        transition(true, None, Some(&result), now())
    }

    #[test]
    fn test_scenario_a_default_zones() {
        let t = live(58.0, Duration::minutes(90));
        let view = DisplaySnapshot::build(
            &claude(),
            &t,
            &ThresholdConfig::default(),
            Duration::hours(5),
            None,
            now(),
        );

        assert!((view.elapsed_percent.unwrap() - 70.0).abs() < 1e-9);
        assert_eq!(view.remaining_percent, Some(42.0));
        assert_eq!(view.severity_zone, Some(SeverityZone::Green));
        assert_eq!(view.time_zone, Some(TimeBand::Orange));
        assert_eq!(view.countdown_text, "1h 30m");
        assert!(!view.is_stale);
        assert!(view.secondary.is_none());
    }

    #[test]
    fn test_scenario_a_fixture_zones() {
        let thresholds = ThresholdConfig {
            usage_zones: UsageZones::new(20.0, 40.0, 60.0, 100.0).unwrap(),
            ..Default::default()
        };
        let t = live(58.0, Duration::minutes(90));
        let view = DisplaySnapshot::build(&claude(), &t, &thresholds, Duration::hours(5), None, now());
        assert_eq!(view.severity_zone, Some(SeverityZone::Orange));
    }

    #[test]
    fn test_secondary_window_is_independent() {
        let t = live(10.0, Duration::hours(4));
        let view = DisplaySnapshot::build(
            &claude(),
            &t,
            &ThresholdConfig::default(),
            Duration::hours(5),
            Some(Duration::days(7)),
            now(),
        );

        let secondary = view.secondary.unwrap();
        assert_eq!(secondary.used_percent, 30.0);
        assert_eq!(secondary.remaining_percent, 70.0);
        assert_eq!(secondary.countdown_text, "2d 0h");
        assert!((secondary.elapsed_percent.unwrap() - 500.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_stale_view_keeps_last_value() {
        let entry = CacheEntry {
            last_good: Snapshot::new(42.0, Some(now() + Duration::hours(1)), now() - Duration::minutes(7)),
            is_stale: true,
        };
        let failed = UsageQueryResult::failure(FailureKind::Timeout, "timed out", now());
        let t = transition(true, Some(&entry), Some(&failed), now());
        let view = DisplaySnapshot::build(
            &claude(),
            &t,
            &ThresholdConfig::default(),
            Duration::hours(5),
            None,
            now(),
        );

        assert!(view.is_stale);
        assert_eq!(view.stale_age_seconds, Some(420));
        assert_eq!(view.remaining_percent, Some(58.0));
    }

    #[test]
    fn test_no_credentials_view_is_empty() {
        let t = transition(false, None, None, now());
        let view = DisplaySnapshot::build(
            &claude(),
            &t,
            &ThresholdConfig::default(),
            Duration::hours(5),
            Some(Duration::days(7)),
            now(),
        );

        assert_eq!(view.display_state, DisplayState::NoCredentials);
        assert_eq!(view.used_percent, None);
        assert_eq!(view.severity_zone, None);
        assert_eq!(view.countdown_text, NOT_STARTED);
        assert!(view.secondary.is_none());
    }

    #[test]
    fn test_expired_session_hides_percent_but_keeps_secondary() {
        let t = live(35.0, Duration::minutes(-5));
        let view = DisplaySnapshot::build(
            &claude(),
            &t,
            &ThresholdConfig::default(),
            Duration::hours(5),
            Some(Duration::days(7)),
            now(),
        );

        assert_eq!(view.display_state, DisplayState::SessionExpired);
        assert_eq!(view.used_percent, None);
        assert_eq!(view.countdown_text, NOT_STARTED);
        assert!(view.secondary.is_some());
    }

    #[test]
    fn test_downgraded_stale_entry_keeps_badge() {
        let entry = CacheEntry {
            last_good: Snapshot::new(0.0, None, now() - Duration::minutes(30)),
            is_stale: true,
        };
        let failed = UsageQueryResult::failure(FailureKind::Transient, "HTTP 503", now());
        let t = transition(true, Some(&entry), Some(&failed), now());
        let view = DisplaySnapshot::build(
            &claude(),
            &t,
            &ThresholdConfig::default(),
            Duration::hours(5),
            None,
            now(),
        );

        assert_eq!(view.display_state, DisplayState::SessionNotStarted);
        assert!(view.is_stale);
        assert_eq!(view.stale_age_seconds, Some(1800));
        assert_eq!(view.used_percent, Some(0.0));
    }

    #[test]
    fn test_not_started_shows_confirmed_zero() {
        let result = UsageQueryResult::success(
            UsageReading {
                used_percent: Some(0.0),
                ..Default::default()
            },
            now(),
        );
        let t = transition(true, None, Some(&result), now());
        let view = DisplaySnapshot::build(
            &claude(),
            &t,
            &ThresholdConfig::default(),
            Duration::hours(5),
            None,
            now(),
        );

        assert_eq!(view.display_state, DisplayState::SessionNotStarted);
        assert_eq!(view.used_percent, Some(0.0));
        assert_eq!(view.remaining_percent, Some(100.0));
        assert_eq!(view.severity_zone, Some(SeverityZone::Green));
        assert_eq!(view.elapsed_percent, None);
    }
}
