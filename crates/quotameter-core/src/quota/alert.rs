//! Threshold-crossing alerts
//!
//! Remembers the most severe zone seen per provider within the current window
//! so each escalation is reported exactly once. A window reset (a later
//! `resets_at`) re-arms every level.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::threshold::SeverityZone;
use super::types::ProviderId;

/// A provider moved into a more severe zone
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdCrossing {
    pub provider: ProviderId,
    pub from: SeverityZone,
    pub to: SeverityZone,
    pub used_percent: f64,
}

#[derive(Debug, Clone, Copy)]
struct Armed {
    highest: SeverityZone,
    resets_at: Option<DateTime<Utc>>,
}

/// State for tracking alert levels to prevent spam
#[derive(Debug, Clone, Default)]
pub struct AlertTracker {
    last_alerts: HashMap<ProviderId, Armed>,
}

impl AlertTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a fresh reading; returns a crossing if the zone escalated
    pub fn observe(
        &mut self,
        provider: &ProviderId,
        zone: SeverityZone,
        used_percent: f64,
        resets_at: Option<DateTime<Utc>>,
    ) -> Option<ThresholdCrossing> {
        let previous = self.last_alerts.get(provider).copied();

        let last_level = match previous {
            Some(armed) if !is_new_window(armed.resets_at, resets_at) => armed.highest,
            _ => SeverityZone::Green,
        };

        self.last_alerts.insert(
            provider.clone(),
            Armed {
                highest: last_level.max(zone),
                resets_at,
            },
        );

        if zone > last_level {
            log::info!(
                "[quota:alert] {} crossed {} -> {} ({:.1}% used)",
                provider,
                last_level,
                zone,
                used_percent
            );
            Some(ThresholdCrossing {
                provider: provider.clone(),
                from: last_level,
                to: zone,
                used_percent,
            })
        } else {
            None
        }
    }

    /// Forget a provider (e.g. when it is disabled)
    pub fn reset(&mut self, provider: &ProviderId) {
        self.last_alerts.remove(provider);
    }

    pub fn clear(&mut self) {
        self.last_alerts.clear();
    }
}

fn is_new_window(last: Option<DateTime<Utc>>, current: Option<DateTime<Utc>>) -> bool {
    match (last, current) {
        (Some(last), Some(current)) => current > last,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn claude() -> ProviderId {
        ProviderId::new("claude")
    }

    #[test]
    fn test_alerts_only_on_escalation() {
        let mut tracker = AlertTracker::new();
        let reset = Some(Utc::now() + Duration::hours(2));

        assert!(tracker.observe(&claude(), SeverityZone::Green, 10.0, reset).is_none());

        let crossing = tracker
            .observe(&claude(), SeverityZone::Yellow, 75.0, reset)
            .unwrap();
        assert_eq!(crossing.from, SeverityZone::Green);
        assert_eq!(crossing.to, SeverityZone::Yellow);

        // Same level again
        assert!(tracker.observe(&claude(), SeverityZone::Yellow, 78.0, reset).is_none());

        let crossing = tracker
            .observe(&claude(), SeverityZone::Red, 96.0, reset)
            .unwrap();
        assert_eq!(crossing.from, SeverityZone::Yellow);
    }

    #[test]
    fn test_no_repeat_after_dip_in_same_window() {
        let mut tracker = AlertTracker::new();
        let reset = Some(Utc::now() + Duration::hours(2));

        assert!(tracker.observe(&claude(), SeverityZone::Orange, 90.0, reset).is_some());
        assert!(tracker.observe(&claude(), SeverityZone::Yellow, 80.0, reset).is_none());
        assert!(tracker.observe(&claude(), SeverityZone::Orange, 90.0, reset).is_none());
    }

    #[test]
    fn test_new_window_rearms() {
        let mut tracker = AlertTracker::new();
        let first = Utc::now() + Duration::hours(1);

        assert!(tracker.observe(&claude(), SeverityZone::Orange, 90.0, Some(first)).is_some());

        let next = first + Duration::hours(5);
        assert!(tracker.observe(&claude(), SeverityZone::Green, 5.0, Some(next)).is_none());
        let crossing = tracker
            .observe(&claude(), SeverityZone::Orange, 88.0, Some(next))
            .unwrap();
        assert_eq!(crossing.from, SeverityZone::Green);
    }

    #[test]
    fn test_providers_are_independent() {
        let mut tracker = AlertTracker::new();
        assert!(tracker.observe(&claude(), SeverityZone::Red, 99.0, None).is_some());
        assert!(tracker.observe(&"codex".into(), SeverityZone::Red, 99.0, None).is_some());

        tracker.reset(&claude());
        assert!(tracker.observe(&claude(), SeverityZone::Red, 99.0, None).is_some());
    }
}
