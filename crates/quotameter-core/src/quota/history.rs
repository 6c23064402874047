//! Completed-window history
//!
//! When a provider's window resets, the final reading of the window that just
//! closed is remembered. Bounded per provider, newest first.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{ProviderId, Snapshot};

/// Final state of a window that has reset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedWindow {
    /// When the window reset
    pub resets_at: DateTime<Utc>,
    /// Last used percentage observed before the reset
    pub final_used_percent: f64,
    /// When that last reading was taken
    pub observed_at: DateTime<Utc>,
}

impl CompletedWindow {
    /// The window `previous` belonged to, if `next` was observed after it reset
    pub fn closed_by(previous: &Snapshot, next: &Snapshot) -> Option<Self> {
        let resets_at = previous.resets_at?;
        if next.observed_at < resets_at {
            return None;
        }
        Some(Self {
            resets_at,
            final_used_percent: previous.used_percent,
            observed_at: previous.observed_at,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct WindowHistory {
    capacity: usize,
    windows: HashMap<ProviderId, VecDeque<CompletedWindow>>,
}

impl WindowHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            windows: HashMap::new(),
        }
    }

    /// Rebuild from persisted rows (any order)
    pub fn from_rows<I>(capacity: usize, rows: I) -> Self
    where
        I: IntoIterator<Item = (ProviderId, CompletedWindow)>,
    {
        let mut by_provider: HashMap<ProviderId, Vec<CompletedWindow>> = HashMap::new();
        for (provider, window) in rows {
            by_provider.entry(provider).or_default().push(window);
        }

        let mut history = Self::new(capacity);
        for (provider, mut windows) in by_provider {
            windows.sort_by(|a, b| a.resets_at.cmp(&b.resets_at));
            for window in windows {
                history.push(&provider, window);
            }
        }
        history
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record a completed window
    ///
    /// Returns `false` if that window was already recorded or the history is
    /// disabled (capacity 0).
    pub fn push(&mut self, provider: &ProviderId, window: CompletedWindow) -> bool {
        if self.capacity == 0 {
            return false;
        }

        let entries = self.windows.entry(provider.clone()).or_default();
        if entries.iter().any(|w| w.resets_at == window.resets_at) {
            return false;
        }

        entries.push_front(window);
        entries.make_contiguous().sort_by(|a, b| b.resets_at.cmp(&a.resets_at));
        entries.truncate(self.capacity);
        true
    }

    /// Completed windows for a provider, newest first
    pub fn get(&self, provider: &ProviderId) -> Vec<CompletedWindow> {
        self.windows
            .get(provider)
            .map(|w| w.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn providers(&self) -> impl Iterator<Item = &ProviderId> {
        self.windows.keys()
    }

    pub fn clear(&mut self) {
        self.windows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn base() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn window(hour: i64, used: f64) -> CompletedWindow {
        CompletedWindow {
            resets_at: base() + Duration::hours(hour),
            final_used_percent: used,
            observed_at: base() + Duration::hours(hour) - Duration::minutes(10),
        }
    }

    #[test]
    fn test_closed_by_detects_reset() {
        let reset = base() + Duration::hours(5);
        let previous = Snapshot::new(80.0, Some(reset), reset - Duration::minutes(3));

        let same_window = Snapshot::new(82.0, Some(reset), reset - Duration::minutes(1));
        assert!(CompletedWindow::closed_by(&previous, &same_window).is_none());

        let next = Snapshot::new(2.0, Some(reset + Duration::hours(5)), reset + Duration::minutes(2));
        let closed = CompletedWindow::closed_by(&previous, &next).unwrap();
        assert_eq!(closed.resets_at, reset);
        assert_eq!(closed.final_used_percent, 80.0);

        let no_reset = Snapshot::new(0.0, None, reset + Duration::minutes(2));
        assert!(CompletedWindow::closed_by(&previous, &no_reset).is_some());
    }

    #[test]
    fn test_bounded_newest_first() {
        let mut history = WindowHistory::new(3);
        let claude = ProviderId::new("claude");
        for hour in [5, 10, 15, 20] {
            assert!(history.push(&claude, window(hour, hour as f64)));
        }

        let windows = history.get(&claude);
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].final_used_percent, 20.0);
        assert_eq!(windows[2].final_used_percent, 10.0);
    }

    #[test]
    fn test_duplicate_window_ignored() {
        let mut history = WindowHistory::new(6);
        let claude = ProviderId::new("claude");
        assert!(history.push(&claude, window(5, 40.0)));
        assert!(!history.push(&claude, window(5, 41.0)));
        assert_eq!(history.get(&claude).len(), 1);
    }

    #[test]
    fn test_from_rows_orders_per_provider() {
        let history = WindowHistory::from_rows(
            6,
            vec![
                ("claude".into(), window(10, 2.0)),
                ("codex".into(), window(5, 9.0)),
                ("claude".into(), window(5, 1.0)),
            ],
        );
        let claude = history.get(&"claude".into());
        assert_eq!(claude[0].final_used_percent, 2.0);
        assert_eq!(claude[1].final_used_percent, 1.0);
        assert_eq!(history.get(&"codex".into()).len(), 1);
    }

    #[test]
    fn test_zero_capacity_disables() {
        let mut history = WindowHistory::new(0);
        assert!(!history.push(&"claude".into(), window(5, 1.0)));
        assert!(history.get(&"claude".into()).is_empty());
    }
}
