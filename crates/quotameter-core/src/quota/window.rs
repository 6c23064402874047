//! Time-window calculator
//!
//! Converts a reset timestamp into elapsed percentage and a countdown string.
//! Each window (5-hour, 7-day, ...) is computed from its own `resets_at`; one
//! window is never derived from another.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Countdown text shown when there is no future reset to count down to
pub const NOT_STARTED: &str = "not started";

/// Progress through a single rolling window at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowProgress {
    /// Share of the window already elapsed (0.0 - 100.0); `None` without a reset time
    pub elapsed_percent: Option<f64>,
    /// Whole seconds until reset; `None` when the reset is unknown or already passed
    pub seconds_remaining: Option<i64>,
    /// Human-readable countdown, or [`NOT_STARTED`]
    pub countdown: String,
}

impl WindowProgress {
    pub fn compute(resets_at: Option<DateTime<Utc>>, window: Duration, now: DateTime<Utc>) -> Self {
        match resets_at {
            Some(reset) => Self {
                elapsed_percent: Some(elapsed_percent(reset, window, now)),
                seconds_remaining: remaining(reset, now).map(ceil_seconds),
                countdown: format_countdown(Some(reset), now),
            },
            None => Self {
                elapsed_percent: None,
                seconds_remaining: None,
                countdown: NOT_STARTED.to_string(),
            },
        }
    }
}

/// Time left until `resets_at`, or `None` if it is now or in the past
pub fn remaining(resets_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
    let left = resets_at - now;
    if left > Duration::zero() {
        Some(left)
    } else {
        None
    }
}

/// `clamp(0, 100, 100 * (W - (resets_at - now)) / W)`
pub fn elapsed_percent(resets_at: DateTime<Utc>, window: Duration, now: DateTime<Utc>) -> f64 {
    let window_ms = window.num_milliseconds();
    let left_ms = (resets_at - now).num_milliseconds();

    if window_ms <= 0 {
        return if left_ms > 0 { 0.0 } else { 100.0 };
    }

    let elapsed = 100.0 * (window_ms - left_ms) as f64 / window_ms as f64;
    elapsed.clamp(0.0, 100.0)
}

/// Countdown until `resets_at`
///
/// Past, present or unknown reset times render [`NOT_STARTED`]; the result is
/// never `"0s"` and never negative.
pub fn format_countdown(resets_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match resets_at.and_then(|reset| remaining(reset, now)) {
        Some(left) => format_duration(left),
        None => NOT_STARTED.to_string(),
    }
}

/// Format a positive duration as `"2d 3h"`, `"1h 30m"`, `"12m"` or `"45s"`
pub fn format_duration(duration: Duration) -> String {
    if duration <= Duration::zero() {
        return NOT_STARTED.to_string();
    }

    let total = ceil_seconds(duration);
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    if days > 0 {
        format!("{}d {}h", days, hours)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m", minutes)
    } else {
        format!("{}s", seconds)
    }
}

/// Round a positive duration up to whole seconds so sub-second remainders show as 1s
fn ceil_seconds(duration: Duration) -> i64 {
    let ms = duration.num_milliseconds();
    (ms + 999) / 1000
}
