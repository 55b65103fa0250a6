//! Signing Time Windows
//!
//! Each participant only signs during its configured window of the day.
//! Windows may wrap midnight (e.g. `22:00`-`06:00`).
//!
//! ## Fail-open
//!
//! A malformed window string never blocks a participant. It falls back to
//! the always-active `00:00`-`23:59` window and a warning is logged.

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Accepted `HH:MM` format for window bounds.
const WINDOW_FORMAT: &str = "%H:%M";

/// Start of the always-active fallback window.
pub const DEFAULT_WINDOW_START: &str = "00:00";

/// End of the always-active fallback window.
pub const DEFAULT_WINDOW_END: &str = "23:59";

/// Check whether `now` falls inside the window.
///
/// - `start < end`: same-day window, active iff `start <= now <= end`
/// - `start >= end`: wraps midnight, active iff `now >= start || now <= end`
pub fn is_active(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start < end {
        start <= now && now <= end
    } else {
        now >= start || now <= end
    }
}

/// Parse an `HH:MM` string.
pub fn parse_time_of_day(input: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(input.trim(), WINDOW_FORMAT).ok()
}

/// Raw window bounds as written in participant config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_start")]
    pub start: String,

    #[serde(default = "default_end")]
    pub end: String,
}

fn default_start() -> String {
    DEFAULT_WINDOW_START.to_string()
}

fn default_end() -> String {
    DEFAULT_WINDOW_END.to_string()
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            start: default_start(),
            end: default_end(),
        }
    }
}

/// A parsed daily signing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveWindow {
    start: NaiveTime,
    end: NaiveTime,
}

impl ActiveWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// The `00:00`-`23:59` window.
    pub fn always() -> Self {
        Self {
            start: NaiveTime::MIN,
            end: NaiveTime::from_hms_opt(23, 59, 0).unwrap_or(NaiveTime::MIN),
        }
    }

    /// Parse window bounds, falling back to [`ActiveWindow::always`] if
    /// either bound is malformed.
    pub fn parse_or_default(start: &str, end: &str) -> Self {
        match (parse_time_of_day(start), parse_time_of_day(end)) {
            (Some(start), Some(end)) => Self { start, end },
            _ => {
                warn!(
                    start,
                    end, "malformed signing window, falling back to always-active"
                );
                Self::always()
            }
        }
    }

    pub fn from_config(config: &WindowConfig) -> Self {
        Self::parse_or_default(&config.start, &config.end)
    }

    /// Bounds have minute precision, so `now` is compared by its minute.
    pub fn contains(&self, now: NaiveTime) -> bool {
        let minute = NaiveTime::from_hms_opt(now.hour(), now.minute(), 0).unwrap_or(now);
        is_active(minute, self.start, self.end)
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    pub fn end(&self) -> NaiveTime {
        self.end
    }
}

impl fmt::Display for ActiveWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.start.format(WINDOW_FORMAT),
            self.end.format(WINDOW_FORMAT)
        )
    }
}
