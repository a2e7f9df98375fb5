//! This module decides how fast the search may run at a given local time.

use crate::types::BeaverError;
use chrono::{DateTime, Datelike, Local, NaiveDateTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A recurring time window during which the search runs at reduced speed.
///
/// The window covers `start_hour <= hour < end_hour` in local time on the active days.
/// When `start_hour > end_hour` it wraps past midnight; when they are equal it is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleWindow {
    pub enabled: bool,
    pub start_hour: u32,
    pub end_hour: u32,
    /// Fraction of the full batch size dispatched while throttled.
    pub factor: f64,
    pub days_active: Vec<Weekday>,
    /// Pause between batches while throttled.
    pub delay_ms: u64,
}

impl Default for ThrottleWindow {
    fn default() -> Self {
        Self {
            enabled: true,
            start_hour: 9,
            end_hour: 18,
            factor: 0.25,
            days_active: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
            delay_ms: 0,
        }
    }
}

impl ThrottleWindow {
    /// Creates an enabled window active on every day of the week.
    pub fn new(start_hour: u32, end_hour: u32, factor: f64) -> Self {
        Self {
            start_hour,
            end_hour,
            factor,
            days_active: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
                Weekday::Sat,
                Weekday::Sun,
            ],
            ..Self::default()
        }
    }

    /// Creates a window that never throttles.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), BeaverError> {
        if self.start_hour > 23 || self.end_hour > 24 {
            return Err(BeaverError::Config(format!(
                "Throttle hours must lie within a day, got {}..{}",
                self.start_hour, self.end_hour
            )));
        }

        if !(self.factor > 0.0 && self.factor <= 1.0) {
            return Err(BeaverError::Config(format!(
                "Throttle factor must be in (0, 1], got {}",
                self.factor
            )));
        }

        Ok(())
    }

    /// Checks whether `at` (local time) falls inside the window.
    pub fn is_active(&self, at: NaiveDateTime) -> bool {
        if !self.enabled || !self.days_active.contains(&at.weekday()) {
            return false;
        }

        let hour = at.hour();
        if self.start_hour <= self.end_hour {
            self.start_hour <= hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }

    /// Returns the batch size to dispatch at `at`: `floor(full * factor)` (at least one)
    /// inside the window, `full` outside it.
    pub fn batch_size(&self, full: usize, at: NaiveDateTime) -> usize {
        if self.is_active(at) {
            ((full as f64 * self.factor).floor() as usize).max(1)
        } else {
            full
        }
    }

    /// Returns how long to wait after a batch finished at `at`.
    pub fn pacing(&self, at: NaiveDateTime) -> Duration {
        if self.is_active(at) {
            Duration::from_millis(self.delay_ms)
        } else {
            Duration::ZERO
        }
    }
}

/// A source of the current time.
pub trait Clock: Send + Sync {
    /// Local wall-clock time, used for throttling.
    fn local(&self) -> NaiveDateTime;

    /// UTC time, used for timestamps.
    fn utc(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn local(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock stuck at one instant, treating local time as UTC.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn local(&self) -> NaiveDateTime {
        self.0
    }

    fn utc(&self) -> DateTime<Utc> {
        self.0.and_utc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        // March 2024: the 4th is a Monday, the 9th a Saturday.
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn test_batch_size_boundaries() {
        let window = ThrottleWindow::new(9, 18, 0.25);

        assert_eq!(window.batch_size(1000, at(4, 10, 0)), 250);
        assert_eq!(window.batch_size(1000, at(4, 20, 0)), 1000);
        assert_eq!(window.batch_size(1000, at(4, 9, 0)), 250);
        assert_eq!(window.batch_size(1000, at(4, 17, 59)), 250);
        assert_eq!(window.batch_size(1000, at(4, 18, 0)), 1000);
        assert_eq!(window.batch_size(1000, at(4, 8, 59)), 1000);
    }

    #[test]
    fn test_batch_size_never_zero() {
        let window = ThrottleWindow::new(0, 24, 0.1);
        assert_eq!(window.batch_size(3, at(4, 12, 0)), 1);
    }

    #[test]
    fn test_inactive_days_and_disabled() {
        let weekdays = ThrottleWindow::default();
        assert!(weekdays.is_active(at(4, 10, 0)));
        assert!(!weekdays.is_active(at(9, 10, 0)));

        assert!(!ThrottleWindow::disabled().is_active(at(4, 10, 0)));
    }

    #[test]
    fn test_window_wraps_midnight() {
        let night = ThrottleWindow::new(22, 6, 0.5);

        assert!(night.is_active(at(4, 23, 0)));
        assert!(night.is_active(at(5, 2, 0)));
        assert!(!night.is_active(at(5, 12, 0)));
        assert!(!ThrottleWindow::new(9, 9, 0.5).is_active(at(4, 9, 30)));
    }

    #[test]
    fn test_pacing() {
        let mut window = ThrottleWindow::new(9, 18, 0.5);
        window.delay_ms = 250;

        assert_eq!(window.pacing(at(4, 10, 0)), Duration::from_millis(250));
        assert_eq!(window.pacing(at(4, 19, 0)), Duration::ZERO);
    }

    #[test]
    fn test_validate() {
        assert!(ThrottleWindow::default().validate().is_ok());
        assert!(ThrottleWindow::new(9, 18, 0.0).validate().is_err());
        assert!(ThrottleWindow::new(9, 18, 1.5).validate().is_err());
        assert!(ThrottleWindow::new(25, 18, 0.5).validate().is_err());
    }

    #[test]
    fn test_deserialize_weekday_names() {
        let window: ThrottleWindow = serde_json::from_str(
            r#"{"start_hour": 8, "end_hour": 12, "days_active": ["Monday", "Saturday"]}"#,
        )
        .unwrap();

        assert_eq!(window.days_active, vec![Weekday::Mon, Weekday::Sat]);
        assert_eq!(window.factor, 0.25);
        assert!(window.enabled);
    }

    #[test]
    fn test_fixed_clock() {
        let clock = FixedClock(at(4, 10, 0));
        assert_eq!(clock.utc().naive_utc(), at(4, 10, 0));
    }
}
