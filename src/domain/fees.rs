//! Parking fee arithmetic
//!
//! Fees are a pure function of entry and exit timestamps: partial
//! hours are billed as full hours, and any positive stay bills at
//! least one hour.

use chrono::{DateTime, Utc};
use tracing::error;

/// Hourly-rate fee schedule
#[derive(Debug, Clone, Copy)]
pub struct FeeSchedule {
    pub hourly_rate: f64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self { hourly_rate: 10.0 }
    }
}

impl FeeSchedule {
    pub fn new(hourly_rate: f64) -> Self {
        Self { hourly_rate }
    }

    /// Fee for a stay, rounded up to whole hours.
    ///
    /// A zero or negative duration (exit before entry) is an error
    /// condition: logged, never charged.
    pub fn fee(&self, entry: DateTime<Utc>, exit: DateTime<Utc>) -> f64 {
        let duration = exit - entry;
        let seconds = duration.num_seconds();
        if seconds <= 0 {
            if seconds < 0 {
                error!(
                    entry = %entry,
                    exit = %exit,
                    "fee_negative_duration"
                );
            }
            return 0.0;
        }

        let hours = (seconds as f64 / 3600.0).ceil();
        hours * self.hourly_rate
    }

    /// Format a fee as a currency string for the receipt log
    pub fn format_fee(&self, fee: f64) -> String {
        format!("${:.2}", fee)
    }
}

/// Human-readable stay duration for the receipt log
pub fn duration_text(entry: DateTime<Utc>, exit: DateTime<Utc>) -> String {
    let seconds = (exit - entry).num_seconds();
    if seconds < 0 {
        return "invalid".to_string();
    }

    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    fn unit(n: i64, name: &str) -> String {
        if n == 1 {
            format!("1 {}", name)
        } else {
            format!("{} {}s", n, name)
        }
    }

    if hours > 0 && minutes > 0 {
        format!("{} {}", unit(hours, "hour"), unit(minutes, "minute"))
    } else if hours > 0 {
        unit(hours, "hour")
    } else if minutes > 0 {
        unit(minutes, "minute")
    } else {
        unit(secs, "second")
    }
}
