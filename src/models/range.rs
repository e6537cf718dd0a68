// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Inclusive calendar-day range used for provider fetches.

use chrono::{DateTime, Days, NaiveDate, Utc};

/// Inclusive range of calendar days, `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DateRangeError {
    #[error("start date {start} is after end date {end}")]
    Inverted { start: NaiveDate, end: NaiveDate },
    #[error("range of {days} days exceeds the maximum of {max}")]
    TooLong { days: u64, max: u64 },
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DateRangeError> {
        if start > end {
            return Err(DateRangeError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    /// The `days` calendar days ending today (inclusive).
    pub fn last_days(today: NaiveDate, days: u32) -> Self {
        let span = u64::from(days.max(1) - 1);
        let start = today.checked_sub_days(Days::new(span)).unwrap_or(today);
        Self { start, end: today }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of calendar days covered.
    pub fn num_days(&self) -> u64 {
        (self.end - self.start).num_days() as u64 + 1
    }

    pub fn ensure_max_days(self, max: u64) -> Result<Self, DateRangeError> {
        let days = self.num_days();
        if days > max {
            return Err(DateRangeError::TooLong { days, max });
        }
        Ok(self)
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    /// Midnight UTC at the start of the range.
    pub fn start_datetime(&self) -> DateTime<Utc> {
        self.start.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc()
    }

    /// Midnight UTC after the last day (exclusive upper bound).
    pub fn end_datetime_exclusive(&self) -> DateTime<Utc> {
        let next = self.end.checked_add_days(Days::new(1)).unwrap_or(self.end);
        next.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc()
    }
}
