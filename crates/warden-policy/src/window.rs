//! Recurring time windows.
//!
//! A `TimeWindow` from the policy file is compiled once at load time into a
//! `CompiledWindow`, so evaluation never re-parses strings and a malformed
//! window is rejected before any request is evaluated.

use chrono::{Datelike, NaiveDateTime, NaiveTime, Weekday};

use warden_contracts::policy::{Day, TimeWindow};

/// A parsed `TimeWindow`, ready for evaluation against local wall-clock time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledWindow {
    start: NaiveTime,
    end: NaiveTime,
    days: Vec<Weekday>,
}

impl CompiledWindow {
    /// Parse `window`. Returns a human-readable reason on failure.
    pub fn compile(window: &TimeWindow) -> Result<Self, String> {
        let start = parse_hhmm(&window.start)?;
        let end = parse_hhmm(&window.end)?;
        let days = window.days.iter().map(|d| weekday(*d)).collect();
        Ok(Self { start, end, days })
    }

    /// True if the window is open at `local` (already shifted to the policy
    /// file's fixed offset).
    ///
    /// For windows that wrap past midnight, the early-morning tail belongs to
    /// the previous day's window, so `days` is checked against that day.
    pub fn is_active(&self, local: NaiveDateTime) -> bool {
        let t = local.time();
        let today = local.weekday();

        if self.start == self.end {
            return self.opens_on(today);
        }

        if self.start < self.end {
            return t >= self.start && t < self.end && self.opens_on(today);
        }

        if t >= self.start {
            self.opens_on(today)
        } else if t < self.end {
            self.opens_on(today.pred())
        } else {
            false
        }
    }

    /// `"HH:MM-HH:MM"`, for verdict reasons.
    pub fn describe(&self) -> String {
        format!("{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }

    fn opens_on(&self, day: Weekday) -> bool {
        self.days.is_empty() || self.days.contains(&day)
    }
}

fn parse_hhmm(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|e| format!("invalid time '{s}' (expected HH:MM): {e}"))
}

fn weekday(day: Day) -> Weekday {
    match day {
        Day::Mon => Weekday::Mon,
        Day::Tue => Weekday::Tue,
        Day::Wed => Weekday::Wed,
        Day::Thu => Weekday::Thu,
        Day::Fri => Weekday::Fri,
        Day::Sat => Weekday::Sat,
        Day::Sun => Weekday::Sun,
    }
}
