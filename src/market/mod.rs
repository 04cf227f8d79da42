//! Market session engine.
//!
//! Pure decision logic over a schedule and a timestamp; nothing here reads
//! the clock or touches storage. All trade gating goes through
//! [`market_status`]; the ledger never does its own time math.

use chrono::{Datelike, Days, NaiveDateTime, Weekday};

use crate::models::MarketSchedule;

/// How far ahead the next-open search looks, in days.
const NEXT_OPEN_WINDOW_DAYS: u64 = 30;

/// Whether the market is accepting trades right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketStatus {
    Open,
    Closed {
        /// Human-readable reason shown to users
        reason: String,
        /// Earliest upcoming session start within the search window
        next_open: Option<NaiveDateTime>,
    },
}

impl MarketStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, MarketStatus::Open)
    }
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Compute the session status at `now` (market-local time).
///
/// Decision order, first match wins: manual override, holiday, non-trading
/// weekday, outside [open, close), otherwise open.
pub fn market_status(schedule: &MarketSchedule, now: NaiveDateTime) -> MarketStatus {
    if schedule.manual_override {
        let reason = schedule
            .override_message
            .clone()
            .unwrap_or_else(|| "Market closed by administrator".to_string());
        return MarketStatus::Closed {
            reason,
            next_open: next_open(schedule, now),
        };
    }

    if let Some(holiday) = schedule.holiday_on(now.date()) {
        let reason = match &holiday.label {
            Some(label) => format!("Market closed for {label}"),
            None => format!("Market closed for holiday ({})", holiday.date),
        };
        return MarketStatus::Closed {
            reason,
            next_open: next_open(schedule, now),
        };
    }

    let weekday = now.weekday();
    if !schedule.is_trading_day(weekday) {
        return MarketStatus::Closed {
            reason: format!("Market is closed on {}", weekday_name(weekday)),
            next_open: next_open(schedule, now),
        };
    }

    let time = now.time();
    if time < schedule.open_time {
        return MarketStatus::Closed {
            reason: format!("Market opens at {}", schedule.open_time.format("%H:%M")),
            next_open: next_open(schedule, now),
        };
    }
    if time >= schedule.close_time {
        return MarketStatus::Closed {
            reason: format!("Market closed at {}", schedule.close_time.format("%H:%M")),
            next_open: next_open(schedule, now),
        };
    }

    MarketStatus::Open
}

/// First session start strictly after `now`, scanning up to 30 days ahead.
///
/// Skips non-trading weekdays and holidays. The manual override expresses
/// the current state only, so it is deliberately not consulted here.
pub fn next_open(schedule: &MarketSchedule, now: NaiveDateTime) -> Option<NaiveDateTime> {
    for offset in 0..=NEXT_OPEN_WINDOW_DAYS {
        let date = now.date().checked_add_days(Days::new(offset))?;
        if !schedule.is_trading_day(date.weekday()) {
            continue;
        }
        if schedule.holiday_on(date).is_some() {
            continue;
        }
        let candidate = date.and_time(schedule.open_time);
        if candidate > now {
            return Some(candidate);
        }
    }
    None
}
