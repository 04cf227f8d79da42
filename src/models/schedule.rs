//! Market schedule and price-generator configuration.
//!
//! Both are singletons, edited by administrators and read fresh on every
//! session decision / generator tick so changes apply without a restart.

use chrono::{NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// A calendar date on which the market stays closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holiday {
    pub date: NaiveDate,

    /// Display name (e.g. "Christmas Day")
    #[serde(default)]
    pub label: Option<String>,
}

/// The configured trading calendar and hours.
#[derive(Debug, Clone)]
pub struct MarketSchedule {
    /// Session opens at this local time
    pub open_time: NaiveTime,

    /// Session closes at this local time (exclusive)
    pub close_time: NaiveTime,

    /// Informational timezone label; callers supply market-local timestamps
    pub timezone: String,

    /// Weekdays on which the market may open
    pub trading_days: Vec<Weekday>,

    pub holidays: Vec<Holiday>,

    /// Administrative kill switch: forces the market closed
    pub manual_override: bool,

    /// Reason shown while the override is active
    pub override_message: Option<String>,
}

impl Default for MarketSchedule {
    fn default() -> Self {
        Self {
            open_time: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            close_time: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            timezone: "America/New_York".to_string(),
            trading_days: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
            holidays: Vec::new(),
            manual_override: false,
            override_message: None,
        }
    }
}

impl MarketSchedule {
    pub fn is_trading_day(&self, day: Weekday) -> bool {
        self.trading_days.contains(&day)
    }

    /// First holiday entry matching `date`, if any. Every entry is checked.
    pub fn holiday_on(&self, date: NaiveDate) -> Option<&Holiday> {
        self.holidays.iter().find(|h| h.date == date)
    }
}

/// Partial update to the schedule; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ScheduleUpdate {
    pub open_time: Option<NaiveTime>,
    pub close_time: Option<NaiveTime>,
    pub timezone: Option<String>,
    pub trading_days: Option<Vec<Weekday>>,
    pub holidays: Option<Vec<Holiday>>,
    pub manual_override: Option<bool>,
    pub override_message: Option<Option<String>>,
}

impl ScheduleUpdate {
    /// Apply to `schedule`, returning a description of each changed field
    /// for the audit trail.
    pub fn apply(self, schedule: &mut MarketSchedule) -> Vec<String> {
        let mut changes = Vec::new();

        if let Some(v) = self.open_time {
            changes.push(format!("open_time {} -> {}", schedule.open_time, v));
            schedule.open_time = v;
        }
        if let Some(v) = self.close_time {
            changes.push(format!("close_time {} -> {}", schedule.close_time, v));
            schedule.close_time = v;
        }
        if let Some(v) = self.timezone {
            changes.push(format!("timezone {} -> {}", schedule.timezone, v));
            schedule.timezone = v;
        }
        if let Some(v) = self.trading_days {
            changes.push(format!("trading_days {:?} -> {:?}", schedule.trading_days, v));
            schedule.trading_days = v;
        }
        if let Some(v) = self.holidays {
            changes.push(format!(
                "holidays {} -> {} entries",
                schedule.holidays.len(),
                v.len()
            ));
            schedule.holidays = v;
        }
        if let Some(v) = self.manual_override {
            changes.push(format!(
                "manual_override {} -> {}",
                schedule.manual_override, v
            ));
            schedule.manual_override = v;
        }
        if let Some(v) = self.override_message {
            changes.push(format!(
                "override_message {:?} -> {:?}",
                schedule.override_message, v
            ));
            schedule.override_message = v;
        }

        changes
    }
}

/// Synthetic price-feed tuning. Read once per tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorSettings {
    /// Master switch; a disabled tick writes nothing
    pub enabled: bool,

    /// Seconds between ticks
    pub interval_secs: u64,

    /// Std-dev of the per-tick log-return
    pub volatility: f64,

    /// Mean of the per-tick log-return
    pub drift: f64,

    /// Multiplier applied to the whole log-return, for demo-friendly swings
    pub exaggeration: f64,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 5,
            volatility: 0.01,
            drift: 0.0,
            exaggeration: 1.0,
        }
    }
}

/// Partial update to generator settings; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct SettingsUpdate {
    pub enabled: Option<bool>,
    pub interval_secs: Option<u64>,
    pub volatility: Option<f64>,
    pub drift: Option<f64>,
    pub exaggeration: Option<f64>,
}

impl SettingsUpdate {
    pub fn apply(self, settings: &mut GeneratorSettings) -> Vec<String> {
        let mut changes = Vec::new();

        if let Some(v) = self.enabled {
            changes.push(format!("enabled {} -> {}", settings.enabled, v));
            settings.enabled = v;
        }
        if let Some(v) = self.interval_secs {
            changes.push(format!("interval_secs {} -> {}", settings.interval_secs, v));
            settings.interval_secs = v;
        }
        if let Some(v) = self.volatility {
            changes.push(format!("volatility {} -> {}", settings.volatility, v));
            settings.volatility = v;
        }
        if let Some(v) = self.drift {
            changes.push(format!("drift {} -> {}", settings.drift, v));
            settings.drift = v;
        }
        if let Some(v) = self.exaggeration {
            changes.push(format!("exaggeration {} -> {}", settings.exaggeration, v));
            settings.exaggeration = v;
        }

        changes
    }
}
