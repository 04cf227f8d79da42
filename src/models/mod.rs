//! Data models for accounts, instruments, positions, trades, and configuration.

mod account;
mod instrument;
mod position;
mod schedule;
mod trade;

pub use account::Account;
pub use instrument::{Instrument, PriceSample};
pub use position::Position;
pub use schedule::{GeneratorSettings, Holiday, MarketSchedule, ScheduleUpdate, SettingsUpdate};
pub use trade::{TradeRecord, TradeSide};
