//! Trade record: one executed buy or sell, append-only.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(TradeSide::Buy),
            "SELL" => Some(TradeSide::Sell),
            _ => None,
        }
    }
}

/// An executed trade, written once and never updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: i64,
    pub account_id: i64,
    pub instrument_id: i64,
    pub side: TradeSide,
    pub quantity: Decimal,

    /// Execution price per share
    pub price: Decimal,

    /// Cash balance after the trade settled
    pub cash_after: Decimal,

    /// Realized P/L against average cost; zero for buys
    pub realized_pl: Decimal,

    pub executed_at: DateTime<Utc>,
}
