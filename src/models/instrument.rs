//! Instrument model: a tradable symbol with its current quote.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Prices are kept to cents.
pub const PRICE_SCALE: u32 = 2;

/// Smallest price the feed will ever quote; prices must stay positive.
pub const MIN_PRICE: Decimal = dec!(0.01);

/// One point of an instrument's price history, appended per generator tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSample {
    pub instrument_id: i64,
    pub price: Decimal,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
}

/// A tradable instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub id: i64,

    /// Ticker symbol, unique (e.g. "ACME")
    pub symbol: String,

    /// Display name (company name)
    pub name: String,

    /// Current quote. Always >= MIN_PRICE.
    pub price: Decimal,
}

impl Instrument {
    /// Clamp and round a candidate price to a valid quote.
    pub fn normalize_price(raw: Decimal) -> Decimal {
        raw.round_dp(PRICE_SCALE).max(MIN_PRICE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_rounds_to_cents() {
        assert_eq!(Instrument::normalize_price(dec!(12.3456)), dec!(12.35));
        assert_eq!(Instrument::normalize_price(dec!(12.344)), dec!(12.34));
    }

    #[test]
    fn test_normalize_clamps_floor() {
        assert_eq!(Instrument::normalize_price(dec!(0.001)), MIN_PRICE);
        assert_eq!(Instrument::normalize_price(dec!(-3)), MIN_PRICE);
        assert_eq!(Instrument::normalize_price(dec!(0)), MIN_PRICE);
    }
}
