//! Position model: an account's holding in one instrument.
//!
//! Average cost is a weighted running mean maintained incrementally across
//! buys; it is never recomputed from trade history. Selling leaves the
//! average cost of the remaining lot unchanged.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Holding of a single instrument by a single account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub account_id: i64,
    pub instrument_id: i64,

    /// Shares held. Never negative; a position at zero is deleted.
    pub quantity: Decimal,

    /// Weighted average cost per share. Defined while quantity > 0 and
    /// equal to total_invested / quantity.
    pub avg_cost: Decimal,

    /// Cost basis of the open lot
    pub total_invested: Decimal,

    pub last_updated: DateTime<Utc>,
}

impl Position {
    /// Open a fresh position from a first buy.
    pub fn open(account_id: i64, instrument_id: i64, quantity: Decimal, price: Decimal) -> Self {
        Self {
            account_id,
            instrument_id,
            quantity,
            avg_cost: price,
            total_invested: quantity * price,
            last_updated: Utc::now(),
        }
    }

    /// Add shares bought at `price`, re-deriving the weighted average cost.
    pub fn add(&mut self, quantity: Decimal, price: Decimal) {
        let cost = quantity * price;
        self.quantity += quantity;
        self.total_invested += cost;
        if !self.quantity.is_zero() {
            self.avg_cost = self.total_invested / self.quantity;
        }
        self.last_updated = Utc::now();
    }

    /// Remove sold shares and return the realized P/L against average cost.
    ///
    /// Caller must have validated `quantity <= self.quantity`. The average
    /// cost of the remaining shares does not move.
    pub fn reduce(&mut self, quantity: Decimal, sale_price: Decimal) -> Decimal {
        let cost_basis = quantity * self.avg_cost;
        let proceeds = quantity * sale_price;

        self.quantity -= quantity;
        self.total_invested -= cost_basis;
        self.last_updated = Utc::now();

        proceeds - cost_basis
    }

    /// Closed positions are removed from storage.
    pub fn is_closed(&self) -> bool {
        self.quantity.is_zero()
    }

    /// Current market value at `price`.
    pub fn market_value(&self, price: Decimal) -> Decimal {
        self.quantity * price
    }

    /// Paper profit versus current price; consumers use this for display.
    pub fn unrealized_pl(&self, price: Decimal) -> Decimal {
        self.market_value(price) - self.total_invested
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_weighted_average_across_buys() {
        let mut pos = Position::open(1, 1, dec!(10), dec!(50));
        assert_eq!(pos.avg_cost, dec!(50));
        assert_eq!(pos.total_invested, dec!(500));

        // Buy 10 more at 60: (10*50 + 10*60) / 20 = 55 exactly
        pos.add(dec!(10), dec!(60));
        assert_eq!(pos.quantity, dec!(20));
        assert_eq!(pos.avg_cost, dec!(55));
        assert_eq!(pos.total_invested, dec!(1100));
    }

    #[test]
    fn test_sell_keeps_avg_cost_of_remainder() {
        let mut pos = Position::open(1, 1, dec!(10), dec!(50));

        let realized = pos.reduce(dec!(4), dec!(60));
        assert_eq!(realized, dec!(40)); // 4 * (60 - 50)
        assert_eq!(pos.quantity, dec!(6));
        assert_eq!(pos.avg_cost, dec!(50));
        assert_eq!(pos.total_invested, dec!(300));
    }

    #[test]
    fn test_full_close_reconciles_pl() {
        let mut pos = Position::open(1, 1, dec!(5), dec!(20));
        pos.add(dec!(5), dec!(30)); // invested 250, avg 25

        let mut total_pl = pos.reduce(dec!(4), dec!(40));
        total_pl += pos.reduce(dec!(6), dec!(10));

        assert!(pos.is_closed());
        assert_eq!(pos.total_invested, dec!(0));
        // Proceeds 4*40 + 6*10 = 220, total cost 250
        assert_eq!(total_pl, dec!(-30));
    }

    #[test]
    fn test_unrealized_pl() {
        let pos = Position::open(1, 1, dec!(10), dec!(50));
        assert_eq!(pos.unrealized_pl(dec!(55)), dec!(50));
        assert_eq!(pos.unrealized_pl(dec!(45)), dec!(-50));
    }
}
