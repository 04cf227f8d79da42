//! Account model: cash balance plus lifetime deposit/withdrawal totals.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A registered account holding cash and positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,

    /// Unique login name
    pub username: String,

    /// Unique contact address
    pub email: String,

    /// Available cash. Never negative.
    pub balance: Decimal,

    /// Lifetime sum of all deposits
    pub total_deposited: Decimal,

    /// Lifetime sum of all withdrawals
    pub total_withdrawn: Decimal,

    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Whether the account can cover a cash outflow of `amount`.
    pub fn can_afford(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_can_afford() {
        let account = Account {
            id: 1,
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            balance: dec!(100),
            total_deposited: dec!(100),
            total_withdrawn: dec!(0),
            created_at: Utc::now(),
        };

        assert!(account.can_afford(dec!(100)));
        assert!(account.can_afford(dec!(99.99)));
        assert!(!account.can_afford(dec!(100.01)));
    }
}
