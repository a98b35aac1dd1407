//! Monetary units of the ledger
//!
//! Values on outputs are integers in the smallest unit. The block subsidy is
//! fixed; there is no halving and no fee collection.

/// Number of base units in one coin
pub const SATOSHIS_PER_COIN: u64 = 100_000_000;

/// Default block subsidy in base units (50 coins)
pub const INITIAL_BLOCK_REWARD: u64 = 50 * SATOSHIS_PER_COIN;

/// Utility functions for displaying amounts
pub mod conversions {
    use super::*;

    /// Render a base-unit amount as a decimal coin string, e.g. `1.50000000`
    ///
    /// # Examples
    /// ```
    /// use ledger_chain::core::monetary::conversions::format_coins;
    /// assert_eq!(format_coins(150_000_000), "1.50000000");
    /// assert_eq!(format_coins(1), "0.00000001");
    /// ```
    pub fn format_coins(amount: u64) -> String {
        format!(
            "{}.{:08}",
            amount / SATOSHIS_PER_COIN,
            amount % SATOSHIS_PER_COIN
        )
    }
}

#[cfg(test)]
mod tests {
    use super::conversions::format_coins;
    use super::*;

    #[test]
    fn test_reward_is_whole_coins() {
        assert_eq!(INITIAL_BLOCK_REWARD % SATOSHIS_PER_COIN, 0);
        assert_eq!(format_coins(INITIAL_BLOCK_REWARD), "50.00000000");
    }
}
