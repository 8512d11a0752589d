//! Money & Precision Rules
//!
//! Balances are fiat-denominated with a crypto leg per wager. All amounts
//! that persist or cross the wire go through these helpers so the two
//! configured precisions are applied in exactly one place:
//! - fiat: 2 decimals, rounded
//! - crypto: 8 decimals, truncated at credit time
//! - multipliers: 2 decimals, rounded

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Decimal places kept on fiat amounts.
pub const FIAT_DECIMALS: u32 = 2;

/// Decimal places kept on crypto amounts.
pub const CRYPTO_DECIMALS: u32 = 8;

/// Minimum fiat stake accepted for a wager.
pub const MIN_STAKE_FIAT: f64 = 1.00;

/// An auto-cashout trigger must exceed this multiplier.
pub const MIN_AUTO_CASHOUT: f64 = 1.01;

/// Supported crypto units.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum CryptoUnit {
    /// Bitcoin.
    Btc,
    /// Ether.
    Eth,
}

impl CryptoUnit {
    /// Ticker symbol, as used on the wire and in ledger records.
    pub fn as_str(self) -> &'static str {
        match self {
            CryptoUnit::Btc => "BTC",
            CryptoUnit::Eth => "ETH",
        }
    }

    /// All supported units, in a fixed order.
    pub const ALL: [CryptoUnit; 2] = [CryptoUnit::Btc, CryptoUnit::Eth];
}

impl fmt::Display for CryptoUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CryptoUnit {
    type Err = UnknownUnit;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BTC" => Ok(CryptoUnit::Btc),
            "ETH" => Ok(CryptoUnit::Eth),
            _ => Err(UnknownUnit(s.to_string())),
        }
    }
}

/// Error for a ticker symbol outside [`CryptoUnit::ALL`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown crypto unit: {0}")]
pub struct UnknownUnit(pub String);

/// Round a fiat amount to [`FIAT_DECIMALS`].
pub fn round_fiat(value: f64) -> f64 {
    round_dp(value, FIAT_DECIMALS)
}

/// Truncate a crypto amount to [`CRYPTO_DECIMALS`].
///
/// Truncation (not rounding) so a conversion never credits more crypto than
/// the fiat stake paid for.
pub fn trunc_crypto(value: f64) -> f64 {
    let factor = 10f64.powi(CRYPTO_DECIMALS as i32);
    (value * factor).floor() / factor
}

/// Round a multiplier to two decimals, as published to clients.
pub fn round_multiplier(value: f64) -> f64 {
    round_dp(value, 2)
}

fn round_dp(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Current fiat price per unit, as returned by the price oracle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceTable(BTreeMap<CryptoUnit, f64>);

impl PriceTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fiat price for a unit.
    pub fn set(&mut self, unit: CryptoUnit, price: f64) {
        self.0.insert(unit, price);
    }

    /// Fiat price for a unit, if the oracle reported one.
    pub fn price(&self, unit: CryptoUnit) -> Option<f64> {
        self.0.get(&unit).copied()
    }

    /// Iterate over (unit, price) pairs in unit order.
    pub fn iter(&self) -> impl Iterator<Item = (CryptoUnit, f64)> + '_ {
        self.0.iter().map(|(u, p)| (*u, *p))
    }
}

impl FromIterator<(CryptoUnit, f64)> for PriceTable {
    fn from_iter<I: IntoIterator<Item = (CryptoUnit, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_roundtrip() {
        for unit in CryptoUnit::ALL {
            assert_eq!(unit.as_str().parse::<CryptoUnit>().unwrap(), unit);
        }
        assert!("DOGE".parse::<CryptoUnit>().is_err());
    }

    #[test]
    fn test_unit_serde_uses_ticker() {
        let json = serde_json::to_string(&CryptoUnit::Btc).unwrap();
        assert_eq!(json, "\"BTC\"");
        let parsed: CryptoUnit = serde_json::from_str("\"ETH\"").unwrap();
        assert_eq!(parsed, CryptoUnit::Eth);
    }

    #[test]
    fn test_fiat_rounding() {
        assert_eq!(round_fiat(300.004), 300.0);
        assert_eq!(round_fiat(0.125), 0.13);
        assert_eq!(round_fiat(0.1 + 0.2), 0.3);
    }

    #[test]
    fn test_crypto_truncation() {
        // $100 at $50,000/unit converts to exactly 0.00200000.
        assert_eq!(trunc_crypto(100.0 / 50_000.0), 0.002);
        // Truncation never rounds up.
        assert_eq!(trunc_crypto(0.000_000_019), 0.000_000_01);
    }

    #[test]
    fn test_multiplier_rounding() {
        assert_eq!(round_multiplier(1.004_999), 1.0);
        assert_eq!(round_multiplier(2.718_281_828), 2.72);
        assert_eq!(round_multiplier(1.0 / 3.0), 0.33);
    }

    #[test]
    fn test_price_table_lookup() {
        let table: PriceTable = [(CryptoUnit::Btc, 50_000.0)].into_iter().collect();
        assert_eq!(table.price(CryptoUnit::Btc), Some(50_000.0));
        assert_eq!(table.price(CryptoUnit::Eth), None);
    }
}
