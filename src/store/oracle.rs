//! Price Oracle Boundary
//!
//! The core never guesses a price: any oracle failure surfaces as "prices
//! unavailable" and blocks wager placement and cashout. Caching and
//! fallback policy live entirely inside the oracle implementation and are
//! invisible behind this contract.

use std::future::Future;

use thiserror::Error;
use tracing::debug;

use crate::core::money::{CryptoUnit, PriceTable};

/// Errors from the price oracle.
#[derive(Debug, Error)]
pub enum OracleError {
    /// The price feed could not be reached.
    #[error("price feed unavailable: {0}")]
    Unavailable(String),

    /// The feed answered but had no price for a unit.
    #[error("no price for {0}")]
    MissingPrice(CryptoUnit),
}

/// Current fiat prices for the supported crypto units.
pub trait PriceOracle: Send + Sync + 'static {
    /// Fetch the current price table.
    fn prices(&self) -> impl Future<Output = Result<PriceTable, OracleError>> + Send;
}

/// Fixed-price oracle for single-instance deployments, demos and tests.
#[derive(Debug, Clone)]
pub struct StaticOracle {
    table: PriceTable,
}

impl StaticOracle {
    /// Oracle answering with the given table.
    pub fn new(table: PriceTable) -> Self {
        Self { table }
    }

    /// Default demo prices.
    pub fn with_defaults() -> Self {
        Self::new(
            [(CryptoUnit::Btc, 60_000.0), (CryptoUnit::Eth, 3_000.0)]
                .into_iter()
                .collect(),
        )
    }

    /// Build from a `PRICE_TABLE` env var of the form `BTC=60000,ETH=3000`.
    /// Unset or unparseable entries fall back to the defaults.
    pub fn from_env() -> Self {
        let Ok(raw) = std::env::var("PRICE_TABLE") else {
            return Self::with_defaults();
        };
        let mut oracle = Self::with_defaults();
        for pair in raw.split(',') {
            let Some((unit, price)) = pair.split_once('=') else {
                debug!("ignoring malformed PRICE_TABLE entry {pair:?}");
                continue;
            };
            match (unit.trim().parse::<CryptoUnit>(), price.trim().parse::<f64>()) {
                (Ok(unit), Ok(price)) => oracle.table.set(unit, price),
                _ => debug!("ignoring malformed PRICE_TABLE entry {pair:?}"),
            }
        }
        oracle
    }
}

impl PriceOracle for StaticOracle {
    async fn prices(&self) -> Result<PriceTable, OracleError> {
        Ok(self.table.clone())
    }
}
