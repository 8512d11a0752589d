//! Game Error Taxonomy
//!
//! Four families, mapped to protocol error codes at the network boundary:
//! validation failures and phase-mismatch failures reject synchronously
//! with no state change; dependency-unavailable failures surface to the
//! caller of a wager/cashout attempt; any error raised inside an open
//! store session rolls the whole attempt back.

use thiserror::Error;

use crate::game::types::UserId;
use crate::store::oracle::OracleError;
use crate::store::persist::StoreError;
use crate::store::shared::StateError;

/// Failure of a wager ledger operation.
#[derive(Debug, Error)]
pub enum GameError {
    // --- validation ---
    /// Stake below the minimum.
    #[error("minimum stake is ${0:.2}")]
    StakeTooSmall(f64),

    /// Auto-cashout trigger at or below the minimum.
    #[error("auto cashout trigger must be greater than {0:.2}x")]
    AutoCashoutTooLow(f64),

    // --- phase mismatch ---
    /// Wager attempted outside the betting window.
    #[error("betting is closed for this round")]
    BettingClosed,

    /// Cashout attempted while no round is running.
    #[error("cannot cash out: game is not running")]
    NotRunning,

    /// No `placed` wager for this user in the current round.
    #[error("no active wager found for this round")]
    NoActiveWager,

    /// A wager for this user already exists in the current round.
    #[error("a wager was already placed for this round")]
    AlreadyWagered,

    /// Fiat balance below the stake.
    #[error("insufficient fiat balance")]
    InsufficientBalance,

    /// No account for the authenticated user.
    #[error("unknown account: {0}")]
    UnknownAccount(UserId),

    // --- dependency unavailable ---
    /// The price oracle failed or had no price for the unit.
    #[error("prices unavailable: {0}")]
    PricesUnavailable(#[from] OracleError),

    /// The shared state store failed.
    #[error(transparent)]
    State(#[from] StateError),

    /// The persistent store failed.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for GameError {
    fn from(err: StoreError) -> Self {
        match err {
            // Uniqueness and status guards are phase-level outcomes, not
            // infrastructure faults.
            StoreError::DuplicateWager => GameError::AlreadyWagered,
            StoreError::WagerNotActive => GameError::NoActiveWager,
            other => GameError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_guard_errors_become_phase_errors() {
        assert!(matches!(
            GameError::from(StoreError::DuplicateWager),
            GameError::AlreadyWagered
        ));
        assert!(matches!(
            GameError::from(StoreError::WagerNotActive),
            GameError::NoActiveWager
        ));
        assert!(matches!(
            GameError::from(StoreError::Unavailable("down".into())),
            GameError::Store(_)
        ));
    }
}
