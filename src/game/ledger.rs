//! Wager Ledger
//!
//! The two atomic financial operations of the game, each executed inside a
//! single store session spanning the balance mutation, the wager record and
//! the audit entry. Nothing else in the crate is permitted to mutate
//! balances or wager status. Preconditions are checked against
//! freshly-read state inside the session; any failure rolls the whole
//! attempt back, so a partial debit never persists.

use std::sync::Arc;

use tracing::{info, warn};

use crate::core::money::{
    round_fiat, trunc_crypto, CryptoUnit, MIN_AUTO_CASHOUT, MIN_STAKE_FIAT,
};
use crate::game::error::GameError;
use crate::game::events::{EventBus, GameEvent};
use crate::game::types::{
    LedgerEntry, LedgerKind, RoundId, RoundPhase, UserId, Wager, WagerStatus,
};
use crate::store::oracle::{OracleError, PriceOracle};
use crate::store::persist::{GameStore, StoreSession};
use crate::store::shared::SharedState;

/// Result of a successful cashout.
#[derive(Debug, Clone, PartialEq)]
pub struct CashoutReceipt {
    /// Multiplier the payout used.
    pub multiplier: f64,
    /// Fiat winnings credited.
    pub winnings_fiat: f64,
}

/// Executes the atomic financial operations against the balance store.
pub struct WagerLedger<S, P, O> {
    shared: Arc<S>,
    store: Arc<P>,
    oracle: Arc<O>,
    events: EventBus,
}

impl<S, P, O> WagerLedger<S, P, O>
where
    S: SharedState,
    P: GameStore,
    O: PriceOracle,
{
    /// Wire the ledger to its collaborators.
    pub fn new(shared: Arc<S>, store: Arc<P>, oracle: Arc<O>, events: EventBus) -> Self {
        Self {
            shared,
            store,
            oracle,
            events,
        }
    }

    /// Place a wager in the current betting window.
    ///
    /// Debits the fiat stake, credits the crypto equivalent at the current
    /// oracle price, records the wager and the `bet` audit entry, and
    /// registers the optional auto-cashout trigger. All-or-nothing.
    pub async fn place_wager(
        &self,
        user: &UserId,
        amount_fiat: f64,
        unit: CryptoUnit,
        auto_cashout: Option<f64>,
    ) -> Result<Wager, GameError> {
        if amount_fiat < MIN_STAKE_FIAT {
            return Err(GameError::StakeTooSmall(MIN_STAKE_FIAT));
        }
        if let Some(trigger) = auto_cashout {
            if trigger <= MIN_AUTO_CASHOUT {
                return Err(GameError::AutoCashoutTooLow(MIN_AUTO_CASHOUT));
            }
        }

        let mut session = self.store.begin().await?;
        let outcome = self
            .try_place(&mut session, user, amount_fiat, unit, auto_cashout)
            .await;

        let wager = match outcome {
            Ok(wager) => {
                // The registry lives in the shared store, outside the
                // transaction, so register before the commit: if the
                // registry is down the whole attempt rolls back, and if
                // the commit then fails the dangling registration is
                // harmless (the forced cashout finds no active wager).
                if let Some(trigger) = auto_cashout {
                    if let Err(err) = self.shared.register_auto_cashout(user, trigger).await {
                        warn!(user = %user, error = %err, "wager placement aborted");
                        session.rollback().await?;
                        return Err(err.into());
                    }
                }
                session.commit().await?;
                wager
            }
            Err(err) => {
                warn!(user = %user, error = %err, "wager placement aborted");
                session.rollback().await?;
                return Err(err);
            }
        };

        info!(
            user = %user,
            round = %wager.round,
            amount_fiat,
            amount_crypto = wager.amount_crypto,
            unit = %unit,
            "wager placed"
        );
        Ok(wager)
    }

    async fn try_place(
        &self,
        session: &mut P::Session,
        user: &UserId,
        amount_fiat: f64,
        unit: CryptoUnit,
        auto_cashout: Option<f64>,
    ) -> Result<Wager, GameError> {
        let round = self.current_round(RoundPhase::Pending).await?;

        let mut account = session
            .account(user)
            .await?
            .ok_or_else(|| GameError::UnknownAccount(user.clone()))?;
        if account.wallet.fiat < amount_fiat {
            return Err(GameError::InsufficientBalance);
        }

        let prices = self.oracle.prices().await?;
        let price = prices
            .price(unit)
            .ok_or(OracleError::MissingPrice(unit))?;
        let amount_crypto = trunc_crypto(amount_fiat / price);

        account.wallet.fiat = round_fiat(account.wallet.fiat - amount_fiat);
        account.wallet.credit_crypto(unit, amount_crypto);
        session.update_wallet(user, account.wallet).await?;

        let wager = Wager {
            user: user.clone(),
            round,
            amount_fiat,
            amount_crypto,
            unit,
            auto_cashout,
            cashout_multiplier: None,
            status: WagerStatus::Placed,
            placed_at: chrono::Utc::now(),
        };
        session.insert_wager(wager.clone()).await?;
        session
            .append_ledger(LedgerEntry::record(
                user.clone(),
                LedgerKind::Bet,
                amount_fiat,
                amount_crypto,
                unit,
            ))
            .await?;

        Ok(wager)
    }

    /// Cash a user out of their active wager.
    ///
    /// `forced_multiplier` is supplied by the auto-cashout path to pin the
    /// payout to the exact trigger value; manual cashouts use the live
    /// multiplier read from shared state at the instant of the call.
    pub async fn cashout(
        &self,
        user: &UserId,
        forced_multiplier: Option<f64>,
    ) -> Result<CashoutReceipt, GameError> {
        let snapshot = self
            .shared
            .read_round()
            .await?
            .filter(|s| s.phase == RoundPhase::Running)
            .ok_or(GameError::NotRunning)?;
        let multiplier = forced_multiplier.unwrap_or(snapshot.multiplier);
        let round = snapshot.round_id;

        let mut session = self.store.begin().await?;
        let outcome = self.try_cashout(&mut session, user, round, multiplier).await;

        let (receipt, username) = match outcome {
            Ok(done) => {
                session.commit().await?;
                done
            }
            Err(err) => {
                warn!(user = %user, error = %err, "cashout aborted");
                session.rollback().await?;
                return Err(err);
            }
        };

        if let Err(err) = self.shared.remove_auto_cashout(user).await {
            warn!(user = %user, error = %err, "failed to drop auto-cashout registration");
        }

        self.events.publish(GameEvent::PlayerCashedOut {
            username,
            multiplier: receipt.multiplier,
            winnings_fiat: receipt.winnings_fiat,
        });
        info!(
            user = %user,
            round = %round,
            multiplier = receipt.multiplier,
            winnings_fiat = receipt.winnings_fiat,
            "cashed out"
        );
        Ok(receipt)
    }

    async fn try_cashout(
        &self,
        session: &mut P::Session,
        user: &UserId,
        round: RoundId,
        multiplier: f64,
    ) -> Result<(CashoutReceipt, String), GameError> {
        let wager = session
            .placed_wager(user, round)
            .await?
            .ok_or(GameError::NoActiveWager)?;

        let prices = self.oracle.prices().await?;
        let price = prices
            .price(wager.unit)
            .ok_or(OracleError::MissingPrice(wager.unit))?;

        let winnings_crypto = wager.amount_crypto * multiplier;
        let winnings_fiat = round_fiat(winnings_crypto * price);

        let mut account = session
            .account(user)
            .await?
            .ok_or_else(|| GameError::UnknownAccount(user.clone()))?;
        account.wallet.debit_crypto(wager.unit, wager.amount_crypto);
        account.wallet.fiat = round_fiat(account.wallet.fiat + winnings_fiat);
        let username = account.username.clone();
        session.update_wallet(user, account.wallet).await?;

        session.settle_cashout(user, round, multiplier).await?;
        session
            .append_ledger(LedgerEntry::record(
                user.clone(),
                LedgerKind::Payout,
                winnings_fiat,
                winnings_crypto,
                wager.unit,
            ))
            .await?;

        Ok((
            CashoutReceipt {
                multiplier,
                winnings_fiat,
            },
            username,
        ))
    }

    /// Settle every remaining `placed` wager in a round as a loss.
    /// Bulk conditional update with no balance mutation; idempotent.
    pub async fn settle_losses(&self, round: RoundId) -> Result<u64, GameError> {
        let settled = self.store.settle_lost_wagers(round).await?;
        if settled > 0 {
            info!(round = %round, settled, "resolved losing wagers");
        }
        Ok(settled)
    }

    async fn current_round(&self, expected: RoundPhase) -> Result<RoundId, GameError> {
        let snapshot = self.shared.read_round().await?;
        match snapshot {
            Some(s) if s.phase == expected => Ok(s.round_id),
            _ => Err(match expected {
                RoundPhase::Pending => GameError::BettingClosed,
                _ => GameError::NotRunning,
            }),
        }
    }
}
