//! Round Scheduler
//!
//! Drives the perpetual round cycle:
//!
//! ```text
//! open (betting window) -> run (multiplier ticks) -> crash (settle) -> cooldown -> open ...
//! ```
//!
//! The crash multiplier is committed at round open, before any wager is
//! taken. During the run phase the published multiplier grows
//! exponentially with elapsed time and auto-cashouts are serviced on each
//! tick. A cycle error is logged and retried after a backoff; the loop
//! itself never exits.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::core::fairness::crash_multiplier;
use crate::core::money::round_multiplier;
use crate::game::autocash::AutoCashoutRegistry;
use crate::game::error::GameError;
use crate::game::events::{EventBus, GameEvent};
use crate::game::ledger::WagerLedger;
use crate::game::types::{Round, RoundId, RoundPhase};
use crate::store::oracle::PriceOracle;
use crate::store::persist::GameStore;
use crate::store::shared::{RoundSnapshot, SharedState};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Timing and fairness parameters for the round cycle.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Length of the betting window after a round opens.
    pub betting_window: Duration,
    /// Pause between a crash and the next round.
    pub cooldown: Duration,
    /// Interval between multiplier updates.
    pub tick_interval: Duration,
    /// Exponential growth rate per elapsed millisecond.
    pub growth_rate: f64,
    /// Backoff after a failed cycle before retrying.
    pub retry_backoff: Duration,
    /// Secret seed for the crash-point commitment.
    pub server_seed: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            betting_window: Duration::from_secs(4),
            cooldown: Duration::from_secs(6),
            tick_interval: Duration::from_millis(100),
            growth_rate: 0.000_06,
            retry_backoff: Duration::from_secs(10),
            server_seed: "dev-server-seed".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Build from environment, falling back to defaults.
    ///
    /// Reads `SERVER_SEED`. The timing parameters are fixed; deployments
    /// that need different pacing configure it in code.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(seed) = std::env::var("SERVER_SEED") {
            if !seed.is_empty() {
                config.server_seed = seed;
            }
        }
        config
    }
}

// =============================================================================
// SCHEDULER
// =============================================================================

/// Owns the round lifecycle. One instance runs per deployment; the other
/// server instances observe rounds through the shared store.
pub struct RoundScheduler<S, P, O> {
    config: SchedulerConfig,
    shared: Arc<S>,
    store: Arc<P>,
    ledger: Arc<WagerLedger<S, P, O>>,
    registry: AutoCashoutRegistry<S>,
    events: EventBus,
}

impl<S, P, O> RoundScheduler<S, P, O>
where
    S: SharedState,
    P: GameStore,
    O: PriceOracle,
{
    /// Wire the scheduler to its collaborators.
    pub fn new(
        config: SchedulerConfig,
        shared: Arc<S>,
        store: Arc<P>,
        ledger: Arc<WagerLedger<S, P, O>>,
        events: EventBus,
    ) -> Self {
        let registry = AutoCashoutRegistry::new(shared.clone());
        Self {
            config,
            shared,
            store,
            ledger,
            registry,
            events,
        }
    }

    /// Run rounds forever. Errors are retried after the configured
    /// backoff; the task only ends when the runtime shuts it down.
    pub async fn run(self) {
        info!(
            betting_window_ms = self.config.betting_window.as_millis() as u64,
            cooldown_ms = self.config.cooldown.as_millis() as u64,
            tick_ms = self.config.tick_interval.as_millis() as u64,
            "round scheduler started"
        );
        loop {
            if let Err(err) = self.run_cycle().await {
                error!(error = %err, "round cycle failed, backing off");
                tokio::time::sleep(self.config.retry_backoff).await;
            }
        }
    }

    /// One full round: open, betting window, run to crash, settle, cooldown.
    pub async fn run_cycle(&self) -> Result<(), GameError> {
        let round = self.open_round().await?;
        tokio::time::sleep(self.config.betting_window).await;
        self.run_round(&round).await?;
        self.settle_round(&round).await?;
        tokio::time::sleep(self.config.cooldown).await;
        Ok(())
    }

    /// Open a round: commit the crash point, persist the round record,
    /// publish the pending snapshot and announce the start time.
    async fn open_round(&self) -> Result<Round, GameError> {
        let id = RoundId::generate();
        let crash = crash_multiplier(&self.config.server_seed, &id.to_string());

        let round = Round {
            id,
            server_seed: self.config.server_seed.clone(),
            crash_multiplier: crash,
            phase: RoundPhase::Pending,
            created_at: chrono::Utc::now(),
        };
        self.store.insert_round(&round).await?;
        self.shared.write_round(&RoundSnapshot::opened(id, crash)).await?;

        let start_time_ms =
            chrono::Utc::now().timestamp_millis() as u64 + self.config.betting_window.as_millis() as u64;
        self.events.publish(GameEvent::RoundOpened {
            round_id: id,
            seed_hash: hex::encode(Sha256::digest(self.config.server_seed.as_bytes())),
            start_time_ms,
        });
        info!(round = %id, crash_multiplier = crash, "round opened");
        Ok(round)
    }

    /// Tick the multiplier from 1.00x until it reaches the committed
    /// crash point, publishing each value and servicing auto-cashouts.
    async fn run_round(&self, round: &Round) -> Result<(), GameError> {
        let started_at_ms = chrono::Utc::now().timestamp_millis() as u64;
        let snapshot = RoundSnapshot {
            round_id: round.id,
            phase: RoundPhase::Running,
            crash_multiplier: round.crash_multiplier,
            multiplier: 1.0,
            started_at_ms: Some(started_at_ms),
        };
        self.shared.write_round(&snapshot).await?;
        info!(round = %round.id, "round running");

        let started = Instant::now();
        let mut ticks = interval(self.config.tick_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticks.tick().await; // first tick completes immediately

        loop {
            ticks.tick().await;
            let elapsed_ms = started.elapsed().as_millis() as f64;
            let multiplier = round_multiplier((self.config.growth_rate * elapsed_ms).exp());

            if multiplier >= round.crash_multiplier {
                break;
            }

            self.shared.set_multiplier(multiplier).await?;
            self.events.publish(GameEvent::MultiplierTick { multiplier });
            self.process_auto_cashouts(multiplier).await;
        }
        Ok(())
    }

    /// Settle the crash: flip the phase, publish the committed crash
    /// value, resolve losing wagers and clear the auto-cashout registry.
    ///
    /// Guarded against double invocation: if the shared phase is already
    /// `crashed` the round was settled and this is a no-op.
    async fn settle_round(&self, round: &Round) -> Result<(), GameError> {
        let already = self
            .shared
            .read_round()
            .await?
            .map(|s| s.round_id == round.id && s.phase == RoundPhase::Crashed)
            .unwrap_or(false);
        if already {
            return Ok(());
        }

        self.shared.set_phase(RoundPhase::Crashed).await?;
        self.events.publish(GameEvent::RoundCrashed {
            multiplier: round.crash_multiplier,
        });
        info!(round = %round.id, crash_multiplier = round.crash_multiplier, "round crashed");

        // Persistence and cleanup failures must not wedge the cycle; they
        // are surfaced and the next round proceeds.
        if let Err(err) = self.store.mark_round_crashed(round.id).await {
            warn!(round = %round.id, error = %err, "failed to persist crash");
        }
        if let Err(err) = self.ledger.settle_losses(round.id).await {
            warn!(round = %round.id, error = %err, "failed to settle losses");
        }
        if let Err(err) = self.registry.clear().await {
            warn!(round = %round.id, error = %err, "failed to clear auto-cashouts");
        }
        Ok(())
    }

    /// Cash out every registration whose trigger the multiplier reached,
    /// in registration order, at exactly the trigger value.
    async fn process_auto_cashouts(&self, multiplier: f64) {
        let due = match self.registry.due(multiplier).await {
            Ok(due) => due,
            Err(err) => {
                warn!(error = %err, "failed to read auto-cashout registry");
                return;
            }
        };
        for entry in due {
            match self.ledger.cashout(&entry.user, Some(entry.trigger)).await {
                Ok(receipt) => {
                    info!(
                        user = %entry.user,
                        trigger = entry.trigger,
                        winnings_fiat = receipt.winnings_fiat,
                        "auto-cashout executed"
                    );
                }
                Err(err) => {
                    // Stale registration (manual cashout raced us) or a
                    // store hiccup; drop it either way.
                    warn!(user = %entry.user, error = %err, "auto-cashout failed");
                    if let Err(err) = self.registry.remove(&entry.user).await {
                        warn!(user = %entry.user, error = %err, "failed to drop registration");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::money::{CryptoUnit, PriceTable};
    use crate::game::types::{UserAccount, UserId, WagerStatus};
    use crate::store::oracle::StaticOracle;
    use crate::store::persist::MemoryStore;
    use crate::store::shared::MemorySharedState;

    struct Rig {
        shared: Arc<MemorySharedState>,
        store: Arc<MemoryStore>,
        ledger: Arc<WagerLedger<MemorySharedState, MemoryStore, StaticOracle>>,
        events: EventBus,
        scheduler: RoundScheduler<MemorySharedState, MemoryStore, StaticOracle>,
    }

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            betting_window: Duration::from_millis(30),
            cooldown: Duration::from_millis(1),
            tick_interval: Duration::from_millis(5),
            // Fast growth so rounds resolve in tens of milliseconds.
            growth_rate: 0.005,
            retry_backoff: Duration::from_millis(10),
            server_seed: "test-seed".to_string(),
        }
    }

    async fn rig(config: SchedulerConfig) -> Rig {
        let shared = Arc::new(MemorySharedState::new());
        let store = Arc::new(MemoryStore::new());
        let table: PriceTable = [(CryptoUnit::Btc, 50_000.0)].into_iter().collect();
        let oracle = Arc::new(StaticOracle::new(table));
        let events = EventBus::new(1024);
        let ledger = Arc::new(WagerLedger::new(
            shared.clone(),
            store.clone(),
            oracle,
            events.clone(),
        ));
        store
            .upsert_account(UserAccount::new(UserId::new("u1"), "alice", 1000.0))
            .await
            .unwrap();
        let scheduler = RoundScheduler::new(
            config,
            shared.clone(),
            store.clone(),
            ledger.clone(),
            events.clone(),
        );
        Rig {
            shared,
            store,
            ledger,
            events,
            scheduler,
        }
    }

    #[tokio::test]
    async fn test_cycle_emits_open_ticks_and_committed_crash() {
        let r = rig(fast_config()).await;
        let mut events = r.events.subscribe();

        r.scheduler.run_cycle().await.unwrap();

        let history = r.store.round_history(10).await.unwrap();
        assert_eq!(history.len(), 1);
        let round = &history[0];
        assert_eq!(round.phase, RoundPhase::Crashed);

        let mut opened = false;
        let mut last_tick = 0.0_f64;
        let mut crashed_at = None;
        while let Ok(event) = events.try_recv() {
            match event {
                GameEvent::RoundOpened {
                    round_id,
                    seed_hash,
                    ..
                } => {
                    assert_eq!(round_id, round.id);
                    assert_eq!(seed_hash.len(), 64);
                    opened = true;
                }
                GameEvent::MultiplierTick { multiplier } => {
                    // Ticks are monotonically non-decreasing and stay
                    // strictly below the committed crash point.
                    assert!(multiplier >= last_tick);
                    assert!(multiplier < round.crash_multiplier);
                    last_tick = multiplier;
                }
                GameEvent::RoundCrashed { multiplier } => {
                    crashed_at = Some(multiplier);
                }
                GameEvent::PlayerCashedOut { .. } => {}
            }
        }
        assert!(opened);
        // The crash event carries the committed value, not the last tick.
        assert_eq!(crashed_at, Some(round.crash_multiplier));
    }

    #[tokio::test]
    async fn test_settle_round_is_idempotent() {
        let r = rig(fast_config()).await;
        let round = r.scheduler.open_round().await.unwrap();
        r.ledger
            .place_wager(&UserId::new("u1"), 100.0, CryptoUnit::Btc, None)
            .await
            .unwrap();

        r.scheduler.run_round(&round).await.unwrap();
        r.scheduler.settle_round(&round).await.unwrap();
        let settled_once = r.store.round_history(10).await.unwrap().len();

        // Second settlement is a no-op: no duplicate events, no re-settle.
        let mut events = r.events.subscribe();
        r.scheduler.settle_round(&round).await.unwrap();
        assert!(events.try_recv().is_err());
        assert_eq!(r.store.round_history(10).await.unwrap().len(), settled_once);
    }

    #[tokio::test]
    async fn test_auto_cashout_pays_exact_trigger() {
        // Crash points vary per round id; cycle until one lands above
        // the trigger.
        let r = rig(fast_config()).await;
        let user = UserId::new("u1");

        for _ in 0..20 {
            let round = r.scheduler.open_round().await.unwrap();
            if round.crash_multiplier < 2.0 {
                // Too short for the trigger; settle and try the next one.
                tokio::time::sleep(Duration::from_millis(35)).await;
                r.scheduler.run_round(&round).await.unwrap();
                r.scheduler.settle_round(&round).await.unwrap();
                continue;
            }

            r.ledger
                .place_wager(&user, 100.0, CryptoUnit::Btc, Some(1.5))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(35)).await;
            r.scheduler.run_round(&round).await.unwrap();
            r.scheduler.settle_round(&round).await.unwrap();

            let wager = r.store.wager(&user, round.id).await.unwrap().unwrap();
            assert_eq!(wager.status, WagerStatus::CashedOut);
            assert_eq!(wager.cashout_multiplier, Some(1.5));
            let account = r.store.account(&user).await.unwrap().unwrap();
            // 1000 - 100 + 100 * 1.5
            assert_eq!(account.wallet.fiat, 1050.0);
            assert!(r.shared.auto_cashout_entries().await.unwrap().is_empty());
            return;
        }
        panic!("no round crashed above the trigger in 20 attempts");
    }

    #[tokio::test]
    async fn test_uncashed_wager_settles_as_loss() {
        let r = rig(fast_config()).await;
        let user = UserId::new("u1");

        let round = r.scheduler.open_round().await.unwrap();
        r.ledger
            .place_wager(&user, 100.0, CryptoUnit::Btc, None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(35)).await;
        r.scheduler.run_round(&round).await.unwrap();
        r.scheduler.settle_round(&round).await.unwrap();

        let wager = r.store.wager(&user, round.id).await.unwrap().unwrap();
        assert_eq!(wager.status, WagerStatus::Lost);
        let account = r.store.account(&user).await.unwrap().unwrap();
        // Stake stays debited; the crypto leg is forfeit with the loss.
        assert_eq!(account.wallet.fiat, 900.0);
    }
}
