//! Persistent Store Boundary
//!
//! Interface to the document store holding accounts, rounds, wagers and the
//! audit ledger. The wager ledger opens a [`StoreSession`] for every
//! financial mutation: the balance write, the wager record and the audit
//! entry either all become visible or none do. Uniqueness (one wager per
//! user and round, one ledger entry per reference token) is enforced here.
//!
//! [`MemoryStore`] is the single-instance implementation: a session takes
//! the table lock for its duration (serializing concurrent transactions,
//! which is what a document store's transaction conflict detection buys)
//! and snapshots the tables at `begin` so `rollback` can restore them.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::game::types::{
    LedgerEntry, Round, RoundId, RoundPhase, UserAccount, UserId, Wager, WagerStatus, Wallet,
};

/// Errors from the persistent store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A wager for this user and round already exists.
    #[error("a wager already exists for this user and round")]
    DuplicateWager,

    /// A ledger entry with this reference token already exists.
    #[error("duplicate ledger reference: {0}")]
    DuplicateReference(String),

    /// No wager with status `placed` matched the update.
    #[error("wager is not active")]
    WagerNotActive,

    /// Round id not found.
    #[error("round not found: {0}")]
    RoundNotFound(RoundId),
}

/// An open multi-record transaction. Dropping a session without calling
/// [`commit`](Self::commit) must leave the store as if it never began.
pub trait StoreSession: Send {
    /// Read an account inside the transaction.
    fn account(
        &mut self,
        user: &UserId,
    ) -> impl Future<Output = Result<Option<UserAccount>, StoreError>> + Send;

    /// Write a user's wallet.
    fn update_wallet(
        &mut self,
        user: &UserId,
        wallet: Wallet,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Insert a wager; fails with [`StoreError::DuplicateWager`] if one
    /// already exists for this user and round.
    fn insert_wager(&mut self, wager: Wager)
        -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Find this user's wager in a round, only if its status is `placed`.
    fn placed_wager(
        &mut self,
        user: &UserId,
        round: RoundId,
    ) -> impl Future<Output = Result<Option<Wager>, StoreError>> + Send;

    /// Mark a `placed` wager as cashed out at the given multiplier.
    /// Status-guarded: fails with [`StoreError::WagerNotActive`] otherwise.
    fn settle_cashout(
        &mut self,
        user: &UserId,
        round: RoundId,
        multiplier: f64,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Append an audit entry; the reference token must be unique.
    fn append_ledger(
        &mut self,
        entry: LedgerEntry,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Make every write in this session visible atomically.
    fn commit(self) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Discard every write in this session.
    fn rollback(self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Collection-level operations plus transaction entry point.
pub trait GameStore: Send + Sync + 'static {
    /// Session type for atomic financial mutations.
    type Session: StoreSession;

    /// Open a transaction.
    fn begin(&self) -> impl Future<Output = Result<Self::Session, StoreError>> + Send;

    /// Persist a new round (commits the seed before betting opens).
    fn insert_round(&self, round: &Round)
        -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Mark a round crashed in history.
    fn mark_round_crashed(
        &self,
        round: RoundId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Bulk conditional update: every `placed` wager in the round becomes
    /// `lost`, with no balance mutation. Returns the number settled;
    /// naturally idempotent.
    fn settle_lost_wagers(
        &self,
        round: RoundId,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Most recent crashed rounds, newest first.
    fn round_history(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Round>, StoreError>> + Send;

    /// Read an account outside a transaction.
    fn account(
        &self,
        user: &UserId,
    ) -> impl Future<Output = Result<Option<UserAccount>, StoreError>> + Send;

    /// Create or replace an account (startup seeding, tests).
    fn upsert_account(
        &self,
        account: UserAccount,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Read a wager outside a transaction (queries, tests).
    fn wager(
        &self,
        user: &UserId,
        round: RoundId,
    ) -> impl Future<Output = Result<Option<Wager>, StoreError>> + Send;

    /// All ledger entries for a user, oldest first.
    fn ledger_entries(
        &self,
        user: &UserId,
    ) -> impl Future<Output = Result<Vec<LedgerEntry>, StoreError>> + Send;
}

// =============================================================================
// IN-MEMORY IMPLEMENTATION
// =============================================================================

#[derive(Default, Clone)]
struct Tables {
    accounts: std::collections::BTreeMap<UserId, UserAccount>,
    rounds: Vec<Round>,
    wagers: std::collections::BTreeMap<(UserId, RoundId), Wager>,
    ledger: Vec<LedgerEntry>,
}

/// In-process [`GameStore`] for single-instance deployments and tests.
#[derive(Default, Clone)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Session over [`MemoryStore`]: holds the table lock and a snapshot taken
/// at `begin`, restored on rollback or drop. `commit` clears the snapshot
/// so releasing the lock publishes the writes.
pub struct MemorySession {
    guard: OwnedMutexGuard<Tables>,
    snapshot: Option<Tables>,
}

impl StoreSession for MemorySession {
    async fn account(&mut self, user: &UserId) -> Result<Option<UserAccount>, StoreError> {
        Ok(self.guard.accounts.get(user).cloned())
    }

    async fn update_wallet(&mut self, user: &UserId, wallet: Wallet) -> Result<(), StoreError> {
        if let Some(account) = self.guard.accounts.get_mut(user) {
            account.wallet = wallet;
        }
        Ok(())
    }

    async fn insert_wager(&mut self, wager: Wager) -> Result<(), StoreError> {
        let key = (wager.user.clone(), wager.round);
        if self.guard.wagers.contains_key(&key) {
            return Err(StoreError::DuplicateWager);
        }
        self.guard.wagers.insert(key, wager);
        Ok(())
    }

    async fn placed_wager(
        &mut self,
        user: &UserId,
        round: RoundId,
    ) -> Result<Option<Wager>, StoreError> {
        Ok(self
            .guard
            .wagers
            .get(&(user.clone(), round))
            .filter(|w| w.status == WagerStatus::Placed)
            .cloned())
    }

    async fn settle_cashout(
        &mut self,
        user: &UserId,
        round: RoundId,
        multiplier: f64,
    ) -> Result<(), StoreError> {
        let wager = self
            .guard
            .wagers
            .get_mut(&(user.clone(), round))
            .filter(|w| w.status == WagerStatus::Placed)
            .ok_or(StoreError::WagerNotActive)?;
        wager.status = WagerStatus::CashedOut;
        wager.cashout_multiplier = Some(multiplier);
        Ok(())
    }

    async fn append_ledger(&mut self, entry: LedgerEntry) -> Result<(), StoreError> {
        if self.guard.ledger.iter().any(|e| e.reference == entry.reference) {
            return Err(StoreError::DuplicateReference(entry.reference));
        }
        self.guard.ledger.push(entry);
        Ok(())
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        // Writes were applied in place; dropping the snapshot keeps them.
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), StoreError> {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        // An uncommitted session restores the snapshot on the way out.
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

impl GameStore for MemoryStore {
    type Session = MemorySession;

    async fn begin(&self) -> Result<MemorySession, StoreError> {
        let guard = self.tables.clone().lock_owned().await;
        let snapshot = Some(guard.clone());
        Ok(MemorySession { guard, snapshot })
    }

    async fn insert_round(&self, round: &Round) -> Result<(), StoreError> {
        self.tables.lock().await.rounds.push(round.clone());
        Ok(())
    }

    async fn mark_round_crashed(&self, round: RoundId) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let record = tables
            .rounds
            .iter_mut()
            .find(|r| r.id == round)
            .ok_or(StoreError::RoundNotFound(round))?;
        record.phase = RoundPhase::Crashed;
        Ok(())
    }

    async fn settle_lost_wagers(&self, round: RoundId) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().await;
        let mut settled = 0;
        for ((_, wager_round), wager) in tables.wagers.iter_mut() {
            if *wager_round == round && wager.status == WagerStatus::Placed {
                wager.status = WagerStatus::Lost;
                settled += 1;
            }
        }
        Ok(settled)
    }

    async fn round_history(&self, limit: usize) -> Result<Vec<Round>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .rounds
            .iter()
            .rev()
            .filter(|r| r.phase == RoundPhase::Crashed)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn account(&self, user: &UserId) -> Result<Option<UserAccount>, StoreError> {
        Ok(self.tables.lock().await.accounts.get(user).cloned())
    }

    async fn upsert_account(&self, account: UserAccount) -> Result<(), StoreError> {
        self.tables
            .lock()
            .await
            .accounts
            .insert(account.id.clone(), account);
        Ok(())
    }

    async fn wager(&self, user: &UserId, round: RoundId) -> Result<Option<Wager>, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .wagers
            .get(&(user.clone(), round))
            .cloned())
    }

    async fn ledger_entries(&self, user: &UserId) -> Result<Vec<LedgerEntry>, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .ledger
            .iter()
            .filter(|e| &e.user == user)
            .cloned()
            .collect())
    }
}
