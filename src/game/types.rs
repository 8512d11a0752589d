//! Game Data Model
//!
//! Persisted record types for rounds, wagers, ledger entries and user
//! wallets. Wallets are mutated only inside a store session opened by the
//! wager ledger; everything else is append-only or transitions exactly once.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::money::{trunc_crypto, CryptoUnit};

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Unique user identifier, taken from the auth provider's subject claim.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    /// Create from any string-like id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique, externally displayable round identifier.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RoundId(pub Uuid);

impl RoundId {
    /// Generate a fresh round id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from the hyphenated string form.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// ROUND
// =============================================================================

/// Lifecycle phase of a round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    /// Betting window is open.
    Pending,
    /// Multiplier is climbing; cashouts allowed.
    Running,
    /// Round ended; remaining wagers settle as losses.
    Crashed,
}

impl RoundPhase {
    /// Stable string form, used in the shared-state record.
    pub fn as_str(self) -> &'static str {
        match self {
            RoundPhase::Pending => "pending",
            RoundPhase::Running => "running",
            RoundPhase::Crashed => "crashed",
        }
    }

    /// Parse the stable string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RoundPhase::Pending),
            "running" => Some(RoundPhase::Running),
            "crashed" => Some(RoundPhase::Crashed),
            _ => None,
        }
    }
}

/// One game cycle, persisted as history and never deleted.
///
/// The crash multiplier is computed from the committed seed at creation and
/// never recomputed; it is fixed before the phase ever reaches `Running`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Round {
    /// Public round identifier.
    pub id: RoundId,
    /// Secret seed, committed (persisted) before betting opens.
    pub server_seed: String,
    /// Pre-committed crash point.
    pub crash_multiplier: f64,
    /// Lifecycle phase.
    pub phase: RoundPhase,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// WAGER
// =============================================================================

/// Settlement state of a wager. Transitions exactly once out of `Placed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WagerStatus {
    /// Stake taken, outcome open.
    Placed,
    /// Cashed out before the crash.
    CashedOut,
    /// Still placed at crash time.
    Lost,
}

/// One player's stake in exactly one round (unique per user + round).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Wager {
    /// Owning user.
    pub user: UserId,
    /// Round the stake belongs to.
    pub round: RoundId,
    /// Fiat amount staked.
    pub amount_fiat: f64,
    /// Crypto equivalent, converted at placement time.
    pub amount_crypto: f64,
    /// Crypto unit the stake was converted into.
    pub unit: CryptoUnit,
    /// Optional auto-cashout trigger multiplier.
    pub auto_cashout: Option<f64>,
    /// Multiplier the wager settled at; `None` until settled.
    pub cashout_multiplier: Option<f64>,
    /// Settlement state.
    pub status: WagerStatus,
    /// Placement timestamp.
    pub placed_at: DateTime<Utc>,
}

// =============================================================================
// LEDGER
// =============================================================================

/// Direction of a ledger entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    /// Stake debit at wager placement.
    Bet,
    /// Winnings credit at cashout.
    Payout,
}

impl LedgerKind {
    /// Prefix used in reference tokens.
    pub fn as_str(self) -> &'static str {
        match self {
            LedgerKind::Bet => "bet",
            LedgerKind::Payout => "payout",
        }
    }
}

/// Immutable audit record of a balance movement. Append-only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// User whose balance moved.
    pub user: UserId,
    /// Debit or credit kind.
    pub kind: LedgerKind,
    /// Fiat amount moved.
    pub amount_fiat: f64,
    /// Crypto amount moved.
    pub amount_crypto: f64,
    /// Crypto unit involved.
    pub unit: CryptoUnit,
    /// Unique reference token, e.g. `bet-<uuid>`.
    pub reference: String,
    /// Entry timestamp.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Build an entry with a fresh unique reference token.
    pub fn record(
        user: UserId,
        kind: LedgerKind,
        amount_fiat: f64,
        amount_crypto: f64,
        unit: CryptoUnit,
    ) -> Self {
        Self {
            user,
            kind,
            amount_fiat,
            amount_crypto,
            unit,
            reference: format!("{}-{}", kind.as_str(), Uuid::new_v4()),
            created_at: Utc::now(),
        }
    }
}

// =============================================================================
// WALLET / ACCOUNT
// =============================================================================

/// Per-user wallet: one fiat balance plus a balance per crypto unit.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    /// Fiat balance.
    pub fiat: f64,
    /// Crypto balances by unit. Absent unit means zero.
    pub crypto: BTreeMap<CryptoUnit, f64>,
}

impl Wallet {
    /// Wallet holding only a fiat balance.
    pub fn with_fiat(fiat: f64) -> Self {
        Self {
            fiat,
            crypto: BTreeMap::new(),
        }
    }

    /// Balance for a crypto unit (zero if never credited).
    pub fn crypto_balance(&self, unit: CryptoUnit) -> f64 {
        self.crypto.get(&unit).copied().unwrap_or(0.0)
    }

    /// Credit a crypto amount, truncating to the configured precision.
    pub fn credit_crypto(&mut self, unit: CryptoUnit, amount: f64) {
        let balance = self.crypto.entry(unit).or_insert(0.0);
        *balance = trunc_crypto(*balance + amount);
    }

    /// Debit a crypto amount, truncating to the configured precision.
    pub fn debit_crypto(&mut self, unit: CryptoUnit, amount: f64) {
        let balance = self.crypto.entry(unit).or_insert(0.0);
        *balance = trunc_crypto(*balance - amount);
    }
}

/// A player account: identity plus wallet.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserAccount {
    /// Unique user id.
    pub id: UserId,
    /// Display name used in public cashout notifications.
    pub username: String,
    /// Balances.
    pub wallet: Wallet,
    /// Account creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl UserAccount {
    /// Create an account with the default starting fiat balance.
    pub fn new(id: UserId, username: impl Into<String>, starting_fiat: f64) -> Self {
        Self {
            id,
            username: username.into(),
            wallet: Wallet::with_fiat(starting_fiat),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_phase_roundtrip() {
        for phase in [RoundPhase::Pending, RoundPhase::Running, RoundPhase::Crashed] {
            assert_eq!(RoundPhase::parse(phase.as_str()), Some(phase));
        }
        assert_eq!(RoundPhase::parse("idle"), None);
    }

    #[test]
    fn test_round_id_display_parse() {
        let id = RoundId::generate();
        assert_eq!(RoundId::parse(&id.to_string()), Some(id));
        assert_eq!(RoundId::parse("not-a-uuid"), None);
    }

    #[test]
    fn test_wallet_crypto_precision() {
        let mut wallet = Wallet::with_fiat(1000.0);
        wallet.credit_crypto(CryptoUnit::Btc, 0.002);
        assert_eq!(wallet.crypto_balance(CryptoUnit::Btc), 0.002);
        wallet.debit_crypto(CryptoUnit::Btc, 0.002);
        assert_eq!(wallet.crypto_balance(CryptoUnit::Btc), 0.0);
        // Unknown unit reads as zero.
        assert_eq!(wallet.crypto_balance(CryptoUnit::Eth), 0.0);
    }

    #[test]
    fn test_ledger_reference_prefixes() {
        let entry = LedgerEntry::record(
            UserId::new("u1"),
            LedgerKind::Bet,
            100.0,
            0.002,
            CryptoUnit::Btc,
        );
        assert!(entry.reference.starts_with("bet-"));

        let payout = LedgerEntry::record(
            UserId::new("u1"),
            LedgerKind::Payout,
            300.0,
            0.006,
            CryptoUnit::Btc,
        );
        assert!(payout.reference.starts_with("payout-"));
        assert_ne!(entry.reference, payout.reference);
    }
}
