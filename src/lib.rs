//! # Crypto Crash Server
//!
//! Authoritative server for a continuous multiplayer crash game with
//! provably fair crash points and an atomic wager ledger.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   CRYPTO CRASH SERVER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Pure primitives                           │
//! │  ├── fairness.rs - HMAC crash-point commitment               │
//! │  └── money.rs    - Rounding rules, units, price table        │
//! │                                                              │
//! │  game/           - Round lifecycle and financial logic       │
//! │  ├── types.rs    - Rounds, wagers, wallets, ledger entries   │
//! │  ├── scheduler.rs- Perpetual round cycle                     │
//! │  ├── ledger.rs   - Atomic wager placement and cashout        │
//! │  ├── autocash.rs - Auto-cashout registry view                │
//! │  └── events.rs   - Broadcast event bus                       │
//! │                                                              │
//! │  store/          - State boundaries (swappable backends)     │
//! │  ├── shared.rs   - Cross-instance round state                │
//! │  ├── persist.rs  - Accounts, wagers, rounds, audit ledger    │
//! │  └── oracle.rs   - Crypto price source                       │
//! │                                                              │
//! │  network/        - WebSocket transport                       │
//! │  ├── server.rs   - Connection handling and routing           │
//! │  ├── protocol.rs - Message types                             │
//! │  └── auth.rs     - JWT validation                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Fairness Guarantee
//!
//! Every round's crash multiplier is derived from
//! `HMAC-SHA256(server_seed, round_id)` and committed before the betting
//! window opens. The seed and round id are published with the round
//! history, so any player can re-derive the crash point and confirm the
//! outcome was never adjusted mid-round.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;
pub mod store;

// Re-export commonly used types
pub use core::fairness::{crash_multiplier, MAX_CRASH_MULTIPLIER, MIN_CRASH_MULTIPLIER};
pub use core::money::{CryptoUnit, PriceTable};
pub use game::events::{EventBus, GameEvent};
pub use game::ledger::{CashoutReceipt, WagerLedger};
pub use game::scheduler::{RoundScheduler, SchedulerConfig};
pub use game::types::{Round, RoundId, RoundPhase, UserAccount, UserId, Wager, WagerStatus};
pub use network::server::{GameServer, ServerConfig};
pub use store::oracle::StaticOracle;
pub use store::persist::MemoryStore;
pub use store::shared::MemorySharedState;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
