//! Game Logic Layer
//!
//! The round lifecycle and the financial operations built on it: the
//! scheduler drives rounds, the wager ledger executes stakes and payouts
//! atomically, the event bus fans state changes out to connected clients.

pub mod autocash;
pub mod error;
pub mod events;
pub mod ledger;
pub mod scheduler;
pub mod types;
