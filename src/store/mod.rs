//! External Store Boundaries
//!
//! Narrow interfaces to the three external collaborators the game core
//! depends on, each with an in-process implementation so a single-instance
//! deployment (and the test suite) runs without infrastructure:
//! - `shared`: replicated round state + auto-cashout registry
//! - `persist`: document store with multi-record transactions
//! - `oracle`: fiat price feed for the supported crypto units

pub mod oracle;
pub mod persist;
pub mod shared;
