//! Deterministic Core Primitives
//!
//! Pure, side-effect-free building blocks:
//! - `fairness`: provably-fair crash point derivation
//! - `money`: fiat/crypto precision rules and price tables
//!
//! Nothing in this module touches the network, the clock, or a store.

pub mod fairness;
pub mod money;
