//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket. Every
//! frame is a JSON object tagged with a `type` field.

use serde::{Deserialize, Serialize};

use crate::core::money::CryptoUnit;
use crate::game::error::GameError;
use crate::game::events::GameEvent;
use crate::game::types::{Round, RoundPhase};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate the connection.
    Auth(AuthRequest),

    /// Place a wager in the current betting window.
    PlaceWager(PlaceWagerRequest),

    /// Cash out the active wager at the current multiplier.
    Cashout,

    /// Request the wallet snapshot with fiat valuation.
    Wallet,

    /// Request recent crashed rounds for verification.
    History,

    /// Ping for latency measurement.
    Ping {
        /// Client clock at send time, echoed back in the pong.
        timestamp: u64,
    },
}

/// Authentication request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Bearer token from the identity provider.
    pub token: String,
}

/// Wager placement request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceWagerRequest {
    /// Stake in fiat.
    pub amount_fiat: f64,
    /// Crypto unit the stake converts into.
    pub unit: CryptoUnit,
    /// Optional multiplier at which to cash out automatically.
    #[serde(default)]
    pub auto_cashout: Option<f64>,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication result.
    AuthResult(AuthResult),

    /// Wager accepted and recorded.
    WagerAccepted(WagerAccepted),

    /// Cashout executed.
    CashoutResult(CashoutResult),

    /// Wallet snapshot.
    Wallet(WalletInfo),

    /// Recent round history.
    History {
        /// Crashed rounds, newest first.
        rounds: Vec<RoundSummary>,
    },

    /// Broadcast game event (round lifecycle, ticks, cashouts).
    Event(GameEvent),

    /// Pong reply.
    Pong {
        /// Timestamp echoed from the ping.
        timestamp: u64,
        /// Server clock at reply time, milliseconds since the epoch.
        server_time: u64,
    },

    /// Request failed.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Human-readable shutdown reason.
        reason: String,
    },
}

/// Authentication result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResult {
    /// Whether auth succeeded.
    pub success: bool,
    /// Display name of the authenticated account.
    pub username: Option<String>,
    /// Error message if failed.
    pub error: Option<String>,
    /// Server version.
    pub server_version: String,
}

/// Confirmation of a recorded wager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WagerAccepted {
    /// Round the wager belongs to.
    pub round_id: String,
    /// Fiat stake taken.
    pub amount_fiat: f64,
    /// Crypto amount credited at the conversion price.
    pub amount_crypto: f64,
    /// Crypto unit.
    pub unit: CryptoUnit,
    /// Registered auto-cashout trigger, if any.
    pub auto_cashout: Option<f64>,
}

/// Result of a cashout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashoutResult {
    /// Multiplier the payout used.
    pub multiplier: f64,
    /// Fiat winnings credited.
    pub winnings_fiat: f64,
}

/// Wallet snapshot with total fiat valuation at current prices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletInfo {
    /// Fiat balance.
    pub fiat: f64,
    /// Crypto balances with per-unit valuation.
    pub crypto: Vec<CryptoHolding>,
    /// Fiat plus all crypto valued at current prices.
    pub total_fiat_value: f64,
}

/// One crypto position inside a wallet snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoHolding {
    /// Crypto unit.
    pub unit: CryptoUnit,
    /// Balance in crypto units.
    pub balance: f64,
    /// Balance valued in fiat at the current price.
    pub fiat_value: f64,
}

/// A finished round, with the inputs needed to re-derive its crash point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSummary {
    /// Round identifier.
    pub round_id: String,
    /// Seed the crash point was committed with.
    pub server_seed: String,
    /// The crash multiplier.
    pub crash_multiplier: f64,
    /// When the round was created, Unix milliseconds.
    pub created_at_ms: i64,
}

impl RoundSummary {
    /// Summarize a crashed round for the history response.
    pub fn from_round(round: &Round) -> Self {
        debug_assert_eq!(round.phase, RoundPhase::Crashed);
        Self {
            round_id: round.id.to_string(),
            server_seed: round.server_seed.clone(),
            crash_multiplier: round.crash_multiplier,
            created_at_ms: round.created_at.timestamp_millis(),
        }
    }
}

/// Server error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Authentication failed.
    AuthFailed,
    /// Request requires authentication.
    NotAuthenticated,
    /// JWT token has expired.
    TokenExpired,
    /// Invalid JWT token (signature, format, claims).
    InvalidToken,
    /// Stake below the minimum.
    InvalidStake,
    /// Auto-cashout trigger below the minimum.
    InvalidAutoCashout,
    /// No betting window is open.
    BettingClosed,
    /// No round is running.
    NotRunning,
    /// No active wager to cash out.
    NoActiveWager,
    /// A wager already exists for this round.
    AlreadyWagered,
    /// Insufficient balance for the stake.
    InsufficientBalance,
    /// Conversion prices are unavailable.
    PricesUnavailable,
    /// Balance store is unavailable.
    StoreUnavailable,
    /// Malformed or unexpected message.
    InvalidMessage,
    /// Internal error.
    InternalError,
}

impl From<&GameError> for ErrorCode {
    fn from(err: &GameError) -> Self {
        match err {
            GameError::StakeTooSmall(_) => ErrorCode::InvalidStake,
            GameError::AutoCashoutTooLow(_) => ErrorCode::InvalidAutoCashout,
            GameError::BettingClosed => ErrorCode::BettingClosed,
            GameError::NotRunning => ErrorCode::NotRunning,
            GameError::NoActiveWager => ErrorCode::NoActiveWager,
            GameError::AlreadyWagered => ErrorCode::AlreadyWagered,
            GameError::InsufficientBalance => ErrorCode::InsufficientBalance,
            GameError::UnknownAccount(_) => ErrorCode::AuthFailed,
            GameError::PricesUnavailable(_) => ErrorCode::PricesUnavailable,
            GameError::State(_) | GameError::Store(_) => ErrorCode::StoreUnavailable,
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_place_wager_wire_format() {
        let json = r#"{"type":"place_wager","amount_fiat":100.0,"unit":"BTC","auto_cashout":2.0}"#;
        let msg = ClientMessage::from_json(json).unwrap();
        match msg {
            ClientMessage::PlaceWager(req) => {
                assert_eq!(req.amount_fiat, 100.0);
                assert_eq!(req.unit, CryptoUnit::Btc);
                assert_eq!(req.auto_cashout, Some(2.0));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_auto_cashout_defaults_to_none() {
        let json = r#"{"type":"place_wager","amount_fiat":5.0,"unit":"ETH"}"#;
        let msg = ClientMessage::from_json(json).unwrap();
        match msg {
            ClientMessage::PlaceWager(req) => assert_eq!(req.auto_cashout, None),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_unit_variants_roundtrip() {
        for unit in CryptoUnit::ALL {
            let msg = ClientMessage::PlaceWager(PlaceWagerRequest {
                amount_fiat: 10.0,
                unit,
                auto_cashout: None,
            });
            let json = msg.to_json().unwrap();
            let parsed = ClientMessage::from_json(&json).unwrap();
            match parsed {
                ClientMessage::PlaceWager(req) => assert_eq!(req.unit, unit),
                other => panic!("wrong variant: {other:?}"),
            }
        }
    }

    #[test]
    fn test_event_wraps_game_event() {
        let msg = ServerMessage::Event(GameEvent::MultiplierTick { multiplier: 1.42 });
        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""type":"event""#));
        assert!(json.contains(r#""event":"multiplier_tick""#));
        assert!(json.contains("1.42"));
    }

    #[test]
    fn test_error_codes_snake_cased() {
        let msg = ServerMessage::Error(ServerError {
            code: ErrorCode::BettingClosed,
            message: "betting window closed".to_string(),
        });
        let json = msg.to_json().unwrap();
        assert!(json.contains("betting_closed"));
    }

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            ErrorCode::from(&GameError::InsufficientBalance),
            ErrorCode::InsufficientBalance
        );
        assert_eq!(
            ErrorCode::from(&GameError::StakeTooSmall(1.0)),
            ErrorCode::InvalidStake
        );
        assert_eq!(
            ErrorCode::from(&GameError::NoActiveWager),
            ErrorCode::NoActiveWager
        );
    }

    #[test]
    fn test_malformed_message_rejected() {
        assert!(ClientMessage::from_json("{}").is_err());
        assert!(ClientMessage::from_json("not json").is_err());
        assert!(ClientMessage::from_json(r#"{"type":"launch_missiles"}"#).is_err());
    }
}
