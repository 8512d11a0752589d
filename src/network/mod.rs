//! Network Layer
//!
//! WebSocket server for real-time player connections. This layer only
//! routes messages; every balance mutation runs through `game/`.

pub mod auth;
pub mod protocol;
pub mod server;

pub use auth::{validate_token, AuthConfig, AuthError, TokenClaims};
pub use protocol::{ClientMessage, ErrorCode, ServerMessage};
pub use server::{GameServer, GameServerError, ServerConfig};
