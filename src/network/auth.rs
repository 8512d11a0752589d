//! JWT Authentication
//!
//! Validates bearer tokens issued by an external identity provider. This
//! server never mints tokens; a connection is anonymous until its first
//! `auth` message carries a token that verifies.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::game::types::UserId;

/// Token validation settings.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Required issuer claim; `None` accepts any issuer.
    pub issuer: Option<String>,
    /// Required audience claim; `None` accepts any audience.
    pub audience: Option<String>,
    /// RS256 public key, PEM encoded.
    pub public_key_pem: Option<String>,
    /// HS256 shared secret, used when no public key is set.
    pub secret: Option<String>,
    /// Skip expiry checks. Test setups only.
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Read the configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            issuer: std::env::var("AUTH_ISSUER").ok(),
            audience: std::env::var("AUTH_AUDIENCE").ok(),
            public_key_pem: std::env::var("AUTH_PUBLIC_KEY_PEM").ok(),
            secret: std::env::var("AUTH_SECRET").ok(),
            skip_expiry: std::env::var("AUTH_SKIP_EXPIRY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// Whether any verification key material is present.
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }
}

/// Claims extracted from a verified token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Provider-assigned user identifier.
    pub sub: String,
    /// Optional display name claim.
    #[serde(default)]
    pub name: Option<String>,
    /// Expiry, Unix seconds.
    #[serde(default)]
    pub exp: u64,
    /// Issued-at, Unix seconds.
    #[serde(default)]
    pub iat: u64,
    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,
    /// Audience, string or array per the provider.
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
}

impl TokenClaims {
    /// The account key for this token. Accounts are keyed directly by the
    /// provider's subject claim.
    pub fn user_id(&self) -> UserId {
        UserId::new(self.sub.clone())
    }
}

/// Token validation failures.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Server has no verification key configured.
    #[error("authentication not configured")]
    NotConfigured,
    /// Not a structurally valid JWT.
    #[error("invalid token format")]
    InvalidFormat,
    /// Signature did not verify.
    #[error("invalid signature")]
    InvalidSignature,
    /// Token is past its expiry.
    #[error("token expired")]
    Expired,
    /// Issuer claim mismatch.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// Audience claim mismatch.
    #[error("invalid audience")]
    InvalidAudience,
    /// A required claim is absent.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// Any other decode failure.
    #[error("decode error: {0}")]
    DecodeError(String),
}

/// Verify a token and return its claims.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<TokenClaims, AuthError> {
    if !config.is_configured() {
        return Err(AuthError::NotConfigured);
    }

    let algorithm = if config.public_key_pem.is_some() {
        Algorithm::RS256
    } else {
        Algorithm::HS256
    };

    let mut validation = Validation::new(algorithm);
    validation.required_spec_claims = std::collections::HashSet::new();
    if let Some(ref issuer) = config.issuer {
        validation.set_issuer(&[issuer]);
    }
    if let Some(ref audience) = config.audience {
        validation.set_audience(&[audience]);
    } else {
        validation.validate_aud = false;
    }
    if config.skip_expiry {
        validation.validate_exp = false;
    }

    let token_data: TokenData<TokenClaims> = if let Some(ref pem) = config.public_key_pem {
        let key = DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| AuthError::DecodeError(format!("invalid public key: {}", e)))?;
        decode(token, &key, &validation).map_err(map_jwt_error)?
    } else if let Some(ref secret) = config.secret {
        let key = DecodingKey::from_secret(secret.as_bytes());
        decode(token, &key, &validation).map_err(map_jwt_error)?
    } else {
        return Err(AuthError::NotConfigured);
    };

    let claims = token_data.claims;
    if claims.sub.is_empty() {
        return Err(AuthError::MissingClaim("sub".into()));
    }

    // Some providers omit exp from required_spec_claims; re-check here.
    if !config.skip_expiry && claims.exp > 0 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if now > claims.exp {
            return Err(AuthError::Expired);
        }
    }

    Ok(claims)
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        ErrorKind::InvalidAudience => AuthError::InvalidAudience,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => AuthError::InvalidFormat,
        _ => AuthError::DecodeError(err.to_string()),
    }
}

// =============================================================================
// TESTS
// =============================================================================
