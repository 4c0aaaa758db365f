//! Room access token claims and validation helpers.
//!
//! Conclave does not issue tokens. An external service mints short-lived
//! HS256 tokens that grant one peer access to one room; this module holds the
//! claim shape both sides agree on plus the checks that run before and after
//! signature verification.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - The `sub` field is redacted in Debug output
//! - Error messages are generic; details go to debug logs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Maximum allowed JWT size in bytes (8KB).
///
/// Typical room tokens are 200-400 bytes. Anything over this limit is
/// rejected before base64 decoding or HMAC verification.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default clock skew tolerance for the `iat` claim.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Errors raised by the pre/post verification checks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The room token is invalid or expired")]
    TokenTooLarge,

    /// Token `iat` claim is too far in the future.
    #[error("The room token is invalid or expired")]
    IatTooFarInFuture,
}

/// Claims carried by a room access token.
///
/// - `sub`: peer id the token was minted for
/// - `room`: room id the peer may join
/// - `exp` / `iat`: Unix epoch seconds
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomClaims {
    /// Peer identifier - redacted in Debug output.
    pub sub: String,

    /// Room the token grants access to.
    pub room: String,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,
}

impl fmt::Debug for RoomClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomClaims")
            .field("sub", &"[REDACTED]")
            .field("room", &self.room)
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .finish()
    }
}

impl RoomClaims {
    /// Creates claims for `sub` in `room`, issued at `iat` and valid for `ttl`.
    #[must_use]
    pub fn new(sub: impl Into<String>, room: impl Into<String>, iat: i64, ttl: Duration) -> Self {
        #[allow(clippy::cast_possible_wrap)]
        let ttl_secs = ttl.as_secs() as i64;
        Self {
            sub: sub.into(),
            room: room.into(),
            exp: iat + ttl_secs,
            iat,
        }
    }
}

/// Reject oversized tokens before any parsing happens.
///
/// # Errors
///
/// Returns `JwtValidationError::TokenTooLarge` if `token` exceeds
/// [`MAX_JWT_SIZE_BYTES`].
pub fn check_token_size(token: &str) -> Result<(), JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }
    Ok(())
}

/// Validate the `iat` claim against the current wall clock.
///
/// # Errors
///
/// Returns `JwtValidationError::IatTooFarInFuture` if `iat` is more than
/// `clock_skew` in the future.
pub fn validate_iat(iat: i64, clock_skew: Duration) -> Result<(), JwtValidationError> {
    let now = chrono::Utc::now().timestamp();
    validate_iat_at(iat, clock_skew, now)
}

/// Deterministic `iat` validation against an explicit `now` timestamp.
pub(crate) fn validate_iat_at(
    iat: i64,
    clock_skew: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;
    let max_iat = now + clock_skew_secs;

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_check_token_size_accepts_normal_token() {
        let token = "a".repeat(400);
        assert!(check_token_size(&token).is_ok());
    }

    #[test]
    fn test_check_token_size_rejects_oversized_token() {
        let token = "a".repeat(MAX_JWT_SIZE_BYTES + 1);
        assert_eq!(
            check_token_size(&token),
            Err(JwtValidationError::TokenTooLarge)
        );
    }

    #[test]
    fn test_validate_iat_at_boundary() {
        let now = 1_700_000_000;
        let skew = Duration::from_secs(300);

        assert!(validate_iat_at(now, skew, now).is_ok());
        assert!(validate_iat_at(now + 300, skew, now).is_ok());
        assert_eq!(
            validate_iat_at(now + 301, skew, now),
            Err(JwtValidationError::IatTooFarInFuture)
        );
    }

    #[test]
    fn test_room_claims_new_computes_expiry() {
        let claims = RoomClaims::new("alice", "lobby", 1_000, Duration::from_secs(60));
        assert_eq!(claims.exp, 1_060);
        assert_eq!(claims.room, "lobby");
    }

    #[test]
    fn test_room_claims_debug_redacts_sub() {
        let claims = RoomClaims::new("alice-secret-id", "lobby", 0, Duration::from_secs(1));
        let debug = format!("{claims:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("alice-secret-id"));
    }

    #[test]
    fn test_room_claims_serde_field_names() {
        let claims = RoomClaims::new("alice", "lobby", 10, Duration::from_secs(5));
        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["sub"], "alice");
        assert_eq!(json["room"], "lobby");
        assert_eq!(json["exp"], 15);
    }
}
