//! Join authorization.
//!
//! The session actor asks an [`Authorizer`] whether a peer may join a room
//! before it talks to the room actor. Token issuance happens elsewhere; this
//! module only verifies.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - Only HS256 is accepted
//! - Denial reasons sent to clients are generic; details go to debug logs

use async_trait::async_trait;
use common::jwt::{check_token_size, validate_iat, RoomClaims};
use common::secret::{ExposeSecret, SecretString};
use common::types::{PeerId, RoomId};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::time::Duration;
use tracing::instrument;

/// Generic reason returned for any token failure.
pub const INVALID_TOKEN_REASON: &str = "The room token is invalid or expired";

/// Outcome of an authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    Allow,
    /// Denied, with a client-safe reason.
    Deny(String),
}

impl AuthDecision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, AuthDecision::Allow)
    }
}

/// Decides whether `peer` may join `room` with `token`.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn validate(&self, token: &str, peer: &PeerId, room: &RoomId) -> AuthDecision;
}

/// Accepts every join. Development only.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn validate(&self, _token: &str, _peer: &PeerId, _room: &RoomId) -> AuthDecision {
        AuthDecision::Allow
    }
}

/// Verifies HS256 room tokens.
///
/// A token is accepted when its signature verifies, it has not expired, its
/// `iat` is not too far in the future, `sub` equals the joining peer id and
/// `room` equals the requested room id.
pub struct JwtAuthorizer {
    decoding_key: DecodingKey,
    validation: Validation,
    clock_skew: Duration,
}

impl JwtAuthorizer {
    /// Create an authorizer for tokens signed with `secret`.
    #[must_use]
    pub fn new(secret: &SecretString, clock_skew: Duration) -> Self {
        let decoding_key = DecodingKey::from_secret(secret.expose_secret().as_bytes());

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = clock_skew.as_secs();
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            decoding_key,
            validation,
            clock_skew,
        }
    }

    fn verify(&self, token: &str) -> Result<RoomClaims, AuthDecision> {
        check_token_size(token).map_err(|_| AuthDecision::Deny(INVALID_TOKEN_REASON.to_string()))?;

        let token_data =
            decode::<RoomClaims>(token, &self.decoding_key, &self.validation).map_err(|e| {
                tracing::debug!(target: "rs.auth.jwt", error = %e, "Token verification failed");
                AuthDecision::Deny(INVALID_TOKEN_REASON.to_string())
            })?;

        if let Err(e) = validate_iat(token_data.claims.iat, self.clock_skew) {
            tracing::debug!(target: "rs.auth.jwt", error = ?e, "Token iat validation failed");
            return Err(AuthDecision::Deny(INVALID_TOKEN_REASON.to_string()));
        }

        Ok(token_data.claims)
    }
}

#[async_trait]
impl Authorizer for JwtAuthorizer {
    #[instrument(skip_all, fields(room_id = %room))]
    async fn validate(&self, token: &str, peer: &PeerId, room: &RoomId) -> AuthDecision {
        let claims = match self.verify(token) {
            Ok(claims) => claims,
            Err(decision) => return decision,
        };

        if claims.sub != peer.as_str() {
            tracing::debug!(target: "rs.auth.jwt", "Token subject does not match peer id");
            return AuthDecision::Deny(INVALID_TOKEN_REASON.to_string());
        }

        if claims.room != room.as_str() {
            tracing::debug!(target: "rs.auth.jwt", "Token room does not match requested room");
            return AuthDecision::Deny(INVALID_TOKEN_REASON.to_string());
        }

        tracing::debug!(target: "rs.auth.jwt", "Token validated successfully");
        AuthDecision::Allow
    }
}
