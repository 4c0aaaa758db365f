//! Mock authorizer for room service tests.
//!
//! Allows every join unless configured otherwise, and records every call so
//! tests can assert what was validated.
//!
//! # Example
//!
//! ```rust,ignore
//! use room_test_utils::MockAuthorizer;
//!
//! let auth = MockAuthorizer::builder()
//!     .deny_peer("mallory", "banned")
//!     .build();
//! ```

use async_trait::async_trait;
use common::types::{PeerId, RoomId};
use room_service::auth::{AuthDecision, Authorizer};
use std::collections::HashMap;
use std::sync::Mutex;

/// One recorded `validate` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCall {
    pub token: String,
    pub peer: PeerId,
    pub room: RoomId,
}

/// Authorizer with scripted decisions.
#[derive(Debug, Default)]
pub struct MockAuthorizer {
    deny_all: Option<String>,
    denied_peers: HashMap<PeerId, String>,
    denied_tokens: HashMap<String, String>,
    calls: Mutex<Vec<AuthCall>>,
}

impl MockAuthorizer {
    #[must_use]
    pub fn builder() -> MockAuthorizerBuilder {
        MockAuthorizerBuilder::default()
    }

    /// Allow every join.
    #[must_use]
    pub fn allowing() -> Self {
        Self::default()
    }

    /// Deny every join with `reason`.
    #[must_use]
    pub fn denying(reason: &str) -> Self {
        Self::builder().deny_all(reason).build()
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<AuthCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Authorizer for MockAuthorizer {
    async fn validate(&self, token: &str, peer: &PeerId, room: &RoomId) -> AuthDecision {
        self.calls.lock().unwrap().push(AuthCall {
            token: token.to_string(),
            peer: peer.clone(),
            room: room.clone(),
        });

        if let Some(reason) = &self.deny_all {
            return AuthDecision::Deny(reason.clone());
        }
        if let Some(reason) = self.denied_peers.get(peer) {
            return AuthDecision::Deny(reason.clone());
        }
        if let Some(reason) = self.denied_tokens.get(token) {
            return AuthDecision::Deny(reason.clone());
        }
        AuthDecision::Allow
    }
}

/// Builder for `MockAuthorizer`.
#[derive(Debug, Default)]
pub struct MockAuthorizerBuilder {
    deny_all: Option<String>,
    denied_peers: HashMap<PeerId, String>,
    denied_tokens: HashMap<String, String>,
}

impl MockAuthorizerBuilder {
    #[must_use]
    pub fn deny_all(mut self, reason: &str) -> Self {
        self.deny_all = Some(reason.to_string());
        self
    }

    #[must_use]
    pub fn deny_peer(mut self, peer: &str, reason: &str) -> Self {
        self.denied_peers
            .insert(PeerId::new(peer), reason.to_string());
        self
    }

    #[must_use]
    pub fn deny_token(mut self, token: &str, reason: &str) -> Self {
        self.denied_tokens
            .insert(token.to_string(), reason.to_string());
        self
    }

    #[must_use]
    pub fn build(self) -> MockAuthorizer {
        MockAuthorizer {
            deny_all: self.deny_all,
            denied_peers: self.denied_peers,
            denied_tokens: self.denied_tokens,
            calls: Mutex::new(Vec::new()),
        }
    }
}
