//! # Room Test Utilities
//!
//! Shared test utilities for the room service and the client core.
//!
//! ## Modules
//!
//! - `mock_auth` - scripted `Authorizer`
//! - `mock_negotiator` - recording `Negotiator` that announces streams on request
//! - `mock_media` - capture, outbound transport and control channel mocks
//! - `harness` - in-process room service with raw or client-channel peers
//! - `fixtures` - ids, envelopes and signed room tokens
//!
//! ## Usage
//!
//! ```rust,ignore
//! use room_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let service = TestService::new();
//!     let (alice, _events, _session) = service.connect();
//!     let reply = alice
//!         .join(room_id("lobby"), peer("alice"), TEST_TOKEN)
//!         .await
//!         .unwrap();
//!     assert!(reply.success);
//! }
//! ```
//!
//! Use this crate from `tests/` directories only. Unit tests inside
//! `room-service` or `rtc-client` would see a second copy of those crates.

pub mod fixtures;
pub mod harness;
pub mod mock_auth;
pub mod mock_media;
pub mod mock_negotiator;

pub use fixtures::*;
pub use harness::*;
pub use mock_auth::*;
pub use mock_media::*;
pub use mock_negotiator::*;
