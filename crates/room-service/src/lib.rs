//! Room Service Library
//!
//! Server side of Conclave signaling: peers connect over WebSocket, join a
//! room, exchange opaque negotiation messages and receive events about other
//! peers and their streams.
//!
//! # Architecture
//!
//! ```text
//! RoomControllerActor (singleton)
//! ├── RoomActor (one per room)
//! └── SessionActor (one per connection)
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Actor hierarchy and the session state machine
//! - [`auth`] - Join authorization (`Authorizer`, JWT room tokens)
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with client-safe messages
//! - [`negotiation`] - Hand-off of server-addressed messages
//! - [`observability`] - Metrics and health endpoints
//! - [`transport`] - WebSocket endpoint

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod actors;
pub mod auth;
pub mod config;
pub mod errors;
pub mod negotiation;
pub mod observability;
pub mod transport;
