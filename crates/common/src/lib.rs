//! Common utilities and types shared across Conclave components.

#![warn(clippy::pedantic)]

/// Module for identifier types (rooms, peers, streams)
pub mod types;

/// Module for common configuration
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for room token claims and validation helpers
pub mod jwt;
