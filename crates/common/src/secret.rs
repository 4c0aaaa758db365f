//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports [`secrecy`] so every Conclave crate wraps the same types around
//! room token signing keys and bearer tokens. `SecretString` implements
//! `Debug` with redaction, so structs that derive `Debug` stay safe to log.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct JoinCredentials {
//!     peer: String,
//!     token: SecretString,
//! }
//!
//! let creds = JoinCredentials {
//!     peer: "alice".to_string(),
//!     token: SecretString::from("eyJhbGciOi..."),
//! };
//!
//! assert!(!format!("{creds:?}").contains("eyJhbGciOi"));
//! let raw: &str = creds.token.expose_secret();
//! # let _ = raw;
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
