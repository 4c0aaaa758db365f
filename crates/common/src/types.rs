//! Common identifier types for Conclave components.
//!
//! Identifiers are opaque strings chosen by clients (peer ids, stream ids)
//! or by whoever creates a room. Random ids are UUIDv4 strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a random identifier.
            #[must_use]
            pub fn random() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Borrow the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the identifier is empty (never valid on the wire).
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Unique identifier for a room
    RoomId
);

string_id!(
    /// Unique identifier for a peer within a room
    PeerId
);

string_id!(
    /// Unique identifier for a published media stream
    StreamId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_serialize_transparently() {
        let id = PeerId::new("alice");
        let json = serde_json::to_string(&id).unwrap_or_default();
        assert_eq!(json, "\"alice\"");
    }

    #[test]
    fn test_random_ids_are_unique() {
        assert_ne!(StreamId::random(), StreamId::random());
        assert!(!RoomId::random().is_empty());
    }

    #[test]
    fn test_display_matches_inner() {
        assert_eq!(RoomId::from("lobby").to_string(), "lobby");
    }
}
