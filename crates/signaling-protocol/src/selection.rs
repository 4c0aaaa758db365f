//! Receive-quality selection sent over the control side-channel.
//!
//! ```json
//! {"streamId": "s1", "video": "medium", "audio": true}
//! ```
//!
//! Every selection carries the full tuple, never a delta.

use common::types::StreamId;
use serde::{Deserialize, Serialize};

/// Simulcast quality tier requested for a remote video stream.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    /// Video not received.
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl Layer {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Desired receive state for one remote stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub stream_id: StreamId,
    pub video: Layer,
    pub audio: bool,
}
