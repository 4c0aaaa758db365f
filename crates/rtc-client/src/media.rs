//! Interfaces to the media stack.
//!
//! Capture devices, the outbound RTP transport and the control side-channel
//! are provided by the embedding application. The controllers in this crate
//! only drive them through these traits.

use crate::encoding::EncodingLayer;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Media component of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    /// Every kind, in the order controllers lock them.
    pub const ALL: [TrackKind; 2] = [TrackKind::Audio, TrackKind::Video];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to ask a capture device for.
///
/// Unset fields are left to the device's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<f64>,
}

impl DeviceConstraints {
    /// Same constraints, pointed at a different device.
    #[must_use]
    pub fn with_device_id(&self, device_id: impl Into<String>) -> Self {
        Self {
            device_id: Some(device_id.into()),
            ..self.clone()
        }
    }
}

/// Why a capture device could not be opened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquisitionError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("{0}")]
    Other(String),
}

/// A locally captured track.
pub trait LocalTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn kind(&self) -> TrackKind;

    fn device_id(&self) -> Option<&str>;

    /// Whether the track is live. False once stopped.
    fn enabled(&self) -> bool;

    /// Release the capture device. Idempotent.
    fn stop(&self);
}

/// Opens capture devices.
#[async_trait]
pub trait MediaCapture: Send + Sync {
    /// May wait indefinitely on user permission or hardware.
    async fn acquire(
        &self,
        kind: TrackKind,
        constraints: &DeviceConstraints,
    ) -> Result<Arc<dyn LocalTrack>, AcquisitionError>;
}

/// Error reported by the outbound transport or control channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Transceiver direction, as far as publication cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    SendOnly,
    SendRecv,
    RecvOnly,
    Inactive,
}

impl Direction {
    #[must_use]
    pub const fn is_sending(self) -> bool {
        matches!(self, Direction::SendOnly | Direction::SendRecv)
    }
}

/// One outbound media slot.
#[async_trait]
pub trait Transceiver: Send + Sync + fmt::Debug {
    fn kind(&self) -> TrackKind;

    /// Track currently attached to the sender.
    fn track(&self) -> Option<Arc<dyn LocalTrack>>;

    /// Encodings currently applied to the sender.
    fn parameters(&self) -> Vec<EncodingLayer>;

    async fn set_parameters(&self, encodings: Vec<EncodingLayer>) -> Result<(), TransportError>;

    /// Swap the sender's track without renegotiation.
    async fn replace_track(&self, track: Option<Arc<dyn LocalTrack>>)
        -> Result<(), TransportError>;

    fn direction(&self) -> Direction;

    fn set_direction(&self, direction: Direction);
}

/// Outbound side of the peer connection.
#[async_trait]
pub trait OutboundTransport: Send + Sync {
    /// Existing transceiver for `kind`, if any.
    fn transceiver(&self, kind: TrackKind) -> Option<Arc<dyn Transceiver>>;

    /// Add a send-only transceiver carrying `track`.
    async fn add_transceiver(
        &self,
        track: Arc<dyn LocalTrack>,
        encodings: Vec<EncodingLayer>,
    ) -> Result<Arc<dyn Transceiver>, TransportError>;
}

/// Reliable, ordered byte channel next to the signaling stream.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    async fn send(&self, data: Bytes) -> Result<(), TransportError>;
}
