//! Conclave client core.
//!
//! - [`channel`] - signaling channel with request/reply correlation
//! - [`publication`] - local tracks to outbound encodings
//! - [`subscription`] - receive-quality preferences per remote stream
//! - [`client`] - room membership tying the above together
//!
//! Media capture, the outbound transport and the control side-channel are
//! supplied by the application through the traits in [`media`].

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channel;
pub mod client;
pub mod constraints;
pub mod encoding;
pub mod errors;
pub mod media;
pub mod publication;
pub mod subscription;

pub use channel::{ChannelEvents, EnvelopeTransport, PendingReply, Request, SignalingChannel};
pub use client::{RoomClient, RoomEvents};
pub use constraints::Constraints;
pub use encoding::{EncodingLayer, LayerOverride, Resolution, SimulcastTier, VideoPreset};
pub use errors::ClientError;
pub use media::{
    AcquisitionError, ControlChannel, DeviceConstraints, Direction, LocalTrack, MediaCapture,
    OutboundTransport, Transceiver, TrackKind, TransportError,
};
pub use publication::PublicationController;
pub use subscription::{RemoteStream, SubscriptionController};
