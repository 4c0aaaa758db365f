//! Signaling protocol for Conclave.
//!
//! Every message exchanged between a peer and the room service travels as
//! one JSON [`envelope::Envelope`]. Receive-quality preferences use a
//! separate side-channel and travel as [`selection::Selection`].

#![warn(clippy::pedantic)]

pub mod codec;
pub mod envelope;
pub mod selection;

pub use codec::CodecError;
pub use envelope::{
    Envelope, EventKind, JoinReply, JoinRequest, LeaveReply, LeaveRequest, Message, PeerEvent,
    PeerInfo, RequestId, RequestKind, StreamEvent, StreamInfo,
};
pub use selection::{Layer, Selection};
