//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via `tokio::sync::mpsc`.
//! Response patterns use `tokio::sync::oneshot` for request-reply semantics.

use crate::errors::RoomError;

use super::room::RoomHandle;

use common::types::{PeerId, RoomId, StreamId};
use signaling_protocol::{Envelope, PeerInfo, RequestId, StreamInfo};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Messages sent to `RoomControllerActor`.
#[derive(Debug)]
pub enum ControllerMessage {
    /// Return the room actor for `room_id`, spawning it on first use.
    GetOrCreateRoom {
        room_id: RoomId,
        respond_to: oneshot::Sender<Result<RoomHandle, RoomError>>,
    },

    /// Get information about an existing room.
    GetRoom {
        room_id: RoomId,
        respond_to: oneshot::Sender<Result<RoomInfo, RoomError>>,
    },

    /// Remove a room if it has no members left. Replies whether it was removed.
    RemoveRoomIfEmpty {
        room_id: RoomId,
        respond_to: oneshot::Sender<Result<bool, RoomError>>,
    },

    /// Get current status of the controller (for health checks).
    GetStatus {
        respond_to: oneshot::Sender<ControllerStatus>,
    },

    /// Initiate graceful shutdown (SIGTERM received).
    Shutdown {
        deadline: Duration,
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },
}

/// Messages sent to `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// Admit a peer. On success the room itself writes the accepted
    /// `JoinReply` to `outbound` before any event about other peers.
    /// `evicted` is cancelled if the room drops the member because its
    /// outbound queue filled up.
    Join {
        request_id: RequestId,
        peer: PeerInfo,
        outbound: mpsc::Sender<Envelope>,
        evicted: CancellationToken,
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },

    /// Remove a peer (explicit leave or disconnect). Replies with the number
    /// of peers still in the room.
    Leave {
        peer_id: PeerId,
        respond_to: oneshot::Sender<Result<usize, RoomError>>,
    },

    /// Relay an opaque message from one member to another.
    Relay {
        from: PeerId,
        to: PeerId,
        payload: serde_json::Value,
    },

    /// A member started publishing a stream.
    AnnounceStream {
        peer_id: PeerId,
        stream_id: StreamId,
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },

    /// A member stopped publishing a stream.
    RetractStream {
        peer_id: PeerId,
        stream_id: StreamId,
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },

    /// Get current room state (for debugging/health).
    GetState {
        respond_to: oneshot::Sender<RoomState>,
    },

    /// Stop the actor if nobody is in the room. Replies whether it stopped.
    CloseIfEmpty { respond_to: oneshot::Sender<bool> },
}

/// Messages sent to `SessionActor` from outside its connection.
#[derive(Debug)]
pub enum SessionMessage {
    /// Get the session's lifecycle status.
    GetStatus {
        respond_to: oneshot::Sender<SessionStatus>,
    },

    /// Close the session as if the connection dropped.
    Close { reason: String },
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// Information about a room returned by `GetRoom`.
#[derive(Debug, Clone)]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub peer_count: usize,
    pub stream_count: usize,
    /// Room creation timestamp (Unix seconds).
    pub created_at: i64,
}

/// Status of the `RoomControllerActor`.
#[derive(Debug, Clone)]
pub struct ControllerStatus {
    pub room_count: usize,
    /// Joined peers across all rooms.
    pub peer_count: usize,
    /// Open sessions, joined or not.
    pub session_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
}

/// Snapshot of a room's members and streams, in join/announce order.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room_id: RoomId,
    pub peers: Vec<PeerInfo>,
    pub streams: Vec<StreamInfo>,
}

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Unjoined,
    Joined,
    /// Terminal.
    Left,
}

impl SessionPhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Unjoined => "unjoined",
            SessionPhase::Joined => "joined",
            SessionPhase::Left => "left",
        }
    }
}

/// Status of a `SessionActor`.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub room_id: Option<RoomId>,
    pub peer_id: Option<PeerId>,
}
