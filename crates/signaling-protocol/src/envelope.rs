//! Signaling envelope types.
//!
//! Wire format is JSON with an adjacent tag:
//!
//! ```json
//! {"type": "join", "data": {"request_id": 1, "room": "lobby", "peer": {"id": "alice"}, "token": "..."}}
//! ```
//!
//! Requests (`join`, `leave`) carry a [`RequestId`] chosen by the sender.
//! The matching reply echoes it back unchanged.

use common::types::{PeerId, RoomId, StreamId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Correlation id for a request and its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of request a reply answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Join,
    Leave,
}

impl RequestKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
        }
    }
}

/// Whether a peer/stream was added to or removed from the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Added,
    Removed,
}

/// Public description of a peer, as seen by other members of a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: PeerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Application-defined metadata, relayed untouched.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl PeerInfo {
    /// A peer with no display name or metadata.
    pub fn new(id: impl Into<PeerId>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            metadata: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// A stream announced in a room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamInfo {
    pub stream_id: StreamId,
    /// Peer that publishes the stream.
    pub peer: PeerId,
}

/// Request to join a room.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub request_id: RequestId,
    pub room: RoomId,
    pub peer: PeerInfo,
    /// Bearer token checked by the room service's authorizer.
    #[serde(default)]
    pub token: String,
}

impl fmt::Debug for JoinRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinRequest")
            .field("request_id", &self.request_id)
            .field("room", &self.room)
            .field("peer", &self.peer)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Reply to a [`JoinRequest`].
///
/// On success `peers` and `streams` hold a snapshot of the other members of
/// the room and their announced streams. On failure `reason` explains why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinReply {
    pub request_id: RequestId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub peers: Vec<PeerInfo>,
    #[serde(default)]
    pub streams: Vec<StreamInfo>,
}

impl JoinReply {
    #[must_use]
    pub fn accepted(request_id: RequestId, peers: Vec<PeerInfo>, streams: Vec<StreamInfo>) -> Self {
        Self {
            request_id,
            success: true,
            reason: None,
            peers,
            streams,
        }
    }

    pub fn rejected(request_id: RequestId, reason: impl Into<String>) -> Self {
        Self {
            request_id,
            success: false,
            reason: Some(reason.into()),
            peers: Vec::new(),
            streams: Vec::new(),
        }
    }
}

/// Request to leave the room. `uid` must be the sender's own peer id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub request_id: RequestId,
    pub uid: PeerId,
}

/// Reply to a [`LeaveRequest`]. `reason` is `None` on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveReply {
    pub request_id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Opaque peer-to-peer or peer-to-server message.
///
/// `to: None` addresses the server's negotiation logic. The server always
/// overwrites `from` with the sender's joined peer id before relaying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<PeerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<PeerId>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// A peer was added to or removed from the room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerEvent {
    pub kind: EventKind,
    pub peer: PeerInfo,
}

/// A stream was announced or retracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub kind: EventKind,
    pub stream_id: StreamId,
    pub peer: PeerId,
}

/// Every signaling message, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Envelope {
    Join(JoinRequest),
    JoinReply(JoinReply),
    Leave(LeaveRequest),
    LeaveReply(LeaveReply),
    Message(Message),
    PeerEvent(PeerEvent),
    StreamEvent(StreamEvent),
}

impl Envelope {
    /// Wire tag of this envelope, also used as a metrics label.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::JoinReply(_) => "join_reply",
            Self::Leave(_) => "leave",
            Self::LeaveReply(_) => "leave_reply",
            Self::Message(_) => "message",
            Self::PeerEvent(_) => "peer_event",
            Self::StreamEvent(_) => "stream_event",
        }
    }

    /// Request id carried by requests and replies.
    #[must_use]
    pub const fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::Join(r) => Some(r.request_id),
            Self::JoinReply(r) => Some(r.request_id),
            Self::Leave(r) => Some(r.request_id),
            Self::LeaveReply(r) => Some(r.request_id),
            Self::Message(_) | Self::PeerEvent(_) | Self::StreamEvent(_) => None,
        }
    }

    /// For replies, the kind of request they answer.
    #[must_use]
    pub const fn reply_kind(&self) -> Option<RequestKind> {
        match self {
            Self::JoinReply(_) => Some(RequestKind::Join),
            Self::LeaveReply(_) => Some(RequestKind::Leave),
            _ => None,
        }
    }

    /// For requests, their kind.
    #[must_use]
    pub const fn request_kind(&self) -> Option<RequestKind> {
        match self {
            Self::Join(_) => Some(RequestKind::Join),
            Self::Leave(_) => Some(RequestKind::Leave),
            _ => None,
        }
    }

    /// Server-pushed envelopes delivered to a client's event stream.
    #[must_use]
    pub const fn is_event(&self) -> bool {
        matches!(
            self,
            Self::Message(_) | Self::PeerEvent(_) | Self::StreamEvent(_)
        )
    }
}
