//! Test fixtures: ids, peers, envelopes and signed room tokens.

use common::jwt::RoomClaims;
use common::types::{PeerId, RoomId, StreamId};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use signaling_protocol::{Envelope, JoinRequest, LeaveRequest, Message, PeerInfo, RequestId};
use std::time::Duration;

/// Secret shared by tests that sign and verify room tokens.
pub const TEST_ROOM_SECRET: &str = "room-test-utils-secret-0123456789abcdef";

/// Token accepted by `MockAuthorizer` unless told otherwise.
pub const TEST_TOKEN: &str = "test-token";

#[must_use]
pub fn peer(id: &str) -> PeerInfo {
    PeerInfo::new(id)
}

#[must_use]
pub fn peer_id(id: &str) -> PeerId {
    PeerId::new(id)
}

#[must_use]
pub fn room_id(id: &str) -> RoomId {
    RoomId::new(id)
}

#[must_use]
pub fn stream_id(id: &str) -> StreamId {
    StreamId::new(id)
}

#[must_use]
pub fn join_envelope(request_id: u64, room: &str, peer_id: &str) -> Envelope {
    Envelope::Join(JoinRequest {
        request_id: RequestId(request_id),
        room: RoomId::new(room),
        peer: PeerInfo::new(peer_id),
        token: TEST_TOKEN.to_string(),
    })
}

#[must_use]
pub fn leave_envelope(request_id: u64, uid: &str) -> Envelope {
    Envelope::Leave(LeaveRequest {
        request_id: RequestId(request_id),
        uid: PeerId::new(uid),
    })
}

#[must_use]
pub fn message_envelope(to: Option<&str>, payload: serde_json::Value) -> Envelope {
    Envelope::Message(Message {
        from: None,
        to: to.map(PeerId::new),
        payload,
    })
}

/// HS256 room token for `peer` in `room`, valid for ten minutes.
#[must_use]
pub fn sign_room_token(secret: &str, peer: &str, room: &str) -> String {
    let claims = RoomClaims::new(
        peer,
        room,
        chrono::Utc::now().timestamp(),
        Duration::from_secs(600),
    );
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("signing a test token cannot fail")
}
