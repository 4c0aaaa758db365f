//! Scripted negotiator for room service tests.
//!
//! Records every server-addressed message. Payloads of the form
//! `{"announce": "<stream id>"}` and `{"retract": "<stream id>"}` are turned
//! into stream announcements on the sender's room, standing in for a media
//! backend that has finished negotiating.

use async_trait::async_trait;
use common::types::{PeerId, RoomId, StreamId};
use room_service::actors::RoomHandle;
use room_service::negotiation::Negotiator;
use std::sync::Mutex;

/// One recorded `on_message` call.
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiationCall {
    pub room: RoomId,
    pub from: PeerId,
    pub payload: serde_json::Value,
}

/// Negotiator that records messages and announces streams on request.
#[derive(Debug, Default)]
pub struct RecordingNegotiator {
    calls: Mutex<Vec<NegotiationCall>>,
}

impl RecordingNegotiator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<NegotiationCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Negotiator for RecordingNegotiator {
    async fn on_message(&self, room: RoomHandle, from: PeerId, payload: serde_json::Value) {
        self.calls.lock().unwrap().push(NegotiationCall {
            room: room.room_id().clone(),
            from: from.clone(),
            payload: payload.clone(),
        });

        if let Some(id) = payload.get("announce").and_then(serde_json::Value::as_str) {
            let _ = room.announce_stream(from, StreamId::new(id)).await;
        } else if let Some(id) = payload.get("retract").and_then(serde_json::Value::as_str) {
            let _ = room.retract_stream(from, StreamId::new(id)).await;
        }
    }
}

/// `{"announce": stream_id}`
#[must_use]
pub fn announce_payload(stream_id: &str) -> serde_json::Value {
    serde_json::json!({ "announce": stream_id })
}

/// `{"retract": stream_id}`
#[must_use]
pub fn retract_payload(stream_id: &str) -> serde_json::Value {
    serde_json::json!({ "retract": stream_id })
}
