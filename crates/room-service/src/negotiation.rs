//! Hand-off point for media negotiation.
//!
//! Messages a joined peer sends without a `to` field are addressed to the
//! server. The room service does not interpret them; it passes them to a
//! [`Negotiator`] together with a [`RoomHandle`] so the negotiator can
//! announce or retract streams once media is flowing.

use crate::actors::RoomHandle;

use async_trait::async_trait;
use common::types::PeerId;
use tracing::debug;

/// Receives server-addressed messages from joined peers.
#[async_trait]
pub trait Negotiator: Send + Sync {
    async fn on_message(&self, room: RoomHandle, from: PeerId, payload: serde_json::Value);
}

/// Drops every message. Used when no media backend is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNegotiator;

#[async_trait]
impl Negotiator for LoggingNegotiator {
    async fn on_message(&self, room: RoomHandle, from: PeerId, _payload: serde_json::Value) {
        debug!(
            target: "rs.negotiation",
            room_id = %room.room_id(),
            peer_id = %from,
            "No negotiator attached, dropping server-addressed message"
        );
    }
}
