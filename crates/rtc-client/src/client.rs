//! `RoomClient` - one peer's view of a room.
//!
//! Ties a [`SignalingChannel`] to a [`SubscriptionController`]. An event pump
//! keeps the set of tracked remote streams in step with `StreamEvent`s and
//! then hands every event to the application, in arrival order.
//!
//! The streams in an accepted `JoinReply` are tracked by the pump too, at the
//! reply's position in the stream. A `StreamEvent{removed}` that follows the
//! reply therefore always lands after the snapshot.

use crate::channel::{ChannelEvents, SignalingChannel};
use crate::errors::ClientError;
use crate::subscription::SubscriptionController;

use common::types::{PeerId, RoomId};
use signaling_protocol::{
    Envelope, EventKind, JoinReply, LeaveReply, Message, PeerInfo, RequestId,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

/// Events the application sees, after the client has applied them.
pub type RoomEvents = mpsc::UnboundedReceiver<Envelope>;

/// Client side of one room membership.
pub struct RoomClient {
    channel: SignalingChannel,
    subscriptions: Arc<SubscriptionController>,
    peer: PeerInfo,
    /// Last join reply whose snapshot the pump has applied.
    applied: watch::Receiver<Option<RequestId>>,
    pump: JoinHandle<()>,
}

impl RoomClient {
    /// Start the event pump over `events`.
    ///
    /// Returns the client and the application's event stream.
    #[must_use]
    pub fn new(
        channel: SignalingChannel,
        events: ChannelEvents,
        subscriptions: Arc<SubscriptionController>,
        peer: PeerInfo,
    ) -> (Self, RoomEvents) {
        let (app_tx, app_rx) = mpsc::unbounded_channel();
        let (applied_tx, applied) = watch::channel(None);
        let pump = tokio::spawn(pump_events(
            events,
            Arc::clone(&subscriptions),
            app_tx,
            applied_tx,
        ));

        (
            Self {
                channel,
                subscriptions,
                peer,
                applied,
                pump,
            },
            app_rx,
        )
    }

    #[must_use]
    pub fn peer_id(&self) -> &PeerId {
        &self.peer.id
    }

    #[must_use]
    pub fn channel(&self) -> &SignalingChannel {
        &self.channel
    }

    #[must_use]
    pub fn subscriptions(&self) -> &Arc<SubscriptionController> {
        &self.subscriptions
    }

    /// Join `room`. On success the streams already announced in the room
    /// are tracked before this returns.
    ///
    /// # Errors
    ///
    /// `ChannelClosed` if the channel closes before the reply or before the
    /// snapshot is applied.
    #[instrument(skip_all, name = "rc.client.join", fields(room_id = %room))]
    pub async fn join(&self, room: RoomId, token: &str) -> Result<JoinReply, ClientError> {
        let reply = self.channel.join(room, self.peer.clone(), token).await?;

        if reply.success {
            let request_id = reply.request_id;
            self.applied
                .clone()
                .wait_for(|applied| *applied == Some(request_id))
                .await
                .map_err(|_| ClientError::ChannelClosed)?;
            info!(
                target: "rc.client",
                peers = reply.peers.len(),
                streams = reply.streams.len(),
                "Joined room"
            );
        } else {
            info!(
                target: "rc.client",
                reason = reply.reason.as_deref().unwrap_or_default(),
                "Join rejected"
            );
        }
        Ok(reply)
    }

    /// Leave the current room.
    ///
    /// # Errors
    ///
    /// `ChannelClosed` if the channel closes before the reply.
    pub async fn leave(&self) -> Result<LeaveReply, ClientError> {
        let reply = self.channel.leave(self.peer.id.clone()).await?;
        if reply.reason.is_none() {
            for stream in self.subscriptions.streams().await {
                self.subscriptions.remove_stream(&stream.stream_id).await;
            }
        }
        Ok(reply)
    }

    /// Send an opaque payload to one peer, or to the server when `to` is
    /// `None`.
    ///
    /// # Errors
    ///
    /// `ChannelClosed` if the channel is closed.
    pub async fn send_message(
        &self,
        to: Option<PeerId>,
        payload: serde_json::Value,
    ) -> Result<(), ClientError> {
        self.channel
            .send_message(Message {
                from: None,
                to,
                payload,
            })
            .await
    }

    /// Close the signaling channel and wait for the event pump to drain.
    pub async fn close(self) {
        self.channel.close();
        let _ = self.pump.await;
    }
}

async fn pump_events(
    mut events: ChannelEvents,
    subscriptions: Arc<SubscriptionController>,
    app: mpsc::UnboundedSender<Envelope>,
    applied: watch::Sender<Option<RequestId>>,
) {
    while let Some(envelope) = events.recv().await {
        // The caller of `join` already has the reply.
        if let Envelope::JoinReply(reply) = &envelope {
            for stream in &reply.streams {
                subscriptions
                    .track_stream(stream.stream_id.clone(), stream.peer.clone())
                    .await;
            }
            applied.send_replace(Some(reply.request_id));
            continue;
        }

        if let Envelope::StreamEvent(event) = &envelope {
            match event.kind {
                EventKind::Added => {
                    subscriptions
                        .track_stream(event.stream_id.clone(), event.peer.clone())
                        .await;
                }
                EventKind::Removed => {
                    subscriptions.remove_stream(&event.stream_id).await;
                }
            }
        }

        if app.send(envelope).is_err() {
            debug!(target: "rc.client", "Application dropped its event stream");
        }
    }
    debug!(target: "rc.client", "Event pump stopped");
}
