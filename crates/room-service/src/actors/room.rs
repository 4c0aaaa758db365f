//! `RoomActor` - per-room actor that owns membership and stream state.
//!
//! Each `RoomActor`:
//! - Is the single writer for its room's membership and announced streams
//! - Writes events straight into every member's outbound queue, so events
//!   about one peer reach every other peer in the order they happened
//! - Stops itself only through `CloseIfEmpty` or cancellation
//!
//! # Slow Consumers
//!
//! Delivery uses `try_send` and the room never waits on a client. A member
//! whose outbound queue is full is evicted: it is removed as if it had left,
//! the others see its streams and then the peer go away, and its `evicted`
//! token is cancelled so the owning session ends. A joined member never
//! silently misses an event.

use crate::errors::RoomError;

use super::messages::{RoomMessage, RoomState};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use crate::observability::metrics as prom;

use common::types::{PeerId, RoomId, StreamId};
use signaling_protocol::{
    Envelope, EventKind, JoinReply, Message, PeerEvent, PeerInfo, RequestId, StreamEvent,
    StreamInfo,
};
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// Handle to a `RoomActor`.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: RoomId,
}

impl RoomHandle {
    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Admit `peer`. On success the accepted `JoinReply` (echoing
    /// `request_id`) has already been queued on `outbound`. The room cancels
    /// `evicted` if it later drops the member for falling behind.
    ///
    /// # Errors
    ///
    /// `Conflict` if the peer id is taken, `RoomCapacityExceeded` if the room
    /// is full, `ChannelClosed` if the room actor has stopped.
    pub async fn join(
        &self,
        request_id: RequestId,
        peer: PeerInfo,
        outbound: mpsc::Sender<Envelope>,
        evicted: CancellationToken,
    ) -> Result<(), RoomError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::Join {
                request_id,
                peer,
                outbound,
                evicted,
                respond_to: tx,
            })
            .await
            .map_err(|_| RoomError::ChannelClosed)?;

        rx.await.map_err(|_| RoomError::ChannelClosed)?
    }

    /// Remove a peer, returning how many remain.
    ///
    /// # Errors
    ///
    /// `ProtocolUsage` if the peer is not a member, `ChannelClosed` if the
    /// room actor has stopped.
    pub async fn leave(&self, peer_id: PeerId) -> Result<usize, RoomError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::Leave {
                peer_id,
                respond_to: tx,
            })
            .await
            .map_err(|_| RoomError::ChannelClosed)?;

        rx.await.map_err(|_| RoomError::ChannelClosed)?
    }

    /// Relay an opaque payload to one member. Fire-and-forget.
    ///
    /// # Errors
    ///
    /// `ChannelClosed` if the room actor has stopped.
    pub async fn relay(
        &self,
        from: PeerId,
        to: PeerId,
        payload: serde_json::Value,
    ) -> Result<(), RoomError> {
        self.sender
            .send(RoomMessage::Relay { from, to, payload })
            .await
            .map_err(|_| RoomError::ChannelClosed)
    }

    /// Record that `peer_id` publishes `stream_id` and tell the others.
    ///
    /// # Errors
    ///
    /// `ProtocolUsage` if the peer is not a member, `Conflict` if another
    /// peer already announced the same stream id.
    pub async fn announce_stream(
        &self,
        peer_id: PeerId,
        stream_id: StreamId,
    ) -> Result<(), RoomError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::AnnounceStream {
                peer_id,
                stream_id,
                respond_to: tx,
            })
            .await
            .map_err(|_| RoomError::ChannelClosed)?;

        rx.await.map_err(|_| RoomError::ChannelClosed)?
    }

    /// Record that `peer_id` stopped publishing `stream_id` and tell the others.
    ///
    /// # Errors
    ///
    /// `ProtocolUsage` if the stream was not announced by this peer.
    pub async fn retract_stream(
        &self,
        peer_id: PeerId,
        stream_id: StreamId,
    ) -> Result<(), RoomError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::RetractStream {
                peer_id,
                stream_id,
                respond_to: tx,
            })
            .await
            .map_err(|_| RoomError::ChannelClosed)?;

        rx.await.map_err(|_| RoomError::ChannelClosed)?
    }

    /// Snapshot of members and streams.
    ///
    /// # Errors
    ///
    /// `ChannelClosed` if the room actor has stopped.
    pub async fn get_state(&self) -> Result<RoomState, RoomError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::GetState { respond_to: tx })
            .await
            .map_err(|_| RoomError::ChannelClosed)?;

        rx.await.map_err(|_| RoomError::ChannelClosed)
    }

    /// Ask the room to stop if it has no members. `Ok(true)` means the actor
    /// is exiting.
    ///
    /// # Errors
    ///
    /// `ChannelClosed` if the room actor has already stopped.
    pub async fn close_if_empty(&self) -> Result<bool, RoomError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::CloseIfEmpty { respond_to: tx })
            .await
            .map_err(|_| RoomError::ChannelClosed)?;

        rx.await.map_err(|_| RoomError::ChannelClosed)
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Whether the actor's mailbox is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// A joined peer.
struct Member {
    info: PeerInfo,
    outbound: mpsc::Sender<Envelope>,
    evicted: CancellationToken,
    /// Announced streams, in announce order.
    streams: Vec<StreamId>,
    /// Join order within the room.
    seq: u64,
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    room_id: RoomId,
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    members: HashMap<PeerId, Member>,
    /// Members whose outbound queue was full during the current message.
    overflowed: Vec<PeerId>,
    next_seq: u64,
    max_peers: usize,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomActor {
    /// Spawn a new room actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        room_id: RoomId,
        cancel_token: CancellationToken,
        max_peers: usize,
        metrics: Arc<ActorMetrics>,
    ) -> (RoomHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);

        let actor = Self {
            room_id: room_id.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            members: HashMap::new(),
            overflowed: Vec::new(),
            next_seq: 0,
            max_peers,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Room, room_id.as_str()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomHandle {
            sender,
            cancel_token,
            room_id,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "rs.actor.room", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        info!(
            target: "rs.actor.room",
            room_id = %self.room_id,
            max_peers = self.max_peers,
            "RoomActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rs.actor.room",
                        room_id = %self.room_id,
                        "RoomActor received cancellation signal"
                    );
                    self.graceful_shutdown();
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            let flow = self.handle_message(message);
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                            if flow.is_break() {
                                break;
                            }
                        }
                        None => {
                            info!(
                                target: "rs.actor.room",
                                room_id = %self.room_id,
                                "RoomActor channel closed, exiting"
                            );
                            self.graceful_shutdown();
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "rs.actor.room",
            room_id = %self.room_id,
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    fn handle_message(&mut self, message: RoomMessage) -> ControlFlow<()> {
        match message {
            RoomMessage::Join {
                request_id,
                peer,
                outbound,
                evicted,
                respond_to,
            } => {
                let result = self.handle_join(request_id, peer, outbound, evicted);
                self.evict_overflowed();
                let _ = respond_to.send(result);
            }

            RoomMessage::Leave {
                peer_id,
                respond_to,
            } => {
                let result = self.handle_leave(&peer_id);
                let _ = respond_to.send(result);
            }

            RoomMessage::Relay { from, to, payload } => {
                self.handle_relay(from, to, payload);
                self.evict_overflowed();
            }

            RoomMessage::AnnounceStream {
                peer_id,
                stream_id,
                respond_to,
            } => {
                let result = self.handle_announce(&peer_id, stream_id);
                self.evict_overflowed();
                let _ = respond_to.send(result);
            }

            RoomMessage::RetractStream {
                peer_id,
                stream_id,
                respond_to,
            } => {
                let result = self.handle_retract(&peer_id, &stream_id);
                self.evict_overflowed();
                let _ = respond_to.send(result);
            }

            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.get_state());
            }

            RoomMessage::CloseIfEmpty { respond_to } => {
                let empty = self.members.is_empty();
                let _ = respond_to.send(empty);
                if empty {
                    debug!(
                        target: "rs.actor.room",
                        room_id = %self.room_id,
                        "Room empty, closing"
                    );
                    return ControlFlow::Break(());
                }
            }
        }

        ControlFlow::Continue(())
    }

    fn handle_join(
        &mut self,
        request_id: RequestId,
        peer: PeerInfo,
        outbound: mpsc::Sender<Envelope>,
        evicted: CancellationToken,
    ) -> Result<(), RoomError> {
        if self.members.contains_key(&peer.id) {
            return Err(RoomError::Conflict("peer id already in room".to_string()));
        }

        if self.members.len() >= self.max_peers {
            warn!(
                target: "rs.actor.room",
                room_id = %self.room_id,
                max_peers = self.max_peers,
                "Join rejected, room at capacity"
            );
            return Err(RoomError::RoomCapacityExceeded(format!(
                "max {} peers",
                self.max_peers
            )));
        }

        let state = self.get_state();
        let reply =
            Envelope::JoinReply(JoinReply::accepted(request_id, state.peers, state.streams));

        // The reply must be queued before the peer becomes visible to others.
        match outbound.try_send(reply) {
            Ok(()) => {}
            Err(TrySendError::Closed(_)) => return Err(RoomError::ChannelClosed),
            Err(TrySendError::Full(_)) => {
                return Err(RoomError::Internal("joiner outbound queue full".to_string()))
            }
        }

        let peer_id = peer.id.clone();
        let seq = self.next_seq;
        self.next_seq += 1;

        self.members.insert(
            peer_id.clone(),
            Member {
                info: peer.clone(),
                outbound,
                evicted,
                streams: Vec::new(),
                seq,
            },
        );
        self.metrics.peer_joined();

        self.broadcast(
            &peer_id,
            &Envelope::PeerEvent(PeerEvent {
                kind: EventKind::Added,
                peer,
            }),
        );

        info!(
            target: "rs.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            peers = self.members.len(),
            "Peer joined"
        );

        Ok(())
    }

    fn handle_leave(&mut self, peer_id: &PeerId) -> Result<usize, RoomError> {
        let Some(member) = self.members.remove(peer_id) else {
            return Err(RoomError::ProtocolUsage("peer not in room".to_string()));
        };
        self.announce_departure(peer_id, member);
        self.evict_overflowed();

        info!(
            target: "rs.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            peers = self.members.len(),
            "Peer left"
        );

        Ok(self.members.len())
    }

    /// Drop every member that could not take an envelope. Each eviction is
    /// itself broadcast, which can overflow further members.
    fn evict_overflowed(&mut self) {
        while let Some(peer_id) = self.overflowed.pop() {
            let Some(member) = self.members.remove(&peer_id) else {
                continue;
            };
            member.evicted.cancel();
            prom::record_message_dropped("slow_consumer");

            warn!(
                target: "rs.actor.room",
                room_id = %self.room_id,
                peer_id = %peer_id,
                "Outbound queue full, evicting peer"
            );

            self.announce_departure(&peer_id, member);
        }
    }

    /// Tell the remaining members that `member` is gone: its streams first,
    /// then the peer.
    fn announce_departure(&mut self, peer_id: &PeerId, member: Member) {
        self.metrics.peer_left();

        for stream_id in member.streams {
            self.broadcast(
                peer_id,
                &Envelope::StreamEvent(StreamEvent {
                    kind: EventKind::Removed,
                    stream_id,
                    peer: peer_id.clone(),
                }),
            );
        }

        self.broadcast(
            peer_id,
            &Envelope::PeerEvent(PeerEvent {
                kind: EventKind::Removed,
                peer: member.info,
            }),
        );
    }

    fn handle_relay(&mut self, from: PeerId, to: PeerId, payload: serde_json::Value) {
        if !self.members.contains_key(&from) {
            warn!(
                target: "rs.actor.room",
                room_id = %self.room_id,
                "Dropping relay from a peer that is not in the room"
            );
            prom::record_message_dropped("unjoined_sender");
            return;
        }

        let Some(target) = self.members.get(&to).map(|m| m.outbound.clone()) else {
            warn!(
                target: "rs.actor.room",
                room_id = %self.room_id,
                from = %from,
                to = %to,
                "Dropping relay to unknown peer"
            );
            prom::record_message_dropped("unknown_target");
            return;
        };

        let envelope = Envelope::Message(Message {
            from: Some(from),
            to: Some(to.clone()),
            payload,
        });
        if !self.deliver(&to, &target, envelope) {
            self.overflowed.push(to);
        }
    }

    fn handle_announce(&mut self, peer_id: &PeerId, stream_id: StreamId) -> Result<(), RoomError> {
        if !self.members.contains_key(peer_id) {
            return Err(RoomError::ProtocolUsage("peer not in room".to_string()));
        }

        if let Some(owner) = self.stream_owner(&stream_id) {
            if owner == peer_id {
                return Ok(());
            }
            return Err(RoomError::Conflict(
                "stream id already announced by another peer".to_string(),
            ));
        }

        if let Some(member) = self.members.get_mut(peer_id) {
            member.streams.push(stream_id.clone());
        }

        debug!(
            target: "rs.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            stream_id = %stream_id,
            "Stream announced"
        );

        self.broadcast(
            peer_id,
            &Envelope::StreamEvent(StreamEvent {
                kind: EventKind::Added,
                stream_id,
                peer: peer_id.clone(),
            }),
        );

        Ok(())
    }

    fn handle_retract(&mut self, peer_id: &PeerId, stream_id: &StreamId) -> Result<(), RoomError> {
        let removed = self.members.get_mut(peer_id).is_some_and(|member| {
            let before = member.streams.len();
            member.streams.retain(|s| s != stream_id);
            member.streams.len() != before
        });

        if !removed {
            return Err(RoomError::ProtocolUsage("stream not announced".to_string()));
        }

        self.broadcast(
            peer_id,
            &Envelope::StreamEvent(StreamEvent {
                kind: EventKind::Removed,
                stream_id: stream_id.clone(),
                peer: peer_id.clone(),
            }),
        );

        Ok(())
    }

    fn stream_owner(&self, stream_id: &StreamId) -> Option<&PeerId> {
        self.members
            .iter()
            .find(|(_, member)| member.streams.contains(stream_id))
            .map(|(peer_id, _)| peer_id)
    }

    /// Members and streams ordered by join order.
    fn get_state(&self) -> RoomState {
        let mut members: Vec<&Member> = self.members.values().collect();
        members.sort_by_key(|m| m.seq);

        let streams = members
            .iter()
            .flat_map(|m| {
                m.streams.iter().map(|stream_id| StreamInfo {
                    stream_id: stream_id.clone(),
                    peer: m.info.id.clone(),
                })
            })
            .collect();

        RoomState {
            room_id: self.room_id.clone(),
            peers: members.iter().map(|m| m.info.clone()).collect(),
            streams,
        }
    }

    /// Send to every member except `except`. Members already marked for
    /// eviction are skipped.
    fn broadcast(&mut self, except: &PeerId, envelope: &Envelope) {
        let mut full = Vec::new();
        for (peer_id, member) in &self.members {
            if peer_id == except || self.overflowed.contains(peer_id) {
                continue;
            }
            if !self.deliver(peer_id, &member.outbound, envelope.clone()) {
                full.push(peer_id.clone());
            }
        }
        self.overflowed.extend(full);
    }

    /// Returns `false` if the queue is full and the member must be evicted.
    fn deliver(
        &self,
        peer_id: &PeerId,
        outbound: &mpsc::Sender<Envelope>,
        envelope: Envelope,
    ) -> bool {
        match outbound.try_send(envelope) {
            Ok(()) => true,
            Err(TrySendError::Full(envelope)) => {
                debug!(
                    target: "rs.actor.room",
                    room_id = %self.room_id,
                    peer_id = %peer_id,
                    envelope_type = envelope.type_name(),
                    "Outbound queue full"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                // Session is tearing down; its leave is already queued.
                debug!(
                    target: "rs.actor.room",
                    room_id = %self.room_id,
                    peer_id = %peer_id,
                    "Outbound queue closed"
                );
                prom::record_message_dropped("closed");
                true
            }
        }
    }

    fn graceful_shutdown(&mut self) {
        info!(
            target: "rs.actor.room",
            room_id = %self.room_id,
            peers = self.members.len(),
            "Performing graceful shutdown"
        );

        for _ in self.members.drain() {
            self.metrics.peer_left();
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn spawn_room(max_peers: usize) -> (RoomHandle, JoinHandle<()>) {
        RoomActor::spawn(
            RoomId::new("lobby"),
            CancellationToken::new(),
            max_peers,
            ActorMetrics::new(),
        )
    }

    async fn join(
        room: &RoomHandle,
        id: &str,
        request_id: u64,
    ) -> (Result<(), RoomError>, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(32);
        let result = room
            .join(
                RequestId(request_id),
                PeerInfo::new(id),
                tx,
                CancellationToken::new(),
            )
            .await;
        (result, rx)
    }

    async fn next(rx: &mut mpsc::Receiver<Envelope>) -> Envelope {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for envelope")
            .expect("outbound closed")
    }

    #[tokio::test]
    async fn test_join_reply_carries_snapshot() {
        let (room, _task) = spawn_room(10);

        let (result, mut alice) = join(&room, "alice", 1).await;
        result.unwrap();
        match next(&mut alice).await {
            Envelope::JoinReply(reply) => {
                assert!(reply.success);
                assert_eq!(reply.request_id, RequestId(1));
                assert!(reply.peers.is_empty());
            }
            other => panic!("expected JoinReply, got {other:?}"),
        }

        room.announce_stream(PeerId::new("alice"), StreamId::new("cam"))
            .await
            .unwrap();

        let (result, mut bob) = join(&room, "bob", 7).await;
        result.unwrap();
        match next(&mut bob).await {
            Envelope::JoinReply(reply) => {
                assert_eq!(reply.request_id, RequestId(7));
                assert_eq!(reply.peers.len(), 1);
                assert_eq!(reply.peers[0].id, PeerId::new("alice"));
                assert_eq!(reply.streams.len(), 1);
                assert_eq!(reply.streams[0].stream_id, StreamId::new("cam"));
            }
            other => panic!("expected JoinReply, got {other:?}"),
        }

        match next(&mut alice).await {
            Envelope::PeerEvent(event) => {
                assert_eq!(event.kind, EventKind::Added);
                assert_eq!(event.peer.id, PeerId::new("bob"));
            }
            other => panic!("expected PeerEvent, got {other:?}"),
        }

        room.cancel();
    }

    #[tokio::test]
    async fn test_duplicate_peer_id_conflicts() {
        let (room, _task) = spawn_room(10);

        let (first, _rx1) = join(&room, "alice", 1).await;
        first.unwrap();
        let (second, _rx2) = join(&room, "alice", 2).await;
        assert!(matches!(second, Err(RoomError::Conflict(_))));

        room.cancel();
    }

    #[tokio::test]
    async fn test_room_capacity() {
        let (room, _task) = spawn_room(1);

        let (first, _rx1) = join(&room, "alice", 1).await;
        first.unwrap();
        let (second, _rx2) = join(&room, "bob", 1).await;
        assert!(matches!(second, Err(RoomError::RoomCapacityExceeded(_))));

        room.cancel();
    }

    #[tokio::test]
    async fn test_leave_reports_streams_before_peer() {
        let (room, _task) = spawn_room(10);

        let (r, mut alice) = join(&room, "alice", 1).await;
        r.unwrap();
        let (r, mut bob) = join(&room, "bob", 1).await;
        r.unwrap();
        let _ = next(&mut alice).await; // own reply
        let _ = next(&mut alice).await; // bob added
        let _ = next(&mut bob).await; // own reply

        room.announce_stream(PeerId::new("bob"), StreamId::new("cam"))
            .await
            .unwrap();
        room.announce_stream(PeerId::new("bob"), StreamId::new("screen"))
            .await
            .unwrap();
        let _ = next(&mut alice).await;
        let _ = next(&mut alice).await;

        let remaining = room.leave(PeerId::new("bob")).await.unwrap();
        assert_eq!(remaining, 1);

        let mut removed_streams = Vec::new();
        for _ in 0..2 {
            match next(&mut alice).await {
                Envelope::StreamEvent(event) => {
                    assert_eq!(event.kind, EventKind::Removed);
                    removed_streams.push(event.stream_id);
                }
                other => panic!("expected StreamEvent, got {other:?}"),
            }
        }
        assert_eq!(
            removed_streams,
            vec![StreamId::new("cam"), StreamId::new("screen")]
        );

        match next(&mut alice).await {
            Envelope::PeerEvent(event) => {
                assert_eq!(event.kind, EventKind::Removed);
                assert_eq!(event.peer.id, PeerId::new("bob"));
            }
            other => panic!("expected PeerEvent, got {other:?}"),
        }

        room.cancel();
    }

    #[tokio::test]
    async fn test_leave_unknown_peer_is_usage_error() {
        let (room, _task) = spawn_room(10);
        let result = room.leave(PeerId::new("ghost")).await;
        assert!(matches!(result, Err(RoomError::ProtocolUsage(_))));
        room.cancel();
    }

    #[tokio::test]
    async fn test_relay_stamps_sender() {
        let (room, _task) = spawn_room(10);

        let (r, mut alice) = join(&room, "alice", 1).await;
        r.unwrap();
        let (r, mut bob) = join(&room, "bob", 1).await;
        r.unwrap();
        let _ = next(&mut bob).await;

        room.relay(
            PeerId::new("alice"),
            PeerId::new("bob"),
            serde_json::json!({"sdp": "offer"}),
        )
        .await
        .unwrap();

        match next(&mut bob).await {
            Envelope::Message(msg) => {
                assert_eq!(msg.from, Some(PeerId::new("alice")));
                assert_eq!(msg.to, Some(PeerId::new("bob")));
                assert_eq!(msg.payload["sdp"], "offer");
            }
            other => panic!("expected Message, got {other:?}"),
        }

        // Unknown target is dropped; alice receives nothing but her own traffic.
        room.relay(
            PeerId::new("alice"),
            PeerId::new("carol"),
            serde_json::json!({}),
        )
        .await
        .unwrap();
        let _ = next(&mut alice).await; // own reply
        let _ = next(&mut alice).await; // bob added
        assert!(alice.try_recv().is_err());

        room.cancel();
    }

    #[tokio::test]
    async fn test_stream_announcement_rules() {
        let (room, _task) = spawn_room(10);
        let (r, _alice) = join(&room, "alice", 1).await;
        r.unwrap();
        let (r, _bob) = join(&room, "bob", 1).await;
        r.unwrap();

        let alice = PeerId::new("alice");
        let bob = PeerId::new("bob");
        let cam = StreamId::new("cam");

        room.announce_stream(alice.clone(), cam.clone()).await.unwrap();
        // Same peer again is a no-op.
        room.announce_stream(alice.clone(), cam.clone()).await.unwrap();
        assert!(matches!(
            room.announce_stream(bob.clone(), cam.clone()).await,
            Err(RoomError::Conflict(_))
        ));
        assert!(matches!(
            room.announce_stream(PeerId::new("ghost"), StreamId::new("x")).await,
            Err(RoomError::ProtocolUsage(_))
        ));

        let state = room.get_state().await.unwrap();
        assert_eq!(state.streams.len(), 1);

        assert!(matches!(
            room.retract_stream(bob, cam.clone()).await,
            Err(RoomError::ProtocolUsage(_))
        ));
        room.retract_stream(alice, cam).await.unwrap();
        assert!(room.get_state().await.unwrap().streams.is_empty());

        room.cancel();
    }

    fn expect_peer_event(envelope: Envelope, kind: EventKind, id: &str) {
        match envelope {
            Envelope::PeerEvent(event) => {
                assert_eq!(event.kind, kind);
                assert_eq!(event.peer.id, PeerId::new(id));
            }
            other => panic!("expected PeerEvent, got {other:?}"),
        }
    }

    fn expect_stream_event(envelope: Envelope, kind: EventKind, stream: &str) {
        match envelope {
            Envelope::StreamEvent(event) => {
                assert_eq!(event.kind, kind);
                assert_eq!(event.stream_id, StreamId::new(stream));
            }
            other => panic!("expected StreamEvent, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_full_outbound_queue_evicts_member() {
        let (room, _task) = spawn_room(10);

        let (r, mut alice) = join(&room, "alice", 1).await;
        r.unwrap();
        let _ = next(&mut alice).await; // join reply

        // Capacity one: the JoinReply fills it and it is never drained.
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let evicted = CancellationToken::new();
        room.join(
            RequestId(1),
            PeerInfo::new("slow"),
            slow_tx,
            evicted.clone(),
        )
        .await
        .unwrap();
        room.announce_stream(PeerId::new("slow"), StreamId::new("slow-cam"))
            .await
            .unwrap();
        assert!(!evicted.is_cancelled());

        let (r, mut carol) = join(&room, "carol", 1).await;
        r.unwrap();

        // Carol's arrival does not fit in the slow queue.
        assert!(evicted.is_cancelled());
        let state = room.get_state().await.unwrap();
        let ids: Vec<&str> = state.peers.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["alice", "carol"]);
        assert!(state.streams.is_empty());

        expect_peer_event(next(&mut alice).await, EventKind::Added, "slow");
        expect_stream_event(next(&mut alice).await, EventKind::Added, "slow-cam");
        expect_peer_event(next(&mut alice).await, EventKind::Added, "carol");
        expect_stream_event(next(&mut alice).await, EventKind::Removed, "slow-cam");
        expect_peer_event(next(&mut alice).await, EventKind::Removed, "slow");

        match next(&mut carol).await {
            Envelope::JoinReply(reply) => assert_eq!(reply.peers.len(), 2),
            other => panic!("expected JoinReply, got {other:?}"),
        }
        expect_stream_event(next(&mut carol).await, EventKind::Removed, "slow-cam");
        expect_peer_event(next(&mut carol).await, EventKind::Removed, "slow");

        // The evicted queue holds what fit and is then closed by the room.
        assert!(matches!(slow_rx.recv().await, Some(Envelope::JoinReply(_))));
        assert!(slow_rx.recv().await.is_none());

        assert!(matches!(
            room.leave(PeerId::new("slow")).await,
            Err(RoomError::ProtocolUsage(_))
        ));

        room.cancel();
    }

    #[tokio::test]
    async fn test_backlogged_member_within_capacity_gets_every_event() {
        let (room, _task) = spawn_room(10);

        let (r, mut alice) = join(&room, "alice", 1).await;
        r.unwrap();
        let mut others = Vec::new();
        for name in ["bob", "carol", "dave"] {
            let (r, rx) = join(&room, name, 1).await;
            r.unwrap();
            others.push(rx);
        }
        room.leave(PeerId::new("carol")).await.unwrap();

        // Nothing was drained until now.
        let _ = next(&mut alice).await; // join reply
        expect_peer_event(next(&mut alice).await, EventKind::Added, "bob");
        expect_peer_event(next(&mut alice).await, EventKind::Added, "carol");
        expect_peer_event(next(&mut alice).await, EventKind::Added, "dave");
        expect_peer_event(next(&mut alice).await, EventKind::Removed, "carol");
        assert_eq!(room.get_state().await.unwrap().peers.len(), 3);

        room.cancel();
    }

    #[tokio::test]
    async fn test_close_if_empty() {
        let (room, task) = spawn_room(10);

        let (r, _rx) = join(&room, "alice", 1).await;
        r.unwrap();
        assert!(!room.close_if_empty().await.unwrap());

        room.leave(PeerId::new("alice")).await.unwrap();
        assert!(room.close_if_empty().await.unwrap());

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("room task should exit")
            .unwrap();
        assert!(matches!(
            room.get_state().await,
            Err(RoomError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_cancellation_stops_room() {
        let (room, task) = spawn_room(10);
        room.cancel();
        assert!(room.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("room task should exit")
            .unwrap();
        assert!(room.is_closed());
    }
}
