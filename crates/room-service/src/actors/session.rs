//! `SessionActor` - one per signaling connection.
//!
//! The session actor owns the peer's lifecycle:
//!
//! ```text
//! Unjoined --Join(ok)--> Joined --Leave / disconnect--> Left
//! ```
//!
//! `Left` is terminal. A session holds at most one room membership. A room
//! that evicts the member for falling behind cancels the membership token,
//! which ends the session like a disconnect.
//!
//! Inbound envelopes arrive on an `mpsc` queue fed by the transport. Replies
//! and room events are written to the outbound queue, which the transport
//! drains. The room actor writes directly into the same outbound queue, so
//! the accepted `JoinReply` always precedes events about other peers.

use crate::auth::{AuthDecision, Authorizer};
use crate::errors::RoomError;
use crate::negotiation::Negotiator;
use crate::observability::metrics as prom;

use super::controller::RoomControllerHandle;
use super::messages::{SessionMessage, SessionPhase, SessionStatus};
use super::metrics::{ActorType, MailboxMonitor};
use super::room::RoomHandle;

use common::types::{PeerId, RoomId};
use signaling_protocol::{
    Envelope, JoinReply, JoinRequest, LeaveReply, LeaveRequest, Message, PeerInfo, RequestId,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Inbound queue size (transport -> session).
pub const SESSION_INBOUND_BUFFER: usize = 64;

/// Outbound queue size (session and room -> transport).
pub const SESSION_OUTBOUND_BUFFER: usize = 256;

const SESSION_CONTROL_BUFFER: usize = 8;

/// How many times a join is retried when the room actor closes under it.
const JOIN_ATTEMPTS: usize = 3;

/// Everything a session needs from the rest of the service.
#[derive(Clone)]
pub struct SessionContext {
    pub controller: RoomControllerHandle,
    pub authorizer: Arc<dyn Authorizer>,
    pub negotiator: Arc<dyn Negotiator>,
}

/// Handle to a `SessionActor`.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
    session_id: String,
}

impl SessionHandle {
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current lifecycle status.
    ///
    /// # Errors
    ///
    /// `ChannelClosed` once the session has ended.
    pub async fn get_status(&self) -> Result<SessionStatus, RoomError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SessionMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|_| RoomError::ChannelClosed)?;

        rx.await.map_err(|_| RoomError::ChannelClosed)
    }

    /// Close the session as if the connection dropped.
    ///
    /// # Errors
    ///
    /// `ChannelClosed` if the session has already ended.
    pub async fn close(&self, reason: impl Into<String>) -> Result<(), RoomError> {
        self.sender
            .send(SessionMessage::Close {
                reason: reason.into(),
            })
            .await
            .map_err(|_| RoomError::ChannelClosed)
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The client-facing ends of a freshly opened session.
pub struct SessionConnection {
    /// Envelopes from the client.
    pub to_server: mpsc::Sender<Envelope>,
    /// Envelopes for the client.
    pub from_server: mpsc::Receiver<Envelope>,
    pub handle: SessionHandle,
    pub task: JoinHandle<()>,
}

/// Open a session with fresh queues.
#[must_use]
pub fn open_session(ctx: &SessionContext) -> SessionConnection {
    let (to_server, inbound) = mpsc::channel(SESSION_INBOUND_BUFFER);
    let (outbound, from_server) = mpsc::channel(SESSION_OUTBOUND_BUFFER);
    let session_id = format!("session-{}", Uuid::new_v4());

    let (handle, task) = SessionActor::spawn(
        session_id,
        ctx.clone(),
        inbound,
        outbound,
        ctx.controller.child_token(),
    );

    SessionConnection {
        to_server,
        from_server,
        handle,
        task,
    }
}

enum Phase {
    Unjoined,
    Joined { room: RoomHandle, peer_id: PeerId },
    Left,
}

impl Phase {
    fn as_status(&self) -> SessionStatus {
        match self {
            Phase::Unjoined => SessionStatus {
                phase: SessionPhase::Unjoined,
                room_id: None,
                peer_id: None,
            },
            Phase::Joined { room, peer_id } => SessionStatus {
                phase: SessionPhase::Joined,
                room_id: Some(room.room_id().clone()),
                peer_id: Some(peer_id.clone()),
            },
            Phase::Left => SessionStatus {
                phase: SessionPhase::Left,
                room_id: None,
                peer_id: None,
            },
        }
    }
}

/// The `SessionActor` implementation.
pub struct SessionActor {
    session_id: String,
    ctx: SessionContext,
    inbound: mpsc::Receiver<Envelope>,
    outbound: mpsc::Sender<Envelope>,
    control: mpsc::Receiver<SessionMessage>,
    cancel_token: CancellationToken,
    /// Cancelled by the room on eviction. Replaced on every join.
    membership: CancellationToken,
    phase: Phase,
    mailbox: MailboxMonitor,
}

impl SessionActor {
    /// Spawn a session actor over the given queues.
    pub fn spawn(
        session_id: String,
        ctx: SessionContext,
        inbound: mpsc::Receiver<Envelope>,
        outbound: mpsc::Sender<Envelope>,
        cancel_token: CancellationToken,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (sender, control) = mpsc::channel(SESSION_CONTROL_BUFFER);

        let actor = Self {
            mailbox: MailboxMonitor::new(ActorType::Session, &session_id),
            session_id: session_id.clone(),
            ctx,
            inbound,
            outbound,
            control,
            cancel_token: cancel_token.clone(),
            membership: CancellationToken::new(),
            phase: Phase::Unjoined,
        };

        let task = tokio::spawn(actor.run());

        let handle = SessionHandle {
            sender,
            cancel_token,
            session_id,
        };

        (handle, task)
    }

    #[instrument(skip_all, name = "rs.actor.session", fields(session_id = %self.session_id))]
    async fn run(mut self) {
        let metrics = Arc::clone(self.ctx.controller.metrics());
        metrics.session_opened();

        debug!(
            target: "rs.actor.session",
            session_id = %self.session_id,
            "SessionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "rs.actor.session",
                        session_id = %self.session_id,
                        "SessionActor received cancellation signal"
                    );
                    self.leave_room().await;
                    break;
                }

                () = self.membership.cancelled() => {
                    self.evicted();
                    break;
                }

                envelope = self.inbound.recv() => {
                    let Some(envelope) = envelope else {
                        debug!(
                            target: "rs.actor.session",
                            session_id = %self.session_id,
                            "Inbound stream ended, disconnecting"
                        );
                        self.leave_room().await;
                        break;
                    };

                    self.mailbox.record_enqueue();
                    self.handle_envelope(envelope).await;
                    self.mailbox.record_dequeue();
                    metrics.record_message_processed();
                }

                Some(message) = self.control.recv() => {
                    match message {
                        SessionMessage::GetStatus { respond_to } => {
                            let _ = respond_to.send(self.phase.as_status());
                        }
                        SessionMessage::Close { reason } => {
                            info!(
                                target: "rs.actor.session",
                                session_id = %self.session_id,
                                reason = %reason,
                                "Session closed by server"
                            );
                            self.leave_room().await;
                            break;
                        }
                    }
                }
            }
        }

        metrics.session_closed();

        debug!(
            target: "rs.actor.session",
            session_id = %self.session_id,
            messages_processed = self.mailbox.messages_processed(),
            "SessionActor stopped"
        );
    }

    async fn handle_envelope(&mut self, envelope: Envelope) {
        let envelope_type = envelope.type_name();
        let started = Instant::now();
        prom::record_envelope(envelope_type);

        match envelope {
            Envelope::Join(request) => self.handle_join(request).await,
            Envelope::Leave(request) => self.handle_leave(request).await,
            Envelope::Message(message) => self.handle_message(message).await,
            Envelope::JoinReply(_)
            | Envelope::LeaveReply(_)
            | Envelope::PeerEvent(_)
            | Envelope::StreamEvent(_) => {
                warn!(
                    target: "rs.actor.session",
                    session_id = %self.session_id,
                    envelope_type,
                    "Dropping server-only envelope sent by client"
                );
                prom::record_message_dropped("unexpected_type");
            }
        }

        prom::record_message_latency(envelope_type, started.elapsed());
    }

    async fn handle_join(&mut self, request: JoinRequest) {
        let request_id = request.request_id;

        let rejection = match &self.phase {
            Phase::Joined { .. } => Some("already joined"),
            Phase::Left => Some("session has left"),
            Phase::Unjoined => None,
        };
        if let Some(reason) = rejection {
            prom::record_join("rejected");
            self.reply_join_failure(request_id, reason).await;
            return;
        }

        let JoinRequest {
            room: room_id,
            peer,
            token,
            ..
        } = request;

        if let AuthDecision::Deny(reason) = self
            .ctx
            .authorizer
            .validate(&token, &peer.id, &room_id)
            .await
        {
            info!(
                target: "rs.actor.session",
                session_id = %self.session_id,
                room_id = %room_id,
                "Join denied by authorizer"
            );
            prom::record_join("denied");
            self.reply_join_failure(request_id, &reason).await;
            return;
        }

        let peer_id = peer.id.clone();
        let membership = CancellationToken::new();
        match self.admit(request_id, &room_id, peer, &membership).await {
            Ok(room) => {
                self.membership = membership;
                info!(
                    target: "rs.actor.session",
                    session_id = %self.session_id,
                    room_id = %room_id,
                    peer_id = %peer_id,
                    "Session joined room"
                );
                prom::record_join("accepted");
                self.phase = Phase::Joined { room, peer_id };
            }
            Err(e) => {
                info!(
                    target: "rs.actor.session",
                    session_id = %self.session_id,
                    room_id = %room_id,
                    error = %e,
                    "Join rejected"
                );
                prom::record_join("rejected");
                self.reply_join_failure(request_id, &e.client_message()).await;
            }
        }
    }

    /// Find or create the room and join it. A room that closes between
    /// lookup and join is looked up again.
    async fn admit(
        &self,
        request_id: RequestId,
        room_id: &RoomId,
        peer: PeerInfo,
        membership: &CancellationToken,
    ) -> Result<RoomHandle, RoomError> {
        for attempt in 1..=JOIN_ATTEMPTS {
            let room = self
                .ctx
                .controller
                .get_or_create_room(room_id.clone())
                .await?;

            match room
                .join(
                    request_id,
                    peer.clone(),
                    self.outbound.clone(),
                    membership.clone(),
                )
                .await
            {
                Ok(()) => return Ok(room),
                Err(RoomError::ChannelClosed) => {
                    debug!(
                        target: "rs.actor.session",
                        session_id = %self.session_id,
                        attempt,
                        "Room closed during join, retrying"
                    );
                }
                Err(e) => {
                    let _ = self
                        .ctx
                        .controller
                        .remove_room_if_empty(room_id.clone())
                        .await;
                    return Err(e);
                }
            }
        }

        Err(RoomError::ChannelClosed)
    }

    async fn handle_leave(&mut self, request: LeaveRequest) {
        let reason = match &self.phase {
            Phase::Unjoined => Some("not joined"),
            Phase::Left => Some("session has left"),
            Phase::Joined { peer_id, .. } if *peer_id != request.uid => {
                Some("uid does not match this session")
            }
            Phase::Joined { .. } => None,
        };

        if reason.is_none() {
            self.leave_room().await;
        }

        self.send(Envelope::LeaveReply(LeaveReply {
            request_id: request.request_id,
            reason: reason.map(str::to_string),
        }))
        .await;
    }

    async fn handle_message(&mut self, message: Message) {
        let Phase::Joined { room, peer_id } = &self.phase else {
            warn!(
                target: "rs.actor.session",
                session_id = %self.session_id,
                "Dropping message from session that has not joined"
            );
            prom::record_message_dropped("unjoined");
            return;
        };

        match message.to {
            Some(target) => {
                if let Err(e) = room.relay(peer_id.clone(), target, message.payload).await {
                    warn!(
                        target: "rs.actor.session",
                        session_id = %self.session_id,
                        error = %e,
                        "Failed to relay message"
                    );
                }
            }
            None => {
                self.ctx
                    .negotiator
                    .on_message(room.clone(), peer_id.clone(), message.payload)
                    .await;
            }
        }
    }

    /// Leave the current room (if any) and move to `Left`.
    async fn leave_room(&mut self) {
        self.membership = CancellationToken::new();
        let previous = std::mem::replace(&mut self.phase, Phase::Left);
        let Phase::Joined { room, peer_id } = previous else {
            return;
        };

        match room.leave(peer_id.clone()).await {
            Ok(0) => {
                let _ = self
                    .ctx
                    .controller
                    .remove_room_if_empty(room.room_id().clone())
                    .await;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(
                    target: "rs.actor.session",
                    session_id = %self.session_id,
                    error = %e,
                    "Room leave failed, room already gone"
                );
            }
        }

        info!(
            target: "rs.actor.session",
            session_id = %self.session_id,
            room_id = %room.room_id(),
            peer_id = %peer_id,
            "Session left room"
        );
    }

    /// The room already removed this member and told the others.
    fn evicted(&mut self) {
        let previous = std::mem::replace(&mut self.phase, Phase::Left);
        if let Phase::Joined { room, peer_id } = previous {
            warn!(
                target: "rs.actor.session",
                session_id = %self.session_id,
                room_id = %room.room_id(),
                peer_id = %peer_id,
                "Evicted from room for falling behind, closing session"
            );
        }
    }

    async fn reply_join_failure(&self, request_id: RequestId, reason: &str) {
        self.send(Envelope::JoinReply(JoinReply::rejected(request_id, reason)))
            .await;
    }

    async fn send(&self, envelope: Envelope) {
        if self.outbound.send(envelope).await.is_err() {
            debug!(
                target: "rs.actor.session",
                session_id = %self.session_id,
                "Outbound closed, reply dropped"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::actors::ActorMetrics;
    use crate::auth::AllowAll;
    use crate::negotiation::LoggingNegotiator;
    use std::time::Duration;

    fn context() -> SessionContext {
        SessionContext {
            controller: RoomControllerHandle::new(10, 10, ActorMetrics::new()),
            authorizer: Arc::new(AllowAll),
            negotiator: Arc::new(LoggingNegotiator),
        }
    }

    fn join_request(request_id: u64, room: &str, peer: &str) -> Envelope {
        Envelope::Join(JoinRequest {
            request_id: RequestId(request_id),
            room: RoomId::new(room),
            peer: PeerInfo::new(peer),
            token: String::new(),
        })
    }

    async fn next(rx: &mut mpsc::Receiver<Envelope>) -> Envelope {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for envelope")
            .expect("outbound closed")
    }

    #[tokio::test]
    async fn test_join_then_join_again_is_rejected() {
        let ctx = context();
        let mut conn = open_session(&ctx);

        conn.to_server.send(join_request(1, "lobby", "alice")).await.unwrap();
        match next(&mut conn.from_server).await {
            Envelope::JoinReply(reply) => assert!(reply.success),
            other => panic!("expected JoinReply, got {other:?}"),
        }

        conn.to_server.send(join_request(2, "lobby", "alice")).await.unwrap();
        match next(&mut conn.from_server).await {
            Envelope::JoinReply(reply) => {
                assert!(!reply.success);
                assert_eq!(reply.request_id, RequestId(2));
                assert_eq!(reply.reason.as_deref(), Some("already joined"));
            }
            other => panic!("expected JoinReply, got {other:?}"),
        }

        let status = conn.handle.get_status().await.unwrap();
        assert_eq!(status.phase, SessionPhase::Joined);
        assert_eq!(status.room_id, Some(RoomId::new("lobby")));

        ctx.controller.cancel();
    }

    #[tokio::test]
    async fn test_leave_from_unjoined_has_reason() {
        let ctx = context();
        let mut conn = open_session(&ctx);

        conn.to_server
            .send(Envelope::Leave(LeaveRequest {
                request_id: RequestId(9),
                uid: PeerId::new("alice"),
            }))
            .await
            .unwrap();

        match next(&mut conn.from_server).await {
            Envelope::LeaveReply(reply) => {
                assert_eq!(reply.request_id, RequestId(9));
                assert_eq!(reply.reason.as_deref(), Some("not joined"));
            }
            other => panic!("expected LeaveReply, got {other:?}"),
        }

        assert_eq!(
            conn.handle.get_status().await.unwrap().phase,
            SessionPhase::Unjoined
        );
        ctx.controller.cancel();
    }

    #[tokio::test]
    async fn test_leave_is_terminal() {
        let ctx = context();
        let mut conn = open_session(&ctx);

        conn.to_server.send(join_request(1, "lobby", "alice")).await.unwrap();
        let _ = next(&mut conn.from_server).await;

        conn.to_server
            .send(Envelope::Leave(LeaveRequest {
                request_id: RequestId(2),
                uid: PeerId::new("mallory"),
            }))
            .await
            .unwrap();
        match next(&mut conn.from_server).await {
            Envelope::LeaveReply(reply) => assert!(reply.reason.is_some()),
            other => panic!("expected LeaveReply, got {other:?}"),
        }

        conn.to_server
            .send(Envelope::Leave(LeaveRequest {
                request_id: RequestId(3),
                uid: PeerId::new("alice"),
            }))
            .await
            .unwrap();
        match next(&mut conn.from_server).await {
            Envelope::LeaveReply(reply) => assert_eq!(reply.reason, None),
            other => panic!("expected LeaveReply, got {other:?}"),
        }

        conn.to_server.send(join_request(4, "lobby", "alice")).await.unwrap();
        match next(&mut conn.from_server).await {
            Envelope::JoinReply(reply) => {
                assert!(!reply.success);
                assert_eq!(reply.reason.as_deref(), Some("session has left"));
            }
            other => panic!("expected JoinReply, got {other:?}"),
        }

        // The emptied room was removed.
        assert_eq!(ctx.controller.get_status().await.unwrap().room_count, 0);
        ctx.controller.cancel();
    }

    #[tokio::test]
    async fn test_disconnect_ends_session() {
        let ctx = context();
        let conn = open_session(&ctx);

        let SessionConnection {
            to_server,
            from_server: _from_server,
            handle,
            task,
        } = conn;
        to_server.send(join_request(1, "lobby", "alice")).await.unwrap();
        drop(to_server);

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("session should end")
            .unwrap();
        assert!(handle.get_status().await.is_err());
        ctx.controller.cancel();
    }

    #[tokio::test]
    async fn test_eviction_ends_session() {
        let ctx = context();
        let (to_server, inbound) = mpsc::channel(SESSION_INBOUND_BUFFER);
        // Room for the JoinReply only; the test never drains it.
        let (outbound, mut from_server) = mpsc::channel(1);
        let (handle, task) = SessionActor::spawn(
            "session-slow".to_string(),
            ctx.clone(),
            inbound,
            outbound,
            ctx.controller.child_token(),
        );
        to_server.send(join_request(1, "lobby", "slow")).await.unwrap();

        let room = loop {
            if let Ok(room) = ctx.controller.get_or_create_room(RoomId::new("lobby")).await {
                if room.get_state().await.unwrap().peers.len() == 1 {
                    break room;
                }
            }
            tokio::task::yield_now().await;
        };

        let (bob_tx, _bob_rx) = mpsc::channel(8);
        room.join(
            RequestId(1),
            PeerInfo::new("bob"),
            bob_tx,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("evicted session should end")
            .unwrap();
        assert!(handle.get_status().await.is_err());

        let peers = room.get_state().await.unwrap().peers;
        assert_eq!(peers.len(), 1);
        assert_eq!(peers.first().unwrap().id, PeerId::new("bob"));

        assert!(matches!(next(&mut from_server).await, Envelope::JoinReply(_)));
        assert!(from_server.recv().await.is_none());
        ctx.controller.cancel();
    }
}
