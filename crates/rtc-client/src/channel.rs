//! `SignalingChannel` - client end of the signaling stream.
//!
//! A reader task owns the stream. It assigns every request a fresh
//! [`RequestId`], keeps the pending reply slot until the matching reply
//! arrives and forwards server-pushed envelopes to the event stream in
//! arrival order. An accepted `JoinReply` is also copied into the event
//! stream at its arrival position, so its room snapshot is applied in order
//! with the events that follow it.
//!
//! Because replies are matched by id, several requests of the same kind may
//! be outstanding at once.
//!
//! Closing the channel, or the inbound stream ending, fails every pending
//! request with [`ClientError::ChannelClosed`] and ends the event stream.

use crate::errors::ClientError;

use common::types::{PeerId, RoomId};
use signaling_protocol::{
    Envelope, JoinReply, JoinRequest, LeaveReply, LeaveRequest, Message, PeerInfo, RequestId,
    RequestKind,
};
use std::collections::HashMap;
use std::ops::ControlFlow;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const COMMAND_BUFFER: usize = 32;

/// Envelope queues a concrete transport (WebSocket, in-process) bridges to.
#[derive(Debug)]
pub struct EnvelopeTransport {
    /// Envelopes to the server.
    pub outbound: mpsc::Sender<Envelope>,
    /// Envelopes from the server.
    pub inbound: mpsc::Receiver<Envelope>,
}

/// Server-pushed envelopes (peer events, stream events, relayed messages)
/// plus a copy of every accepted `JoinReply`.
pub type ChannelEvents = mpsc::UnboundedReceiver<Envelope>;

/// A request before it is assigned an id.
#[derive(Debug, Clone)]
pub enum Request {
    Join {
        room: RoomId,
        peer: PeerInfo,
        token: String,
    },
    Leave {
        uid: PeerId,
    },
}

impl Request {
    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        match self {
            Request::Join { .. } => RequestKind::Join,
            Request::Leave { .. } => RequestKind::Leave,
        }
    }

    fn into_envelope(self, request_id: RequestId) -> Envelope {
        match self {
            Request::Join { room, peer, token } => Envelope::Join(JoinRequest {
                request_id,
                room,
                peer,
                token,
            }),
            Request::Leave { uid } => Envelope::Leave(LeaveRequest { request_id, uid }),
        }
    }
}

type ReplySlot = oneshot::Sender<Result<Envelope, ClientError>>;

enum ChannelCommand {
    Request {
        request: Request,
        reply: ReplySlot,
        respond_to: oneshot::Sender<Result<RequestId, ClientError>>,
    },
    Send {
        envelope: Envelope,
        respond_to: oneshot::Sender<Result<(), ClientError>>,
    },
    PendingCount {
        respond_to: oneshot::Sender<usize>,
    },
}

/// A sent request waiting for its reply.
#[derive(Debug)]
pub struct PendingReply {
    request_id: RequestId,
    kind: RequestKind,
    receiver: oneshot::Receiver<Result<Envelope, ClientError>>,
}

impl PendingReply {
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Wait for the reply. No timeout is applied.
    ///
    /// # Errors
    ///
    /// `ChannelClosed` if the channel closes first.
    pub async fn wait(self) -> Result<Envelope, ClientError> {
        self.receiver
            .await
            .map_err(|_| ClientError::ChannelClosed)?
    }
}

/// Handle to the signaling channel.
#[derive(Debug, Clone)]
pub struct SignalingChannel {
    sender: mpsc::Sender<ChannelCommand>,
    cancel_token: CancellationToken,
}

impl SignalingChannel {
    /// Start the reader task over `transport`.
    ///
    /// Returns the handle, the event stream and the task join handle.
    #[must_use]
    pub fn open(transport: EnvelopeTransport) -> (Self, ChannelEvents, JoinHandle<()>) {
        let (sender, commands) = mpsc::channel(COMMAND_BUFFER);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel_token = CancellationToken::new();

        let actor = ChannelActor {
            commands,
            outbound: transport.outbound,
            inbound: transport.inbound,
            events: events_tx,
            pending: HashMap::new(),
            next_request_id: 1,
            cancel_token: cancel_token.clone(),
        };
        let task = tokio::spawn(actor.run());

        (
            Self {
                sender,
                cancel_token,
            },
            events_rx,
            task,
        )
    }

    /// Transmit a request and return its pending reply.
    ///
    /// # Errors
    ///
    /// `ChannelClosed` if the channel is closed.
    pub async fn send_request(&self, request: Request) -> Result<PendingReply, ClientError> {
        if self.is_closed() {
            return Err(ClientError::ChannelClosed);
        }

        let kind = request.kind();
        let (reply_tx, reply_rx) = oneshot::channel();
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ChannelCommand::Request {
                request,
                reply: reply_tx,
                respond_to: tx,
            })
            .await
            .map_err(|_| ClientError::ChannelClosed)?;

        let request_id = rx.await.map_err(|_| ClientError::ChannelClosed)??;
        Ok(PendingReply {
            request_id,
            kind,
            receiver: reply_rx,
        })
    }

    /// Join `room` as `peer` and wait for the reply.
    ///
    /// A denied join is a `JoinReply` with `success == false`, not an error.
    ///
    /// # Errors
    ///
    /// `ChannelClosed` if the channel closes before the reply arrives.
    pub async fn join(
        &self,
        room: RoomId,
        peer: PeerInfo,
        token: impl Into<String>,
    ) -> Result<JoinReply, ClientError> {
        let pending = self
            .send_request(Request::Join {
                room,
                peer,
                token: token.into(),
            })
            .await?;

        match pending.wait().await? {
            Envelope::JoinReply(reply) => Ok(reply),
            other => Err(ClientError::ProtocolUsage(format!(
                "unexpected {} in reply to join",
                other.type_name()
            ))),
        }
    }

    /// Leave the current room and wait for the reply.
    ///
    /// # Errors
    ///
    /// `ChannelClosed` if the channel closes before the reply arrives.
    pub async fn leave(&self, uid: PeerId) -> Result<LeaveReply, ClientError> {
        let pending = self.send_request(Request::Leave { uid }).await?;

        match pending.wait().await? {
            Envelope::LeaveReply(reply) => Ok(reply),
            other => Err(ClientError::ProtocolUsage(format!(
                "unexpected {} in reply to leave",
                other.type_name()
            ))),
        }
    }

    /// Send an opaque message. Fire-and-forget.
    ///
    /// # Errors
    ///
    /// `ChannelClosed` if the channel is closed.
    pub async fn send_message(&self, message: Message) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::ChannelClosed);
        }

        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ChannelCommand::Send {
                envelope: Envelope::Message(message),
                respond_to: tx,
            })
            .await
            .map_err(|_| ClientError::ChannelClosed)?;

        rx.await.map_err(|_| ClientError::ChannelClosed)?
    }

    /// Number of requests still waiting for a reply.
    ///
    /// # Errors
    ///
    /// `ChannelClosed` if the channel is closed.
    pub async fn pending_requests(&self) -> Result<usize, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ChannelCommand::PendingCount { respond_to: tx })
            .await
            .map_err(|_| ClientError::ChannelClosed)?;

        rx.await.map_err(|_| ClientError::ChannelClosed)
    }

    /// Close the channel. Pending requests fail with `ChannelClosed`.
    pub fn close(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancel_token.is_cancelled() || self.sender.is_closed()
    }
}

struct PendingRequest {
    kind: RequestKind,
    reply: ReplySlot,
}

struct ChannelActor {
    commands: mpsc::Receiver<ChannelCommand>,
    outbound: mpsc::Sender<Envelope>,
    inbound: mpsc::Receiver<Envelope>,
    events: mpsc::UnboundedSender<Envelope>,
    pending: HashMap<RequestId, PendingRequest>,
    next_request_id: u64,
    cancel_token: CancellationToken,
}

impl ChannelActor {
    #[instrument(skip_all, name = "rc.channel")]
    async fn run(mut self) {
        debug!(target: "rc.channel", "Signaling channel opened");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(target: "rc.channel", "Signaling channel closed locally");
                    break;
                }

                command = self.commands.recv() => {
                    let Some(command) = command else {
                        debug!(target: "rc.channel", "All channel handles dropped");
                        break;
                    };
                    if self.handle_command(command).await.is_break() {
                        break;
                    }
                }

                envelope = self.inbound.recv() => {
                    let Some(envelope) = envelope else {
                        info!(target: "rc.channel", "Signaling stream ended");
                        break;
                    };
                    self.handle_inbound(envelope);
                }
            }
        }

        // Make the closed state visible to handles before failing waiters.
        self.cancel_token.cancel();
        self.fail_pending();
    }

    async fn handle_command(&mut self, command: ChannelCommand) -> ControlFlow<()> {
        match command {
            ChannelCommand::Request {
                request,
                reply,
                respond_to,
            } => {
                let request_id = RequestId(self.next_request_id);
                self.next_request_id += 1;

                // Register first so a fast reply always finds its slot.
                self.pending.insert(
                    request_id,
                    PendingRequest {
                        kind: request.kind(),
                        reply,
                    },
                );

                if self.outbound.send(request.into_envelope(request_id)).await.is_err() {
                    self.pending.remove(&request_id);
                    let _ = respond_to.send(Err(ClientError::ChannelClosed));
                    return ControlFlow::Break(());
                }
                let _ = respond_to.send(Ok(request_id));
            }
            ChannelCommand::Send {
                envelope,
                respond_to,
            } => {
                if self.outbound.send(envelope).await.is_err() {
                    let _ = respond_to.send(Err(ClientError::ChannelClosed));
                    return ControlFlow::Break(());
                }
                let _ = respond_to.send(Ok(()));
            }
            ChannelCommand::PendingCount { respond_to } => {
                let _ = respond_to.send(self.pending.len());
            }
        }
        ControlFlow::Continue(())
    }

    fn handle_inbound(&mut self, envelope: Envelope) {
        if let (Some(kind), Some(request_id)) = (envelope.reply_kind(), envelope.request_id()) {
            match self.pending.get(&request_id) {
                Some(pending) if pending.kind == kind => {
                    if matches!(&envelope, Envelope::JoinReply(reply) if reply.success) {
                        self.forward_event(envelope.clone());
                    }
                    if let Some(pending) = self.pending.remove(&request_id) {
                        let _ = pending.reply.send(Ok(envelope));
                    }
                }
                Some(pending) => {
                    warn!(
                        target: "rc.channel",
                        request_id = %request_id,
                        expected = pending.kind.as_str(),
                        received = kind.as_str(),
                        "Dropping reply of the wrong kind"
                    );
                }
                None => {
                    warn!(
                        target: "rc.channel",
                        request_id = %request_id,
                        "Dropping reply with no pending request"
                    );
                }
            }
            return;
        }

        if envelope.is_event() {
            self.forward_event(envelope);
            return;
        }

        warn!(
            target: "rc.channel",
            envelope_type = envelope.type_name(),
            "Dropping request envelope sent by the server"
        );
    }

    fn forward_event(&self, envelope: Envelope) {
        if self.events.send(envelope).is_err() {
            debug!(target: "rc.channel", "Event receiver dropped, discarding event");
        }
    }

    fn fail_pending(&mut self) {
        let count = self.pending.len();
        for (_, pending) in self.pending.drain() {
            let _ = pending.reply.send(Err(ClientError::ChannelClosed));
        }
        if count > 0 {
            debug!(
                target: "rc.channel",
                count,
                "Failed pending requests on close"
            );
        }
    }
}
