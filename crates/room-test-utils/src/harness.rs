//! In-process room service for end-to-end tests.
//!
//! `TestService` runs the real actor hierarchy with mock collaborators.
//! Peers connect through the same queues the WebSocket transport uses,
//! either as a raw envelope pipe (`RawPeer`) or through the client
//! `SignalingChannel`.
//!
//! # Example
//!
//! ```rust,ignore
//! let service = TestService::builder().max_peers_per_room(2).build();
//! let mut alice = service.raw_peer();
//! alice.send(join_envelope(1, "lobby", "alice")).await;
//! let reply = alice.recv().await;
//! ```

use crate::mock_auth::MockAuthorizer;
use crate::mock_negotiator::RecordingNegotiator;

use room_service::actors::{
    open_session, ActorMetrics, RoomControllerHandle, SessionConnection, SessionContext,
    SessionHandle,
};
use rtc_client::{ChannelEvents, EnvelopeTransport, SignalingChannel};
use signaling_protocol::Envelope;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How long `RawPeer::recv` waits before failing the test.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Room service with mock collaborators.
pub struct TestService {
    pub ctx: SessionContext,
    pub authorizer: Arc<MockAuthorizer>,
    pub negotiator: Arc<RecordingNegotiator>,
}

impl TestService {
    #[must_use]
    pub fn builder() -> TestServiceBuilder {
        TestServiceBuilder::default()
    }

    /// Service with default limits and an allow-all authorizer.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn controller(&self) -> &RoomControllerHandle {
        &self.ctx.controller
    }

    pub fn metrics(&self) -> &Arc<ActorMetrics> {
        self.ctx.controller.metrics()
    }

    /// Open a session and expose its raw envelope queues.
    pub fn raw_peer(&self) -> RawPeer {
        let SessionConnection {
            to_server,
            from_server,
            handle,
            task,
        } = open_session(&self.ctx);
        RawPeer {
            to_server: Some(to_server),
            from_server,
            handle,
            task: Some(task),
        }
    }

    /// Open a session and wrap it in a client signaling channel.
    pub fn connect(&self) -> (SignalingChannel, ChannelEvents, SessionHandle) {
        let conn = open_session(&self.ctx);
        let (channel, events, _task) = SignalingChannel::open(EnvelopeTransport {
            outbound: conn.to_server,
            inbound: conn.from_server,
        });
        (channel, events, conn.handle)
    }
}

impl Default for TestService {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TestService`.
pub struct TestServiceBuilder {
    max_rooms: usize,
    max_peers_per_room: usize,
    authorizer: MockAuthorizer,
}

impl Default for TestServiceBuilder {
    fn default() -> Self {
        Self {
            max_rooms: 16,
            max_peers_per_room: 16,
            authorizer: MockAuthorizer::allowing(),
        }
    }
}

impl TestServiceBuilder {
    #[must_use]
    pub fn max_rooms(mut self, max_rooms: usize) -> Self {
        self.max_rooms = max_rooms;
        self
    }

    #[must_use]
    pub fn max_peers_per_room(mut self, max_peers: usize) -> Self {
        self.max_peers_per_room = max_peers;
        self
    }

    #[must_use]
    pub fn authorizer(mut self, authorizer: MockAuthorizer) -> Self {
        self.authorizer = authorizer;
        self
    }

    #[must_use]
    pub fn build(self) -> TestService {
        let controller = RoomControllerHandle::new(
            self.max_rooms,
            self.max_peers_per_room,
            ActorMetrics::new(),
        );
        let authorizer = Arc::new(self.authorizer);
        let negotiator = Arc::new(RecordingNegotiator::new());
        let ctx = SessionContext {
            controller,
            authorizer: Arc::clone(&authorizer) as _,
            negotiator: Arc::clone(&negotiator) as _,
        };
        TestService {
            ctx,
            authorizer,
            negotiator,
        }
    }
}

/// A connected peer speaking raw envelopes.
pub struct RawPeer {
    to_server: Option<mpsc::Sender<Envelope>>,
    from_server: mpsc::Receiver<Envelope>,
    pub handle: SessionHandle,
    task: Option<JoinHandle<()>>,
}

impl RawPeer {
    pub async fn send(&self, envelope: Envelope) {
        self.to_server
            .as_ref()
            .expect("peer already disconnected")
            .send(envelope)
            .await
            .expect("session inbound queue closed");
    }

    /// Next envelope from the server. Fails the test after `RECV_TIMEOUT`.
    pub async fn recv(&mut self) -> Envelope {
        tokio::time::timeout(RECV_TIMEOUT, self.from_server.recv())
            .await
            .expect("timed out waiting for an envelope")
            .expect("session outbound queue closed")
    }

    /// Next envelope, or `None` if nothing arrives within `wait`.
    pub async fn try_recv_within(&mut self, wait: Duration) -> Option<Envelope> {
        tokio::time::timeout(wait, self.from_server.recv())
            .await
            .ok()
            .flatten()
    }

    /// Drop the inbound queue, as a broken connection would, and wait for the
    /// session to finish.
    pub async fn disconnect(&mut self) {
        self.to_server.take();
        if let Some(task) = self.task.take() {
            tokio::time::timeout(RECV_TIMEOUT, task)
                .await
                .expect("session did not stop after disconnect")
                .expect("session task panicked");
        }
    }
}
