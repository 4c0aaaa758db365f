//! `RoomControllerActor` - singleton supervisor for room actors.
//!
//! - Creates a `RoomActor` the first time a room id is joined
//! - Removes it once the last peer leaves
//! - Enforces `max_rooms`; hands `max_peers_per_room` to every room
//! - Owns the root `CancellationToken`; rooms and sessions get child tokens
//! - Detects room actors that exited or panicked
//!
//! # Graceful Shutdown
//!
//! On SIGTERM, the controller:
//! 1. Sets `accepting_new = false` (new joins get `Draining`)
//! 2. Cancels the root token, which reaches every room and session
//! 3. Waits up to the deadline for room tasks to finish

use crate::errors::RoomError;

use super::messages::{ControllerMessage, ControllerStatus, RoomInfo};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomHandle};

use common::types::RoomId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the controller mailbox.
const CONTROLLER_CHANNEL_BUFFER: usize = 1000;

/// How long removal waits for a closed room's task in the background.
const ROOM_CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Default shutdown deadline when cancelled without an explicit `Shutdown`.
const DEFAULT_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// Handle to the `RoomControllerActor`.
#[derive(Clone)]
pub struct RoomControllerHandle {
    sender: mpsc::Sender<ControllerMessage>,
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
}

impl RoomControllerHandle {
    /// Spawn the controller and return a handle to it.
    #[must_use]
    pub fn new(max_rooms: usize, max_peers_per_room: usize, metrics: Arc<ActorMetrics>) -> Self {
        let (sender, receiver) = mpsc::channel(CONTROLLER_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = RoomControllerActor {
            receiver,
            cancel_token: cancel_token.clone(),
            rooms: HashMap::new(),
            accepting_new: true,
            max_rooms,
            max_peers_per_room,
            shutdown_deadline: DEFAULT_SHUTDOWN_DEADLINE,
            metrics: Arc::clone(&metrics),
            mailbox: MailboxMonitor::new(ActorType::Controller, "room-controller"),
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            metrics,
        }
    }

    /// Get the room actor for `room_id`, creating it if needed.
    ///
    /// # Errors
    ///
    /// `Draining` during shutdown, `ServiceCapacityExceeded` when
    /// `max_rooms` rooms already exist.
    pub async fn get_or_create_room(&self, room_id: RoomId) -> Result<RoomHandle, RoomError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(ControllerMessage::GetOrCreateRoom {
                room_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| RoomError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RoomError::Internal(format!("response receive failed: {e}")))?
    }

    /// Get information about an existing room.
    ///
    /// # Errors
    ///
    /// `RoomNotFound` if no such room is running.
    pub async fn get_room(&self, room_id: RoomId) -> Result<RoomInfo, RoomError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(ControllerMessage::GetRoom {
                room_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| RoomError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RoomError::Internal(format!("response receive failed: {e}")))?
    }

    /// Remove the room if nobody is in it. `Ok(false)` if it still has
    /// members (someone joined in between) or does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error only if the controller is gone.
    pub async fn remove_room_if_empty(&self, room_id: RoomId) -> Result<bool, RoomError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(ControllerMessage::RemoveRoomIfEmpty {
                room_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| RoomError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RoomError::Internal(format!("response receive failed: {e}")))?
    }

    /// Get the current controller status.
    ///
    /// # Errors
    ///
    /// Returns an error only if the controller is gone.
    pub async fn get_status(&self) -> Result<ControllerStatus, RoomError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(ControllerMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| RoomError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RoomError::Internal(format!("response receive failed: {e}")))
    }

    /// Initiate graceful shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error only if the controller is gone.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), RoomError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(ControllerMessage::Shutdown {
                deadline,
                respond_to: tx,
            })
            .await
            .map_err(|e| RoomError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RoomError::Internal(format!("response receive failed: {e}")))?
    }

    /// Shared actor metrics.
    #[must_use]
    pub fn metrics(&self) -> &Arc<ActorMetrics> {
        &self.metrics
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for sessions.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

struct ManagedRoom {
    handle: RoomHandle,
    task_handle: JoinHandle<()>,
    /// Unix seconds.
    created_at: i64,
}

/// The `RoomControllerActor` implementation.
pub struct RoomControllerActor {
    receiver: mpsc::Receiver<ControllerMessage>,
    cancel_token: CancellationToken,
    rooms: HashMap<RoomId, ManagedRoom>,
    accepting_new: bool,
    max_rooms: usize,
    max_peers_per_room: usize,
    shutdown_deadline: Duration,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomControllerActor {
    #[instrument(skip_all, name = "rs.actor.controller", fields(max_rooms = self.max_rooms))]
    async fn run(mut self) {
        info!(
            target: "rs.actor.controller",
            max_rooms = self.max_rooms,
            max_peers_per_room = self.max_peers_per_room,
            "RoomControllerActor started"
        );

        loop {
            self.check_room_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rs.actor.controller",
                        "RoomControllerActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.mailbox.observe_backlog(self.receiver.len());
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "rs.actor.controller",
                                "RoomControllerActor channel closed, exiting"
                            );
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "rs.actor.controller",
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomControllerActor stopped"
        );
    }

    async fn handle_message(&mut self, message: ControllerMessage) {
        match message {
            ControllerMessage::GetOrCreateRoom {
                room_id,
                respond_to,
            } => {
                let result = self.get_or_create_room(room_id);
                let _ = respond_to.send(result);
            }

            ControllerMessage::GetRoom {
                room_id,
                respond_to,
            } => {
                let result = self.get_room(&room_id).await;
                let _ = respond_to.send(result);
            }

            ControllerMessage::RemoveRoomIfEmpty {
                room_id,
                respond_to,
            } => {
                let result = self.remove_room_if_empty(&room_id).await;
                let _ = respond_to.send(result);
            }

            ControllerMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            ControllerMessage::Shutdown {
                deadline,
                respond_to,
            } => {
                let result = self.initiate_shutdown(deadline);
                let _ = respond_to.send(result);
            }
        }
    }

    fn get_or_create_room(&mut self, room_id: RoomId) -> Result<RoomHandle, RoomError> {
        if !self.accepting_new {
            return Err(RoomError::Draining);
        }

        if let Some(managed) = self.rooms.get(&room_id) {
            if !managed.task_handle.is_finished() && !managed.handle.is_closed() {
                return Ok(managed.handle.clone());
            }
            // Room actor stopped between health checks; replace it below.
            if let Some(stale) = self.rooms.remove(&room_id) {
                stale.task_handle.abort();
                self.metrics.room_removed();
            }
        }

        if self.rooms.len() >= self.max_rooms {
            warn!(
                target: "rs.actor.controller",
                max_rooms = self.max_rooms,
                "Room creation rejected, service at capacity"
            );
            return Err(RoomError::ServiceCapacityExceeded);
        }

        let (handle, task_handle) = RoomActor::spawn(
            room_id.clone(),
            self.cancel_token.child_token(),
            self.max_peers_per_room,
            Arc::clone(&self.metrics),
        );

        self.rooms.insert(
            room_id.clone(),
            ManagedRoom {
                handle: handle.clone(),
                task_handle,
                created_at: chrono::Utc::now().timestamp(),
            },
        );
        self.metrics.room_created();

        info!(
            target: "rs.actor.controller",
            room_id = %room_id,
            total_rooms = self.rooms.len(),
            "Room actor created"
        );

        Ok(handle)
    }

    async fn get_room(&self, room_id: &RoomId) -> Result<RoomInfo, RoomError> {
        let managed = self
            .rooms
            .get(room_id)
            .ok_or_else(|| RoomError::RoomNotFound(room_id.to_string()))?;

        let (peer_count, stream_count) = match managed.handle.get_state().await {
            Ok(state) => (state.peers.len(), state.streams.len()),
            Err(_) => {
                warn!(
                    target: "rs.actor.controller",
                    room_id = %room_id,
                    "Failed to query room actor state, returning cached info"
                );
                (0, 0)
            }
        };

        Ok(RoomInfo {
            room_id: room_id.clone(),
            peer_count,
            stream_count,
            created_at: managed.created_at,
        })
    }

    /// The room decides emptiness itself, so a join racing with the last
    /// leave keeps the room alive.
    async fn remove_room_if_empty(&mut self, room_id: &RoomId) -> Result<bool, RoomError> {
        let Some(managed) = self.rooms.get(room_id) else {
            return Ok(false);
        };

        match managed.handle.close_if_empty().await {
            Ok(false) => return Ok(false),
            Ok(true) | Err(RoomError::ChannelClosed) => {}
            Err(e) => return Err(e),
        }

        let Some(managed) = self.rooms.remove(room_id) else {
            return Ok(false);
        };
        self.metrics.room_removed();

        let room_id_owned = room_id.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(ROOM_CLEANUP_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "rs.actor.controller",
                        room_id = %room_id_owned,
                        "Room actor task completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "rs.actor.controller",
                        room_id = %room_id_owned,
                        error = ?e,
                        "Room actor task panicked during removal"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "rs.actor.controller",
                        room_id = %room_id_owned,
                        "Room actor task cleanup timed out"
                    );
                }
            }
        });

        info!(
            target: "rs.actor.controller",
            room_id = %room_id,
            total_rooms = self.rooms.len(),
            "Room actor removed"
        );

        Ok(true)
    }

    fn get_status(&self) -> ControllerStatus {
        ControllerStatus {
            room_count: self.rooms.len(),
            peer_count: self.metrics.peer_count(),
            session_count: self.metrics.session_count(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    fn initiate_shutdown(&mut self, deadline: Duration) -> Result<(), RoomError> {
        info!(
            target: "rs.actor.controller",
            room_count = self.rooms.len(),
            deadline_secs = deadline.as_secs(),
            "Initiating graceful shutdown"
        );

        self.accepting_new = false;
        self.shutdown_deadline = deadline;
        self.cancel_token.cancel();

        Ok(())
    }

    async fn graceful_shutdown(&mut self) {
        info!(
            target: "rs.actor.controller",
            room_count = self.rooms.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;

        for managed in self.rooms.values() {
            managed.handle.cancel();
        }

        let deadline = tokio::time::Instant::now() + self.shutdown_deadline;
        for (room_id, managed) in self.rooms.drain() {
            match tokio::time::timeout_at(deadline, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "rs.actor.controller",
                        room_id = %room_id,
                        "Room actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "rs.actor.controller",
                        room_id = %room_id,
                        error = ?e,
                        "Room actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "rs.actor.controller",
                        room_id = %room_id,
                        "Room actor shutdown timed out"
                    );
                }
            }
            self.metrics.room_removed();
        }

        info!(target: "rs.actor.controller", "Graceful shutdown complete");
    }

    /// Drop rooms whose actor task is no longer running.
    async fn check_room_health(&mut self) {
        let finished: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(room_id, _)| room_id.clone())
            .collect();

        for room_id in finished {
            let Some(managed) = self.rooms.remove(&room_id) else {
                continue;
            };

            match managed.task_handle.await {
                Ok(()) => {
                    info!(
                        target: "rs.actor.controller",
                        room_id = %room_id,
                        "Room actor exited"
                    );
                }
                Err(join_error) if join_error.is_panic() => {
                    error!(
                        target: "rs.actor.controller",
                        room_id = %room_id,
                        error = ?join_error,
                        "Room actor panicked"
                    );
                    self.metrics.record_panic(ActorType::Room);
                }
                Err(_) => {}
            }

            self.metrics.room_removed();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use signaling_protocol::{PeerInfo, RequestId};

    fn controller(max_rooms: usize) -> RoomControllerHandle {
        RoomControllerHandle::new(max_rooms, 10, ActorMetrics::new())
    }

    #[tokio::test]
    async fn test_get_or_create_returns_same_room() {
        let handle = controller(10);

        let a = handle.get_or_create_room(RoomId::new("lobby")).await.unwrap();
        let b = handle.get_or_create_room(RoomId::new("lobby")).await.unwrap();
        assert_eq!(a.room_id(), b.room_id());

        let status = handle.get_status().await.unwrap();
        assert_eq!(status.room_count, 1);
        assert!(!status.is_draining);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_max_rooms_enforced() {
        let handle = controller(2);

        handle.get_or_create_room(RoomId::new("a")).await.unwrap();
        handle.get_or_create_room(RoomId::new("b")).await.unwrap();
        let result = handle.get_or_create_room(RoomId::new("c")).await;
        assert!(matches!(result, Err(RoomError::ServiceCapacityExceeded)));

        // Existing rooms are still reachable at capacity.
        assert!(handle.get_or_create_room(RoomId::new("a")).await.is_ok());

        handle.cancel();
    }

    #[tokio::test]
    async fn test_get_nonexistent_room() {
        let handle = controller(10);
        let result = handle.get_room(RoomId::new("nowhere")).await;
        assert!(matches!(result, Err(RoomError::RoomNotFound(_))));
        handle.cancel();
    }

    #[tokio::test]
    async fn test_remove_room_only_when_empty() {
        let handle = controller(10);
        let room = handle.get_or_create_room(RoomId::new("lobby")).await.unwrap();

        let (tx, _rx) = mpsc::channel(8);
        room.join(
            RequestId(1),
            PeerInfo::new("alice"),
            tx,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(!handle.remove_room_if_empty(RoomId::new("lobby")).await.unwrap());
        let info = handle.get_room(RoomId::new("lobby")).await.unwrap();
        assert_eq!(info.peer_count, 1);

        room.leave(common::types::PeerId::new("alice")).await.unwrap();
        assert!(handle.remove_room_if_empty(RoomId::new("lobby")).await.unwrap());
        assert!(matches!(
            handle.get_room(RoomId::new("lobby")).await,
            Err(RoomError::RoomNotFound(_))
        ));

        // Unknown rooms are a no-op.
        assert!(!handle.remove_room_if_empty(RoomId::new("lobby")).await.unwrap());

        handle.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_drains_and_rejects() {
        let handle = controller(10);
        let room = handle.get_or_create_room(RoomId::new("lobby")).await.unwrap();

        handle.shutdown(Duration::from_secs(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(handle.is_cancelled());
        assert!(room.is_cancelled());
    }

    #[tokio::test]
    async fn test_child_token_follows_root() {
        let handle = controller(10);
        let child = handle.child_token();
        assert!(!child.is_cancelled());

        handle.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn test_stopped_room_is_replaced() {
        let handle = controller(10);
        let room = handle.get_or_create_room(RoomId::new("lobby")).await.unwrap();

        room.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let fresh = handle.get_or_create_room(RoomId::new("lobby")).await.unwrap();
        assert!(!fresh.is_cancelled());
        assert_eq!(handle.get_status().await.unwrap().room_count, 1);

        handle.cancel();
    }
}
