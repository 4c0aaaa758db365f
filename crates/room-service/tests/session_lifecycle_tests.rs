//! Integration tests for the session state machine.
//!
//! Drives real session, room and controller actors through raw envelope
//! queues: join/leave lifecycle, replies for every request, authorization
//! and capacity limits.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use room_service::actors::SessionPhase;
use room_service::errors::RoomError;
use room_test_utils::*;
use signaling_protocol::{Envelope, EventKind, JoinReply, LeaveReply, RequestId};
use std::time::Duration;

async fn expect_join_reply(peer: &mut RawPeer) -> JoinReply {
    match peer.recv().await {
        Envelope::JoinReply(reply) => reply,
        other => panic!("expected join reply, got {other:?}"),
    }
}

async fn expect_leave_reply(peer: &mut RawPeer) -> LeaveReply {
    match peer.recv().await {
        Envelope::LeaveReply(reply) => reply,
        other => panic!("expected leave reply, got {other:?}"),
    }
}

async fn joined(service: &TestService, room: &str, name: &str) -> RawPeer {
    let mut peer = service.raw_peer();
    peer.send(join_envelope(1, room, name)).await;
    let reply = expect_join_reply(&mut peer).await;
    assert!(reply.success, "join of {name} failed: {:?}", reply.reason);
    peer
}

// ============================================================================
// Join
// ============================================================================

#[tokio::test]
async fn test_second_join_notifies_first_peer() {
    let service = TestService::new();

    let mut alice = service.raw_peer();
    alice.send(join_envelope(7, "lobby", "alice")).await;
    let reply = expect_join_reply(&mut alice).await;
    assert!(reply.success);
    assert_eq!(reply.request_id, RequestId(7));
    assert!(reply.peers.is_empty());

    let mut bob = service.raw_peer();
    bob.send(join_envelope(1, "lobby", "bob")).await;
    let reply = expect_join_reply(&mut bob).await;
    assert!(reply.success);
    assert_eq!(reply.peers.len(), 1);
    assert_eq!(reply.peers.first().unwrap().id, peer_id("alice"));

    match alice.recv().await {
        Envelope::PeerEvent(event) => {
            assert_eq!(event.kind, EventKind::Added);
            assert_eq!(event.peer.id, peer_id("bob"));
        }
        other => panic!("expected peer event, got {other:?}"),
    }

    // The joiner is never told about itself.
    assert!(bob.try_recv_within(Duration::from_millis(50)).await.is_none());
}

#[tokio::test]
async fn test_join_while_joined_is_rejected_without_state_change() {
    let service = TestService::new();
    let mut alice = joined(&service, "lobby", "alice").await;

    alice.send(join_envelope(2, "other-room", "alice")).await;
    let reply = expect_join_reply(&mut alice).await;
    assert!(!reply.success);
    assert_eq!(reply.request_id, RequestId(2));
    assert_eq!(reply.reason.as_deref(), Some("already joined"));

    let room = service.controller().get_room(room_id("lobby")).await.unwrap();
    assert_eq!(room.peer_count, 1);
    assert!(service
        .controller()
        .get_room(room_id("other-room"))
        .await
        .is_err());

    let status = alice.handle.get_status().await.unwrap();
    assert_eq!(status.phase, SessionPhase::Joined);
    assert_eq!(status.room_id, Some(room_id("lobby")));
}

#[tokio::test]
async fn test_denied_join_stays_unjoined() {
    let service = TestService::builder()
        .authorizer(MockAuthorizer::builder().deny_peer("mallory", "banned").build())
        .build();

    let mut mallory = service.raw_peer();
    mallory.send(join_envelope(3, "lobby", "mallory")).await;
    let reply = expect_join_reply(&mut mallory).await;
    assert!(!reply.success);
    assert_eq!(reply.reason.as_deref(), Some("banned"));

    let status = mallory.handle.get_status().await.unwrap();
    assert_eq!(status.phase, SessionPhase::Unjoined);
    assert!(service.controller().get_room(room_id("lobby")).await.is_err());

    let calls = service.authorizer.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls.first().unwrap().token, TEST_TOKEN);
    assert_eq!(calls.first().unwrap().room, room_id("lobby"));
}

#[tokio::test]
async fn test_denied_join_can_be_retried() {
    let service = TestService::builder()
        .authorizer(MockAuthorizer::builder().deny_token("stale", "expired").build())
        .build();

    let mut alice = service.raw_peer();
    alice
        .send(Envelope::Join(signaling_protocol::JoinRequest {
            request_id: RequestId(1),
            room: room_id("lobby"),
            peer: peer("alice"),
            token: "stale".to_string(),
        }))
        .await;
    assert!(!expect_join_reply(&mut alice).await.success);

    alice.send(join_envelope(2, "lobby", "alice")).await;
    assert!(expect_join_reply(&mut alice).await.success);
}

#[tokio::test]
async fn test_duplicate_peer_id_is_rejected() {
    let service = TestService::new();
    let _alice = joined(&service, "lobby", "alice").await;

    let mut impostor = service.raw_peer();
    impostor.send(join_envelope(1, "lobby", "alice")).await;
    let reply = expect_join_reply(&mut impostor).await;
    assert!(!reply.success);
    assert_eq!(reply.reason.as_deref(), Some("peer id already in room"));
}

#[tokio::test]
async fn test_room_capacity_is_enforced() {
    let service = TestService::builder().max_peers_per_room(1).build();
    let _alice = joined(&service, "lobby", "alice").await;

    let mut bob = service.raw_peer();
    bob.send(join_envelope(1, "lobby", "bob")).await;
    let reply = expect_join_reply(&mut bob).await;
    assert!(!reply.success);
    assert_eq!(reply.reason.as_deref(), Some("Room is at capacity"));
}

#[tokio::test]
async fn test_service_capacity_is_enforced() {
    let service = TestService::builder().max_rooms(1).build();
    let _alice = joined(&service, "lobby", "alice").await;

    let mut bob = service.raw_peer();
    bob.send(join_envelope(1, "annex", "bob")).await;
    let reply = expect_join_reply(&mut bob).await;
    assert!(!reply.success);
    assert_eq!(
        reply.reason.as_deref(),
        Some("Server is at capacity, please try again")
    );
}

// ============================================================================
// Leave
// ============================================================================

#[tokio::test]
async fn test_leave_while_unjoined_replies_with_reason() {
    let service = TestService::new();
    let mut alice = service.raw_peer();

    alice.send(leave_envelope(4, "alice")).await;
    let reply = expect_leave_reply(&mut alice).await;
    assert_eq!(reply.request_id, RequestId(4));
    assert_eq!(reply.reason.as_deref(), Some("not joined"));

    let status = alice.handle.get_status().await.unwrap();
    assert_eq!(status.phase, SessionPhase::Unjoined);
}

#[tokio::test]
async fn test_leave_broadcasts_and_is_terminal() {
    let service = TestService::new();
    let mut alice = joined(&service, "lobby", "alice").await;
    let mut bob = joined(&service, "lobby", "bob").await;
    let _ = alice.recv().await; // bob added

    bob.send(leave_envelope(2, "bob")).await;
    let reply = expect_leave_reply(&mut bob).await;
    assert_eq!(reply.reason, None);

    match alice.recv().await {
        Envelope::PeerEvent(event) => {
            assert_eq!(event.kind, EventKind::Removed);
            assert_eq!(event.peer.id, peer_id("bob"));
        }
        other => panic!("expected peer event, got {other:?}"),
    }

    // Left is terminal.
    bob.send(leave_envelope(3, "bob")).await;
    let reply = expect_leave_reply(&mut bob).await;
    assert_eq!(reply.reason.as_deref(), Some("session has left"));

    bob.send(join_envelope(4, "lobby", "bob")).await;
    let reply = expect_join_reply(&mut bob).await;
    assert!(!reply.success);
    assert_eq!(reply.reason.as_deref(), Some("session has left"));

    let status = bob.handle.get_status().await.unwrap();
    assert_eq!(status.phase, SessionPhase::Left);

    let room = service.controller().get_room(room_id("lobby")).await.unwrap();
    assert_eq!(room.peer_count, 1);
}

async fn expect_only_peer_event(peer: &mut RawPeer, kind: EventKind, id: &str) {
    match peer.recv().await {
        Envelope::PeerEvent(event) => {
            assert_eq!(event.kind, kind);
            assert_eq!(event.peer.id, peer_id(id));
        }
        other => panic!("expected peer event, got {other:?}"),
    }
    assert!(peer.try_recv_within(Duration::from_millis(50)).await.is_none());
}

#[tokio::test]
async fn test_membership_changes_reach_each_other_peer_once() {
    let service = TestService::new();
    let mut alice = joined(&service, "lobby", "alice").await;
    let mut bob = joined(&service, "lobby", "bob").await;
    expect_only_peer_event(&mut alice, EventKind::Added, "bob").await;
    let mut carol = joined(&service, "lobby", "carol").await;
    expect_only_peer_event(&mut alice, EventKind::Added, "carol").await;
    expect_only_peer_event(&mut bob, EventKind::Added, "carol").await;

    let mut dave = joined(&service, "lobby", "dave").await;
    assert!(dave.try_recv_within(Duration::from_millis(50)).await.is_none());
    for peer in [&mut alice, &mut bob, &mut carol] {
        expect_only_peer_event(peer, EventKind::Added, "dave").await;
    }

    bob.send(leave_envelope(2, "bob")).await;
    assert_eq!(expect_leave_reply(&mut bob).await.reason, None);
    assert!(bob.try_recv_within(Duration::from_millis(50)).await.is_none());
    for peer in [&mut alice, &mut carol, &mut dave] {
        expect_only_peer_event(peer, EventKind::Removed, "bob").await;
    }

    let room = service.controller().get_room(room_id("lobby")).await.unwrap();
    assert_eq!(room.peer_count, 3);
}

#[tokio::test]
async fn test_leave_with_foreign_uid_is_a_no_op() {
    let service = TestService::new();
    let mut alice = joined(&service, "lobby", "alice").await;

    alice.send(leave_envelope(2, "bob")).await;
    let reply = expect_leave_reply(&mut alice).await;
    assert_eq!(
        reply.reason.as_deref(),
        Some("uid does not match this session")
    );

    let status = alice.handle.get_status().await.unwrap();
    assert_eq!(status.phase, SessionPhase::Joined);
}

#[tokio::test]
async fn test_last_leave_removes_room() {
    let service = TestService::new();
    let mut alice = joined(&service, "lobby", "alice").await;
    assert_eq!(service.controller().get_status().await.unwrap().room_count, 1);

    alice.send(leave_envelope(2, "alice")).await;
    assert_eq!(expect_leave_reply(&mut alice).await.reason, None);

    let result = service.controller().get_room(room_id("lobby")).await;
    assert!(matches!(result, Err(RoomError::RoomNotFound(_))));
    assert_eq!(service.metrics().peer_count(), 0);

    // A new join recreates the room.
    let _bob = joined(&service, "lobby", "bob").await;
    let room = service.controller().get_room(room_id("lobby")).await.unwrap();
    assert_eq!(room.peer_count, 1);
}

// ============================================================================
// Disconnect
// ============================================================================

#[tokio::test]
async fn test_disconnect_is_treated_as_leave() {
    let service = TestService::new();
    let mut alice = joined(&service, "lobby", "alice").await;
    let mut bob = joined(&service, "lobby", "bob").await;
    let _ = alice.recv().await; // bob added

    bob.disconnect().await;

    match alice.recv().await {
        Envelope::PeerEvent(event) => {
            assert_eq!(event.kind, EventKind::Removed);
            assert_eq!(event.peer.id, peer_id("bob"));
        }
        other => panic!("expected peer event, got {other:?}"),
    }

    let room = service.controller().get_room(room_id("lobby")).await.unwrap();
    assert_eq!(room.peer_count, 1);
}

#[tokio::test]
async fn test_disconnect_of_last_peer_removes_room() {
    let service = TestService::new();
    let mut alice = joined(&service, "lobby", "alice").await;

    alice.disconnect().await;

    assert!(service.controller().get_room(room_id("lobby")).await.is_err());
    assert_eq!(service.metrics().session_count(), 0);
}

#[tokio::test]
async fn test_every_request_gets_exactly_one_reply() {
    let service = TestService::new();
    let mut alice = service.raw_peer();

    let requests = vec![
        leave_envelope(1, "alice"),
        join_envelope(2, "lobby", "alice"),
        join_envelope(3, "lobby", "alice"),
        leave_envelope(4, "someone-else"),
        leave_envelope(5, "alice"),
        leave_envelope(6, "alice"),
        join_envelope(7, "lobby", "alice"),
    ];
    let expected: Vec<RequestId> = requests
        .iter()
        .filter_map(Envelope::request_id)
        .collect();

    for request in requests {
        alice.send(request).await;
    }

    let mut seen = Vec::new();
    for _ in 0..expected.len() {
        let reply = alice.recv().await;
        assert!(reply.reply_kind().is_some(), "unexpected {reply:?}");
        seen.push(reply.request_id().unwrap());
    }
    assert_eq!(seen, expected);
    assert!(alice.try_recv_within(Duration::from_millis(50)).await.is_none());
}
