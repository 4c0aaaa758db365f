//! End-to-end tests: `RoomClient`s talking to an in-process room service.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use room_test_utils::*;
use rtc_client::{
    ClientError, ControlChannel, EnvelopeTransport, RoomClient, RoomEvents, SignalingChannel,
    SubscriptionController,
};
use signaling_protocol::{Envelope, EventKind, JoinReply, Layer, StreamEvent, StreamInfo};
use std::sync::Arc;
use tokio::sync::mpsc;

struct Member {
    client: RoomClient,
    events: RoomEvents,
    control: Arc<MockControlChannel>,
}

fn member(service: &TestService, name: &str) -> Member {
    let (channel, channel_events, _session) = service.connect();
    let control = Arc::new(MockControlChannel::new());
    let subscriptions = Arc::new(SubscriptionController::new(
        Arc::clone(&control) as Arc<dyn ControlChannel>
    ));
    let (client, events) = RoomClient::new(channel, channel_events, subscriptions, peer(name));
    Member {
        client,
        events,
        control,
    }
}

async fn joined(service: &TestService, name: &str) -> Member {
    let m = member(service, name);
    let reply = m.client.join(room_id("lobby"), TEST_TOKEN).await.unwrap();
    assert!(reply.success, "{:?}", reply.reason);
    m
}

async fn next_event(events: &mut RoomEvents) -> Envelope {
    tokio::time::timeout(RECV_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for a room event")
        .expect("event stream closed")
}

#[tokio::test]
async fn test_join_reports_existing_members() {
    let service = TestService::new();
    let mut alice = joined(&service, "alice").await;

    let bob = member(&service, "bob");
    let reply = bob.client.join(room_id("lobby"), TEST_TOKEN).await.unwrap();
    assert!(reply.success);
    assert_eq!(reply.peers.len(), 1);

    match next_event(&mut alice.events).await {
        Envelope::PeerEvent(event) => {
            assert_eq!(event.kind, EventKind::Added);
            assert_eq!(event.peer.id, peer_id("bob"));
        }
        other => panic!("expected peer event, got {other:?}"),
    }
}

#[tokio::test]
async fn test_stream_events_drive_subscriptions() {
    let service = TestService::new();
    let mut alice = joined(&service, "alice").await;
    let bob = joined(&service, "bob").await;
    let _ = next_event(&mut alice.events).await; // bob added

    bob.client
        .send_message(None, announce_payload("bob-cam"))
        .await
        .unwrap();

    match next_event(&mut alice.events).await {
        Envelope::StreamEvent(event) => {
            assert_eq!(event.kind, EventKind::Added);
            assert_eq!(event.stream_id, stream_id("bob-cam"));
        }
        other => panic!("expected stream event, got {other:?}"),
    }

    // Tracked before the application saw the event.
    let remote = alice
        .client
        .subscriptions()
        .stream(&stream_id("bob-cam"))
        .await
        .unwrap();
    assert_eq!(remote.peer_id, peer_id("bob"));

    alice
        .client
        .subscriptions()
        .prefer_layer(&stream_id("bob-cam"), Layer::Medium)
        .await
        .unwrap();
    assert_eq!(alice.control.last_selection().unwrap().video, Layer::Medium);

    // A later joiner tracks the stream straight from its join reply.
    let carol = joined(&service, "carol").await;
    assert!(carol
        .client
        .subscriptions()
        .stream(&stream_id("bob-cam"))
        .await
        .is_some());

    // Bob leaves: stream removal first, then the peer.
    let _ = next_event(&mut alice.events).await; // carol added
    let reply = bob.client.leave().await.unwrap();
    assert_eq!(reply.reason, None);

    match next_event(&mut alice.events).await {
        Envelope::StreamEvent(event) => assert_eq!(event.kind, EventKind::Removed),
        other => panic!("expected stream event, got {other:?}"),
    }
    match next_event(&mut alice.events).await {
        Envelope::PeerEvent(event) => {
            assert_eq!(event.kind, EventKind::Removed);
            assert_eq!(event.peer.id, peer_id("bob"));
        }
        other => panic!("expected peer event, got {other:?}"),
    }
    assert!(alice
        .client
        .subscriptions()
        .stream(&stream_id("bob-cam"))
        .await
        .is_none());
}

#[tokio::test]
async fn test_peer_messages_are_relayed() {
    let service = TestService::new();
    let mut alice = joined(&service, "alice").await;
    let mut bob = joined(&service, "bob").await;
    let _ = next_event(&mut alice.events).await; // bob added

    alice
        .client
        .send_message(Some(peer_id("bob")), serde_json::json!({"candidate": "c1"}))
        .await
        .unwrap();

    match next_event(&mut bob.events).await {
        Envelope::Message(message) => {
            assert_eq!(message.from, Some(peer_id("alice")));
            assert_eq!(message.payload, serde_json::json!({"candidate": "c1"}));
        }
        other => panic!("expected message, got {other:?}"),
    }
}

#[tokio::test]
async fn test_concurrent_requests_resolve_independently() {
    let service = TestService::new();
    let alice = member(&service, "alice");
    let channel = alice.client.channel().clone();

    // Leave is sent while the join is still outstanding.
    let join = channel
        .send_request(rtc_client::Request::Join {
            room: room_id("lobby"),
            peer: peer("alice"),
            token: TEST_TOKEN.to_string(),
        })
        .await
        .unwrap();
    let leave = channel
        .send_request(rtc_client::Request::Leave {
            uid: peer_id("alice"),
        })
        .await
        .unwrap();
    assert_ne!(join.request_id(), leave.request_id());

    match join.wait().await.unwrap() {
        Envelope::JoinReply(reply) => assert!(reply.success),
        other => panic!("expected join reply, got {other:?}"),
    }
    match leave.wait().await.unwrap() {
        Envelope::LeaveReply(reply) => assert_eq!(reply.reason, None),
        other => panic!("expected leave reply, got {other:?}"),
    }
    assert_eq!(channel.pending_requests().await.unwrap(), 0);
}

#[tokio::test]
async fn test_closed_channel_fails_requests() {
    let service = TestService::new();
    let alice = joined(&service, "alice").await;
    let channel = alice.client.channel().clone();

    alice.client.close().await;

    assert!(channel.is_closed());
    assert!(matches!(
        channel.leave(peer_id("alice")).await,
        Err(ClientError::ChannelClosed)
    ));
}

/// The server retracts a stream right behind the join reply that lists it.
/// However the tasks interleave, the removal is applied last.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_removal_after_join_snapshot_is_not_undone() {
    for _ in 0..200 {
        let (to_server, mut from_client) = mpsc::channel(16);
        let (to_client, from_server) = mpsc::channel(16);
        let (channel, channel_events, _task) = SignalingChannel::open(EnvelopeTransport {
            outbound: to_server,
            inbound: from_server,
        });
        let subscriptions = Arc::new(SubscriptionController::new(
            Arc::new(MockControlChannel::new()) as Arc<dyn ControlChannel>
        ));
        let (client, mut events) =
            RoomClient::new(channel, channel_events, subscriptions, peer("alice"));

        let server = tokio::spawn(async move {
            let Some(Envelope::Join(request)) = from_client.recv().await else {
                panic!("expected join request");
            };
            let reply = JoinReply::accepted(
                request.request_id,
                vec![peer("bob")],
                vec![StreamInfo {
                    stream_id: stream_id("bob-cam"),
                    peer: peer_id("bob"),
                }],
            );
            to_client.send(Envelope::JoinReply(reply)).await.unwrap();
            to_client
                .send(Envelope::StreamEvent(StreamEvent {
                    kind: EventKind::Removed,
                    stream_id: stream_id("bob-cam"),
                    peer: peer_id("bob"),
                }))
                .await
                .unwrap();
            (from_client, to_client)
        });

        let reply = client.join(room_id("lobby"), TEST_TOKEN).await.unwrap();
        assert!(reply.success);
        assert_eq!(reply.streams.len(), 1);

        match next_event(&mut events).await {
            Envelope::StreamEvent(event) => assert_eq!(event.kind, EventKind::Removed),
            other => panic!("expected stream event, got {other:?}"),
        }
        assert!(client
            .subscriptions()
            .stream(&stream_id("bob-cam"))
            .await
            .is_none());

        let _server_ends = server.await.unwrap();
    }
}
