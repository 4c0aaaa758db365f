//! WebSocket glue between clients and session actors.
//!
//! `GET /ws` upgrades to a WebSocket. Each text frame carries one JSON
//! envelope. Frames that fail to decode are dropped with a warning and the
//! connection stays open. Binary frames are not part of the protocol.

use crate::actors::{open_session, SessionConnection, SessionContext};
use crate::observability::metrics as prom;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use signaling_protocol::codec::{decode_envelope, encode_envelope, MAX_ENVELOPE_SIZE};
use signaling_protocol::Envelope;
use tracing::{debug, info, warn};

/// Router serving the signaling endpoint.
pub fn signaling_router(ctx: SessionContext) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(ctx)
}

async fn ws_handler(State(ctx): State<SessionContext>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.max_message_size(MAX_ENVELOPE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, ctx))
}

/// What to do with one inbound frame.
#[derive(Debug)]
pub(crate) enum FrameAction {
    Deliver(Envelope),
    /// Not deliverable; the label is the drop reason.
    Drop(&'static str),
    Close,
    Ignore,
}

pub(crate) fn classify_frame(frame: WsMessage) -> FrameAction {
    match frame {
        WsMessage::Text(text) => match decode_envelope(&text) {
            Ok(envelope) => FrameAction::Deliver(envelope),
            Err(e) => {
                warn!(target: "rs.transport", error = %e, "Dropping malformed envelope");
                FrameAction::Drop("malformed")
            }
        },
        WsMessage::Binary(_) => {
            warn!(target: "rs.transport", "Dropping binary frame");
            FrameAction::Drop("binary_frame")
        }
        WsMessage::Close(_) => FrameAction::Close,
        WsMessage::Ping(_) | WsMessage::Pong(_) => FrameAction::Ignore,
    }
}

async fn handle_socket(socket: WebSocket, ctx: SessionContext) {
    let SessionConnection {
        to_server,
        mut from_server,
        handle,
        task,
    } = open_session(&ctx);

    info!(
        target: "rs.transport",
        session_id = %handle.session_id(),
        "WebSocket connection established"
    );

    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(envelope) = from_server.recv().await {
            let text = match encode_envelope(&envelope) {
                Ok(text) => text,
                Err(e) => {
                    warn!(target: "rs.transport", error = %e, "Failed to encode envelope");
                    continue;
                }
            };
            if sink.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut writer_done = false;
    loop {
        tokio::select! {
            _ = &mut writer => {
                // Session ended on the server side.
                writer_done = true;
                break;
            }

            frame = stream.next() => {
                let Some(Ok(frame)) = frame else {
                    break;
                };
                match classify_frame(frame) {
                    FrameAction::Deliver(envelope) => {
                        if to_server.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    FrameAction::Drop(reason) => prom::record_message_dropped(reason),
                    FrameAction::Close => break,
                    FrameAction::Ignore => {}
                }
            }
        }
    }

    // Ending the inbound queue is the session's disconnect signal.
    drop(to_server);
    let _ = task.await;
    if !writer_done {
        let _ = writer.await;
    }

    debug!(
        target: "rs.transport",
        session_id = %handle.session_id(),
        "WebSocket connection closed"
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use signaling_protocol::{LeaveRequest, RequestId};

    #[test]
    fn test_text_frame_with_envelope_is_delivered() {
        let envelope = Envelope::Leave(LeaveRequest {
            request_id: RequestId(4),
            uid: common::types::PeerId::new("alice"),
        });
        let text = encode_envelope(&envelope).unwrap();

        match classify_frame(WsMessage::Text(text)) {
            FrameAction::Deliver(decoded) => assert_eq!(decoded, envelope),
            other => panic!("expected Deliver, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_and_binary_frames_are_dropped() {
        assert!(matches!(
            classify_frame(WsMessage::Text("{not json".to_string())),
            FrameAction::Drop("malformed")
        ));
        assert!(matches!(
            classify_frame(WsMessage::Text(r#"{"type":"teleport","data":{}}"#.to_string())),
            FrameAction::Drop("malformed")
        ));
        assert!(matches!(
            classify_frame(WsMessage::Binary(vec![1, 2, 3])),
            FrameAction::Drop("binary_frame")
        ));
    }

    #[test]
    fn test_control_frames() {
        assert!(matches!(
            classify_frame(WsMessage::Close(None)),
            FrameAction::Close
        ));
        assert!(matches!(
            classify_frame(WsMessage::Ping(vec![])),
            FrameAction::Ignore
        ));
    }
}
