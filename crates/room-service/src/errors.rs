//! Room service error types.
//!
//! Errors map to client-safe reason strings carried in `JoinReply.reason` and
//! `LeaveReply.reason`. Internal details are logged server-side but not
//! exposed to clients. An authorizer denial is a failed `JoinReply`, never an
//! error.

use thiserror::Error;

/// Room service error type.
#[derive(Debug, Error)]
pub enum RoomError {
    /// Request is not valid in the session's current state.
    #[error("Protocol usage error: {0}")]
    ProtocolUsage(String),

    /// An actor mailbox or reply channel closed before the request finished.
    #[error("Channel closed")]
    ChannelClosed,

    /// Room not found.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Room already holds the maximum number of peers.
    #[error("Room at capacity: {0}")]
    RoomCapacityExceeded(String),

    /// Service already hosts the maximum number of rooms.
    #[error("Service at capacity")]
    ServiceCapacityExceeded,

    /// Conflict error (e.g., peer id already in the room).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Service is draining (graceful shutdown).
    #[error("Service is draining")]
    Draining,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RoomError {
    /// Short, bounded label for metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            RoomError::ProtocolUsage(_) => "protocol_usage",
            RoomError::ChannelClosed => "channel_closed",
            RoomError::RoomNotFound(_) => "room_not_found",
            RoomError::RoomCapacityExceeded(_) => "room_full",
            RoomError::ServiceCapacityExceeded => "service_full",
            RoomError::Conflict(_) => "conflict",
            RoomError::Draining => "draining",
            RoomError::Config(_) => "config",
            RoomError::Internal(_) => "internal",
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RoomError::Config(_) | RoomError::Internal(_) | RoomError::ChannelClosed => {
                "An internal error occurred".to_string()
            }
            RoomError::RoomNotFound(_) => "Room not found".to_string(),
            RoomError::RoomCapacityExceeded(_) => "Room is at capacity".to_string(),
            RoomError::ServiceCapacityExceeded => {
                "Server is at capacity, please try again".to_string()
            }
            RoomError::Draining => "Server is shutting down, please reconnect".to_string(),
            RoomError::ProtocolUsage(msg) | RoomError::Conflict(msg) => msg.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = RoomError::Internal("mailbox for room-7 closed at 10.0.0.4".to_string());
        assert_eq!(err.client_message(), "An internal error occurred");
        assert!(!err.client_message().contains("10.0.0.4"));

        let err = RoomError::Config("missing RS_ROOM_TOKEN_SECRET".to_string());
        assert!(!err.client_message().contains("SECRET"));
    }

    #[test]
    fn test_client_messages_pass_through_usage_errors() {
        assert_eq!(
            RoomError::Conflict("peer id already in room".to_string()).client_message(),
            "peer id already in room"
        );
        assert_eq!(
            RoomError::ProtocolUsage("already joined".to_string()).client_message(),
            "already joined"
        );
    }

    #[test]
    fn test_capacity_messages_do_not_leak_limits() {
        let err = RoomError::RoomCapacityExceeded("max 50".to_string());
        assert_eq!(err.client_message(), "Room is at capacity");
        assert_eq!(err.kind(), "room_full");
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", RoomError::RoomNotFound("lobby".to_string())),
            "Room not found: lobby"
        );
        assert_eq!(format!("{}", RoomError::Draining), "Service is draining");
    }
}
