//! Actor hierarchy for the room service.
//!
//! ```text
//! RoomControllerActor (singleton)
//! ├── RoomActor (one per active room)
//! │   └── single writer for membership, streams and event fan-out
//! └── SessionActor (one per signaling connection, child token of the controller)
//!     └── Unjoined -> Joined -> Left
//! ```
//!
//! - All inter-actor communication uses `tokio::sync::mpsc` mailboxes and
//!   `oneshot` replies
//! - Cancellation tokens flow from the controller to rooms and sessions
//! - Room actors write events directly into sessions' outbound queues
//!
//! # Modules
//!
//! - [`controller`] - `RoomControllerActor`, the room registry
//! - [`room`] - `RoomActor`, per-room membership and broadcast
//! - [`session`] - `SessionActor`, per-connection state machine
//! - [`messages`] - message and status types
//! - [`metrics`] - mailbox monitoring and actor counters

pub mod controller;
pub mod messages;
pub mod metrics;
pub mod room;
pub mod session;

pub use controller::{RoomControllerActor, RoomControllerHandle};
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxLevel, MailboxMonitor};
pub use room::{RoomActor, RoomHandle};
pub use session::{
    open_session, SessionActor, SessionConnection, SessionContext, SessionHandle,
    SESSION_INBOUND_BUFFER, SESSION_OUTBOUND_BUFFER,
};
