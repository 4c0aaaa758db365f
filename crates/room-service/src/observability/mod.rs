//! Observability for the room service.
//!
//! All instrumentation uses `#[instrument(skip_all)]` with explicit fields.
//! Tokens and peer metadata are never logged.
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `rs_rooms_active` | Gauge | none | Rooms with a running actor |
//! | `rs_peers_active` | Gauge | none | Peers joined to a room |
//! | `rs_envelopes_total` | Counter | `type` | Inbound envelopes by variant |
//! | `rs_joins_total` | Counter | `result` | Join outcomes |
//! | `rs_messages_dropped_total` | Counter | `reason` | Undeliverable messages |
//! | `rs_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure indicator |
//! | `rs_actor_panics_total` | Counter | `actor_type` | Actor task panics |
//! | `rs_message_latency_seconds` | Histogram | `type` | Session handling time |

pub mod health;
pub mod metrics;

pub use health::{health_router, metrics_router, HealthState};
pub use metrics::{
    init_metrics_recorder, record_actor_panic, record_envelope, record_join,
    record_message_dropped, record_message_latency, set_actor_mailbox_depth, set_peers_active,
    set_rooms_active,
};
