//! Client error types.
//!
//! Every error is scoped to one call or one signaling channel. Nothing here
//! is fatal to the process.

use common::types::StreamId;
use signaling_protocol::CodecError;
use thiserror::Error;

use crate::media::{AcquisitionError, TransportError};

/// Client error type.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The call is not valid in the current state. The channel or
    /// controller remains usable.
    #[error("Protocol usage error: {0}")]
    ProtocolUsage(String),

    /// The signaling channel closed before or while the call was made.
    #[error("Signaling channel closed")]
    ChannelClosed,

    /// A capture device could not be opened. Prior media state is unchanged.
    #[error("Device acquisition failed: {0}")]
    DeviceAcquisitionFailed(#[from] AcquisitionError),

    /// No remote stream with this id is tracked.
    #[error("Unknown stream: {0}")]
    UnknownStream(StreamId),

    /// The outbound transport or control channel rejected an operation.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A message could not be encoded.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl ClientError {
    /// Short, bounded label for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            ClientError::ProtocolUsage(_) => "protocol_usage",
            ClientError::ChannelClosed => "channel_closed",
            ClientError::DeviceAcquisitionFailed(_) => "device_acquisition_failed",
            ClientError::UnknownStream(_) => "unknown_stream",
            ClientError::Transport(_) => "transport",
            ClientError::Codec(_) => "codec",
        }
    }
}
