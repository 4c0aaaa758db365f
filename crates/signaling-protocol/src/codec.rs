//! JSON codec for envelopes and selections.
//!
//! Inbound text is size-checked before parsing. Decoded envelopes are
//! validated for fields serde cannot express (non-empty ids).

use crate::envelope::Envelope;
use crate::selection::Selection;
use bytes::Bytes;

/// Largest accepted encoded envelope (64 KiB).
pub const MAX_ENVELOPE_SIZE: usize = 64 * 1024;

/// Error type for codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Encoded message exceeds [`MAX_ENVELOPE_SIZE`]
    #[error("Message too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    /// Invalid message format
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    /// Serialization failed
    #[error("Encoding failed: {0}")]
    Encode(String),
}

/// Encode an envelope as a JSON text frame
///
/// # Errors
///
/// Returns an error if serialization fails
pub fn encode_envelope(envelope: &Envelope) -> Result<String, CodecError> {
    serde_json::to_string(envelope).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode an envelope from a JSON text frame
///
/// # Errors
///
/// Returns an error if the frame is too large, is not a known envelope, or
/// names an empty room/peer id.
pub fn decode_envelope(text: &str) -> Result<Envelope, CodecError> {
    if text.len() > MAX_ENVELOPE_SIZE {
        return Err(CodecError::TooLarge {
            size: text.len(),
            max: MAX_ENVELOPE_SIZE,
        });
    }

    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| CodecError::InvalidFormat(e.to_string()))?;
    validate(&envelope)?;
    Ok(envelope)
}

fn validate(envelope: &Envelope) -> Result<(), CodecError> {
    match envelope {
        Envelope::Join(req) => {
            if req.room.is_empty() {
                return Err(CodecError::InvalidFormat("empty room id".to_string()));
            }
            if req.peer.id.is_empty() {
                return Err(CodecError::InvalidFormat("empty peer id".to_string()));
            }
        }
        Envelope::Leave(req) if req.uid.is_empty() => {
            return Err(CodecError::InvalidFormat("empty uid".to_string()));
        }
        Envelope::StreamEvent(ev) if ev.stream_id.is_empty() => {
            return Err(CodecError::InvalidFormat("empty stream id".to_string()));
        }
        _ => {}
    }
    Ok(())
}

/// Encode a selection for the control side-channel
///
/// # Errors
///
/// Returns an error if serialization fails
pub fn encode_selection(selection: &Selection) -> Result<Bytes, CodecError> {
    serde_json::to_vec(selection)
        .map(Bytes::from)
        .map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode a selection received on the control side-channel
///
/// # Errors
///
/// Returns an error if the bytes are not a valid selection
pub fn decode_selection(data: &[u8]) -> Result<Selection, CodecError> {
    serde_json::from_slice(data).map_err(|e| CodecError::InvalidFormat(e.to_string()))
}
