//! `SubscriptionController` - receive-quality preferences for remote streams.
//!
//! Each tracked [`RemoteStream`] carries the local peer's wish for that
//! stream: audio on or off, and which simulcast layer to receive. Every
//! change sends the full `{streamId, video, audio}` tuple over the control
//! side-channel, so a receiver applying last-write-wins always converges.

use crate::errors::ClientError;
use crate::media::{ControlChannel, TrackKind};

use common::types::{PeerId, StreamId};
use signaling_protocol::codec::encode_selection;
use signaling_protocol::{Layer, Selection};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Another peer's stream as seen locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    pub stream_id: StreamId,
    pub peer_id: PeerId,
    pub audio: bool,
    pub video: Layer,
    /// Layer restored by a video unmute.
    pub video_pre_mute: Layer,
}

impl RemoteStream {
    #[must_use]
    pub fn new(stream_id: StreamId, peer_id: PeerId) -> Self {
        Self {
            stream_id,
            peer_id,
            audio: true,
            video: Layer::None,
            video_pre_mute: Layer::High,
        }
    }

    /// Current preference as a wire selection.
    #[must_use]
    pub fn selection(&self) -> Selection {
        Selection {
            stream_id: self.stream_id.clone(),
            video: self.video,
            audio: self.audio,
        }
    }

    fn mute(&mut self, kind: TrackKind) {
        match kind {
            TrackKind::Audio => self.audio = false,
            TrackKind::Video => {
                // A second mute must not overwrite the remembered layer.
                if self.video != Layer::None {
                    self.video_pre_mute = self.video;
                }
                self.video = Layer::None;
            }
        }
    }

    fn unmute(&mut self, kind: TrackKind) {
        match kind {
            TrackKind::Audio => self.audio = true,
            TrackKind::Video => self.video = self.video_pre_mute,
        }
    }
}

/// Owns every `RemoteStream` of one local peer.
pub struct SubscriptionController {
    control: Arc<dyn ControlChannel>,
    streams: Mutex<HashMap<StreamId, RemoteStream>>,
}

impl SubscriptionController {
    #[must_use]
    pub fn new(control: Arc<dyn ControlChannel>) -> Self {
        Self {
            control,
            streams: Mutex::new(HashMap::new()),
        }
    }

    /// Start tracking a stream. Returns the existing record if it is already
    /// tracked.
    pub async fn track_stream(&self, stream_id: StreamId, peer_id: PeerId) -> RemoteStream {
        let mut streams = self.streams.lock().await;
        streams
            .entry(stream_id.clone())
            .or_insert_with(|| {
                debug!(
                    target: "rc.subscription",
                    stream_id = %stream_id,
                    peer_id = %peer_id,
                    "Tracking remote stream"
                );
                RemoteStream::new(stream_id, peer_id)
            })
            .clone()
    }

    /// Stop tracking a stream.
    pub async fn remove_stream(&self, stream_id: &StreamId) -> Option<RemoteStream> {
        let removed = self.streams.lock().await.remove(stream_id);
        if removed.is_some() {
            debug!(target: "rc.subscription", stream_id = %stream_id, "Remote stream removed");
        }
        removed
    }

    pub async fn stream(&self, stream_id: &StreamId) -> Option<RemoteStream> {
        self.streams.lock().await.get(stream_id).cloned()
    }

    pub async fn streams(&self) -> Vec<RemoteStream> {
        self.streams.lock().await.values().cloned().collect()
    }

    /// Ask for `layer` of the stream's video.
    ///
    /// # Errors
    ///
    /// `UnknownStream` if the stream is not tracked, `Transport` if the
    /// control channel rejects the selection.
    pub async fn prefer_layer(
        &self,
        stream_id: &StreamId,
        layer: Layer,
    ) -> Result<Selection, ClientError> {
        self.update(stream_id, |stream| stream.video = layer).await
    }

    /// Stop receiving `kind`. A video mute remembers the current layer.
    ///
    /// # Errors
    ///
    /// `UnknownStream` if the stream is not tracked, `Transport` if the
    /// control channel rejects the selection.
    pub async fn mute(
        &self,
        stream_id: &StreamId,
        kind: TrackKind,
    ) -> Result<Selection, ClientError> {
        self.update(stream_id, |stream| stream.mute(kind)).await
    }

    /// Resume receiving `kind`. Video returns to the layer it had before
    /// the mute.
    ///
    /// # Errors
    ///
    /// `UnknownStream` if the stream is not tracked, `Transport` if the
    /// control channel rejects the selection.
    pub async fn unmute(
        &self,
        stream_id: &StreamId,
        kind: TrackKind,
    ) -> Result<Selection, ClientError> {
        self.update(stream_id, |stream| stream.unmute(kind)).await
    }

    /// Apply `change` and send the resulting selection. The lock is held
    /// across the send so selections leave in the order changes were made.
    async fn update(
        &self,
        stream_id: &StreamId,
        change: impl FnOnce(&mut RemoteStream),
    ) -> Result<Selection, ClientError> {
        let mut streams = self.streams.lock().await;
        let stream = streams
            .get_mut(stream_id)
            .ok_or_else(|| ClientError::UnknownStream(stream_id.clone()))?;

        change(stream);
        let selection = stream.selection();
        let bytes = encode_selection(&selection)?;
        self.control.send(bytes).await?;

        debug!(
            target: "rc.subscription",
            stream_id = %stream_id,
            video = selection.video.as_str(),
            audio = selection.audio,
            "Selection sent"
        );
        Ok(selection)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn stream() -> RemoteStream {
        RemoteStream::new(StreamId::new("s1"), PeerId::new("bob"))
    }

    #[test]
    fn test_remote_stream_defaults() {
        let s = stream();
        assert!(s.audio);
        assert_eq!(s.video, Layer::None);
        assert_eq!(s.video_pre_mute, Layer::High);
    }

    #[test]
    fn test_video_mute_remembers_layer() {
        let mut s = stream();
        s.video = Layer::Medium;
        s.mute(TrackKind::Video);
        assert_eq!(s.video, Layer::None);
        assert_eq!(s.video_pre_mute, Layer::Medium);

        s.mute(TrackKind::Video);
        assert_eq!(s.video_pre_mute, Layer::Medium);

        s.unmute(TrackKind::Video);
        assert_eq!(s.video, Layer::Medium);
    }

    #[test]
    fn test_unmute_video_without_preference_restores_high() {
        let mut s = stream();
        s.mute(TrackKind::Video);
        assert_eq!(s.video_pre_mute, Layer::High);
        s.unmute(TrackKind::Video);
        assert_eq!(s.video, Layer::High);
    }

    #[test]
    fn test_audio_mute_leaves_video_alone() {
        let mut s = stream();
        s.video = Layer::Low;
        s.mute(TrackKind::Audio);
        assert!(!s.audio);
        assert_eq!(s.video, Layer::Low);
        s.unmute(TrackKind::Audio);
        assert!(s.audio);
    }

    #[test]
    fn test_selection_carries_full_tuple() {
        let mut s = stream();
        s.video = Layer::High;
        s.audio = false;
        assert_eq!(
            s.selection(),
            Selection {
                stream_id: StreamId::new("s1"),
                video: Layer::High,
                audio: false,
            }
        );
    }
}
