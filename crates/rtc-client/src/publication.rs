//! `PublicationController` - local capture to outbound encodings.
//!
//! Each track kind has its own async mutex, held across device acquisition.
//! Two device swaps for the same kind therefore never interleave, and the
//! outbound slot is always swapped new-track-first:
//!
//! ```text
//! acquire(new) -> replace_track(new) -> stop(old)
//! ```
//!
//! A failed acquisition returns before anything is touched.

use crate::constraints::Constraints;
use crate::encoding::EncodingLayer;
use crate::errors::ClientError;
use crate::media::{
    DeviceConstraints, Direction, LocalTrack, MediaCapture, OutboundTransport, TrackKind,
};

use common::types::StreamId;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Default)]
struct KindState {
    track: Option<Arc<dyn LocalTrack>>,
    device: DeviceConstraints,
    published: bool,
    muted: bool,
    encodings: Vec<EncodingLayer>,
}

/// Publishes one local stream.
pub struct PublicationController {
    stream_id: StreamId,
    constraints: Constraints,
    capture: Arc<dyn MediaCapture>,
    transport: Arc<dyn OutboundTransport>,
    audio: Mutex<KindState>,
    video: Mutex<KindState>,
}

impl PublicationController {
    #[must_use]
    pub fn new(
        stream_id: StreamId,
        constraints: Constraints,
        capture: Arc<dyn MediaCapture>,
        transport: Arc<dyn OutboundTransport>,
    ) -> Self {
        let audio = KindState {
            device: constraints.device_constraints(TrackKind::Audio),
            ..KindState::default()
        };
        let video = KindState {
            device: constraints.device_constraints(TrackKind::Video),
            ..KindState::default()
        };

        Self {
            stream_id,
            constraints,
            capture,
            transport,
            audio: Mutex::new(audio),
            video: Mutex::new(video),
        }
    }

    #[must_use]
    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    #[must_use]
    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    fn slot(&self, kind: TrackKind) -> &Mutex<KindState> {
        match kind {
            TrackKind::Audio => &self.audio,
            TrackKind::Video => &self.video,
        }
    }

    /// Acquire the tracks the constraints ask for and register them locally.
    ///
    /// Kinds that already hold a track are left alone. If any acquisition
    /// fails, tracks acquired by this call are stopped again.
    ///
    /// # Errors
    ///
    /// `DeviceAcquisitionFailed` if a device cannot be opened.
    #[instrument(skip_all, name = "rc.publication.capture", fields(stream_id = %self.stream_id))]
    pub async fn capture(&self) -> Result<(), ClientError> {
        // Fixed lock order: audio before video.
        let mut audio = self.audio.lock().await;
        let mut video = self.video.lock().await;

        let mut acquired: Vec<(TrackKind, Arc<dyn LocalTrack>)> = Vec::new();
        for kind in TrackKind::ALL {
            let state: &KindState = match kind {
                TrackKind::Audio => &*audio,
                TrackKind::Video => &*video,
            };
            if !self.constraints.wants(kind) || state.track.is_some() {
                continue;
            }
            match self.capture.acquire(kind, &state.device).await {
                Ok(track) => acquired.push((kind, track)),
                Err(e) => {
                    warn!(
                        target: "rc.publication",
                        kind = %kind,
                        error = %e,
                        "Capture failed, releasing tracks acquired so far"
                    );
                    for (_, track) in acquired {
                        track.stop();
                    }
                    return Err(e.into());
                }
            }
        }

        for (kind, track) in acquired {
            let state = match kind {
                TrackKind::Audio => &mut *audio,
                TrackKind::Video => &mut *video,
            };
            debug!(
                target: "rc.publication",
                kind = %kind,
                track_id = track.id(),
                "Track captured"
            );
            state.track = Some(track);
            state.muted = false;
        }

        Ok(())
    }

    /// Start sending every captured track.
    ///
    /// # Errors
    ///
    /// `ProtocolUsage` if nothing has been captured, `Transport` if the
    /// outbound transport rejects a change.
    #[instrument(skip_all, name = "rc.publication.publish", fields(stream_id = %self.stream_id))]
    pub async fn publish(&self) -> Result<(), ClientError> {
        let mut any = false;
        for kind in TrackKind::ALL {
            let mut state = self.slot(kind).lock().await;
            if state.track.is_some() {
                self.publish_kind(kind, &mut state).await?;
                any = true;
            }
        }

        if any {
            info!(target: "rc.publication", stream_id = %self.stream_id, "Stream published");
            Ok(())
        } else {
            Err(ClientError::ProtocolUsage(
                "no captured track to publish".to_string(),
            ))
        }
    }

    async fn publish_kind(
        &self,
        kind: TrackKind,
        state: &mut MutexGuard<'_, KindState>,
    ) -> Result<(), ClientError> {
        let Some(track) = state.track.clone() else {
            return Ok(());
        };
        let encodings = self.constraints.encodings_for(kind);

        match self.transport.transceiver(kind) {
            Some(transceiver) => {
                transceiver.replace_track(Some(track)).await?;
                transceiver.set_parameters(encodings.clone()).await?;
                if transceiver.direction() == Direction::Inactive {
                    transceiver.set_direction(Direction::SendOnly);
                }
            }
            None => {
                self.transport
                    .add_transceiver(track, encodings.clone())
                    .await?;
            }
        }

        debug!(
            target: "rc.publication",
            kind = %kind,
            layers = encodings.len(),
            "Track published"
        );
        state.published = true;
        state.encodings = encodings;
        Ok(())
    }

    /// Stop sending. Captured tracks stay registered locally. Idempotent.
    ///
    /// # Errors
    ///
    /// `Transport` if the outbound transport rejects detaching a track.
    #[instrument(skip_all, name = "rc.publication.unpublish", fields(stream_id = %self.stream_id))]
    pub async fn unpublish(&self) -> Result<(), ClientError> {
        for kind in TrackKind::ALL {
            let mut state = self.slot(kind).lock().await;
            if let Some(transceiver) = self.transport.transceiver(kind) {
                if transceiver.track().is_some() {
                    transceiver.replace_track(None).await?;
                }
                if transceiver.direction() != Direction::Inactive {
                    transceiver.set_direction(Direction::Inactive);
                }
            }
            state.published = false;
        }
        Ok(())
    }

    /// Move `kind` to another capture device.
    ///
    /// A live, published track is replaced in place on its transceiver.
    /// Otherwise the new track is only registered locally until the next
    /// `publish`. A muted kind stays muted: only the device is recorded, and
    /// the next `unmute` opens it.
    ///
    /// # Errors
    ///
    /// `ProtocolUsage` if the kind has neither a track nor a transceiver,
    /// `DeviceAcquisitionFailed` if the device cannot be opened (state is
    /// unchanged), `Transport` if the swap is rejected.
    #[instrument(skip_all, name = "rc.publication.switch_device", fields(kind = %kind))]
    pub async fn switch_device(
        &self,
        kind: TrackKind,
        device_id: impl Into<String>,
    ) -> Result<(), ClientError> {
        let mut state = self.slot(kind).lock().await;

        if state.track.is_none() && self.transport.transceiver(kind).is_none() {
            return Err(ClientError::ProtocolUsage(format!(
                "no {kind} track or transceiver to switch"
            )));
        }

        let device = state.device.with_device_id(device_id);

        if state.muted {
            state.device = device;
            info!(
                target: "rc.publication",
                kind = %kind,
                device_id = state.device.device_id.as_deref().unwrap_or_default(),
                "Device recorded for unmute"
            );
            return Ok(());
        }

        let track = self.capture.acquire(kind, &device).await?;

        let in_place = state.published
            && state.track.as_ref().is_some_and(|t| t.enabled());
        self.substitute(kind, &mut state, track, in_place).await?;
        state.device = device;

        info!(
            target: "rc.publication",
            kind = %kind,
            device_id = state.device.device_id.as_deref().unwrap_or_default(),
            in_place,
            "Device switched"
        );
        Ok(())
    }

    /// Stop the captured track for `kind`. The transceiver keeps its slot.
    ///
    /// # Errors
    ///
    /// `ProtocolUsage` if the kind has no track.
    pub async fn mute(&self, kind: TrackKind) -> Result<(), ClientError> {
        let mut state = self.slot(kind).lock().await;
        let Some(track) = state.track.as_ref() else {
            return Err(ClientError::ProtocolUsage(format!("no {kind} track to mute")));
        };
        track.stop();
        state.muted = true;
        debug!(target: "rc.publication", kind = %kind, "Track muted");
        Ok(())
    }

    /// Reacquire `kind` with its current device constraints and swap it in,
    /// keeping the publish state.
    ///
    /// # Errors
    ///
    /// `ProtocolUsage` if the kind has no track, `DeviceAcquisitionFailed`
    /// if the device cannot be opened (the kind stays muted).
    pub async fn unmute(&self, kind: TrackKind) -> Result<(), ClientError> {
        let mut state = self.slot(kind).lock().await;
        if state.track.is_none() {
            return Err(ClientError::ProtocolUsage(format!("no {kind} track to unmute")));
        }
        if !state.muted {
            return Ok(());
        }

        let track = self.capture.acquire(kind, &state.device).await?;
        let in_place = state.published;
        self.substitute(kind, &mut state, track, in_place).await?;
        state.muted = false;
        debug!(target: "rc.publication", kind = %kind, "Track unmuted");
        Ok(())
    }

    /// Swap `track` in. On transport failure the new track is released and
    /// the previous one stays.
    async fn substitute(
        &self,
        kind: TrackKind,
        state: &mut MutexGuard<'_, KindState>,
        track: Arc<dyn LocalTrack>,
        in_place: bool,
    ) -> Result<(), ClientError> {
        if in_place {
            if let Some(transceiver) = self.transport.transceiver(kind) {
                if let Err(e) = transceiver.replace_track(Some(Arc::clone(&track))).await {
                    track.stop();
                    return Err(e.into());
                }
            }
        }

        if let Some(previous) = state.track.replace(track) {
            previous.stop();
        }
        Ok(())
    }

    /// Encodings applied the last time `kind` was published.
    pub async fn layers(&self, kind: TrackKind) -> Vec<EncodingLayer> {
        self.slot(kind).lock().await.encodings.clone()
    }

    /// Track currently registered for `kind`.
    pub async fn track(&self, kind: TrackKind) -> Option<Arc<dyn LocalTrack>> {
        self.slot(kind).lock().await.track.clone()
    }

    pub async fn is_published(&self, kind: TrackKind) -> bool {
        self.slot(kind).lock().await.published
    }

    pub async fn is_muted(&self, kind: TrackKind) -> bool {
        self.slot(kind).lock().await.muted
    }

    /// Unpublish and release every device.
    ///
    /// # Errors
    ///
    /// `Transport` if detaching fails. Tracks are released regardless.
    pub async fn close(&self) -> Result<(), ClientError> {
        let result = self.unpublish().await;
        for kind in TrackKind::ALL {
            let mut state = self.slot(kind).lock().await;
            if let Some(track) = state.track.take() {
                track.stop();
            }
            state.muted = false;
            state.encodings.clear();
        }
        info!(target: "rc.publication", stream_id = %self.stream_id, "Publication closed");
        result
    }
}
