//! Mock media stack for client tests.
//!
//! - `MockCapture` hands out `MockTrack`s, optionally after a delay, and can
//!   be scripted to fail
//! - `MockTransport` / `MockTransceiver` record every track swap so tests
//!   can check the outbound slot was never left empty
//! - `MockControlChannel` keeps every selection it was asked to send

use async_trait::async_trait;
use bytes::Bytes;
use rtc_client::{
    AcquisitionError, ControlChannel, DeviceConstraints, Direction, EncodingLayer, LocalTrack,
    MediaCapture, OutboundTransport, TrackKind, Transceiver, TransportError,
};
use signaling_protocol::codec::decode_selection;
use signaling_protocol::Selection;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Captured track whose only state is whether it was stopped.
#[derive(Debug)]
pub struct MockTrack {
    id: String,
    kind: TrackKind,
    device_id: Option<String>,
    stopped: AtomicBool,
}

impl MockTrack {
    #[must_use]
    pub fn new(id: &str, kind: TrackKind, device_id: Option<String>) -> Self {
        Self {
            id: id.to_string(),
            kind,
            device_id,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl LocalTrack for MockTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    fn enabled(&self) -> bool {
        !self.is_stopped()
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Capture device mock.
#[derive(Debug, Default)]
pub struct MockCapture {
    next_id: AtomicU64,
    delay: Option<Duration>,
    outcomes: Mutex<VecDeque<Option<AcquisitionError>>>,
    requests: Mutex<Vec<(TrackKind, DeviceConstraints)>>,
    tracks: Mutex<Vec<Arc<MockTrack>>>,
}

impl MockCapture {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every acquisition waits `delay` before completing.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a failure. Scripted outcomes are consumed one per acquisition.
    pub fn fail_next(&self, error: AcquisitionError) {
        self.outcomes.lock().unwrap().push_back(Some(error));
    }

    /// Queue a success, so a later scripted failure hits a later attempt.
    pub fn succeed_next(&self) {
        self.outcomes.lock().unwrap().push_back(None);
    }

    /// Constraints of every acquisition attempt, in order.
    pub fn requests(&self) -> Vec<(TrackKind, DeviceConstraints)> {
        self.requests.lock().unwrap().clone()
    }

    /// Every track handed out, in order.
    pub fn tracks(&self) -> Vec<Arc<MockTrack>> {
        self.tracks.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaCapture for MockCapture {
    async fn acquire(
        &self,
        kind: TrackKind,
        constraints: &DeviceConstraints,
    ) -> Result<Arc<dyn LocalTrack>, AcquisitionError> {
        self.requests
            .lock()
            .unwrap()
            .push((kind, constraints.clone()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(Some(error)) = self.outcomes.lock().unwrap().pop_front() {
            return Err(error);
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let track = Arc::new(MockTrack::new(
            &format!("{}-{n}", kind.as_str()),
            kind,
            constraints.device_id.clone(),
        ));
        self.tracks.lock().unwrap().push(Arc::clone(&track));
        Ok(track as Arc<dyn LocalTrack>)
    }
}

/// Transceiver mock.
#[derive(Debug)]
pub struct MockTransceiver {
    kind: TrackKind,
    track: Mutex<Option<Arc<dyn LocalTrack>>>,
    encodings: Mutex<Vec<EncodingLayer>>,
    direction: Mutex<Direction>,
    replacements: Mutex<Vec<Option<String>>>,
    fail_replace: AtomicBool,
}

impl MockTransceiver {
    #[must_use]
    pub fn new(kind: TrackKind, direction: Direction) -> Self {
        Self {
            kind,
            track: Mutex::new(None),
            encodings: Mutex::new(Vec::new()),
            direction: Mutex::new(direction),
            replacements: Mutex::new(Vec::new()),
            fail_replace: AtomicBool::new(false),
        }
    }

    /// Track id passed to each `replace_track` call, in order.
    pub fn replacements(&self) -> Vec<Option<String>> {
        self.replacements.lock().unwrap().clone()
    }

    pub fn track_id(&self) -> Option<String> {
        self.track
            .lock()
            .unwrap()
            .as_ref()
            .map(|t| t.id().to_string())
    }

    /// Make `replace_track` fail until reset.
    pub fn fail_replace(&self, fail: bool) {
        self.fail_replace.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transceiver for MockTransceiver {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn track(&self) -> Option<Arc<dyn LocalTrack>> {
        self.track.lock().unwrap().clone()
    }

    fn parameters(&self) -> Vec<EncodingLayer> {
        self.encodings.lock().unwrap().clone()
    }

    async fn set_parameters(&self, encodings: Vec<EncodingLayer>) -> Result<(), TransportError> {
        *self.encodings.lock().unwrap() = encodings;
        Ok(())
    }

    async fn replace_track(
        &self,
        track: Option<Arc<dyn LocalTrack>>,
    ) -> Result<(), TransportError> {
        if self.fail_replace.load(Ordering::SeqCst) {
            return Err(TransportError("replace_track rejected".to_string()));
        }
        self.replacements
            .lock()
            .unwrap()
            .push(track.as_ref().map(|t| t.id().to_string()));
        *self.track.lock().unwrap() = track;
        Ok(())
    }

    fn direction(&self) -> Direction {
        *self.direction.lock().unwrap()
    }

    fn set_direction(&self, direction: Direction) {
        *self.direction.lock().unwrap() = direction;
    }
}

/// Outbound transport mock holding at most one transceiver per kind.
#[derive(Debug, Default)]
pub struct MockTransport {
    transceivers: Mutex<HashMap<TrackKind, Arc<MockTransceiver>>>,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-create a transceiver, as if negotiated earlier.
    #[must_use]
    pub fn with_transceiver(self, kind: TrackKind, direction: Direction) -> Self {
        self.transceivers
            .lock()
            .unwrap()
            .insert(kind, Arc::new(MockTransceiver::new(kind, direction)));
        self
    }

    pub fn mock_transceiver(&self, kind: TrackKind) -> Option<Arc<MockTransceiver>> {
        self.transceivers.lock().unwrap().get(&kind).cloned()
    }
}

#[async_trait]
impl OutboundTransport for MockTransport {
    fn transceiver(&self, kind: TrackKind) -> Option<Arc<dyn Transceiver>> {
        self.mock_transceiver(kind)
            .map(|t| t as Arc<dyn Transceiver>)
    }

    async fn add_transceiver(
        &self,
        track: Arc<dyn LocalTrack>,
        encodings: Vec<EncodingLayer>,
    ) -> Result<Arc<dyn Transceiver>, TransportError> {
        let kind = track.kind();
        let transceiver = Arc::new(MockTransceiver::new(kind, Direction::SendOnly));
        transceiver.replace_track(Some(track)).await?;
        transceiver.set_parameters(encodings).await?;
        self.transceivers
            .lock()
            .unwrap()
            .insert(kind, Arc::clone(&transceiver));
        Ok(transceiver as Arc<dyn Transceiver>)
    }
}

/// Control side-channel mock.
#[derive(Debug, Default)]
pub struct MockControlChannel {
    sent: Mutex<Vec<Bytes>>,
    fail: AtomicBool,
}

impl MockControlChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Every selection sent so far, decoded.
    pub fn selections(&self) -> Vec<Selection> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|b| decode_selection(b).expect("mock received invalid selection"))
            .collect()
    }

    pub fn last_selection(&self) -> Option<Selection> {
        self.selections().pop()
    }
}

#[async_trait]
impl ControlChannel for MockControlChannel {
    async fn send(&self, data: Bytes) -> Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError("control channel closed".to_string()));
        }
        self.sent.lock().unwrap().push(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_capture_scripted_failure() {
        let capture = MockCapture::new();
        capture.fail_next(AcquisitionError::PermissionDenied);

        let constraints = DeviceConstraints::default();
        assert!(capture.acquire(TrackKind::Video, &constraints).await.is_err());
        let track = capture
            .acquire(TrackKind::Video, &constraints)
            .await
            .unwrap();
        assert_eq!(track.kind(), TrackKind::Video);
        assert!(track.enabled());
        assert_eq!(capture.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_transport_records_replacements() {
        let transport = MockTransport::new();
        let track: Arc<dyn LocalTrack> = Arc::new(MockTrack::new("a-0", TrackKind::Audio, None));
        transport
            .add_transceiver(track, vec![EncodingLayer::default()])
            .await
            .unwrap();

        let transceiver = transport.mock_transceiver(TrackKind::Audio).unwrap();
        assert_eq!(transceiver.replacements(), vec![Some("a-0".to_string())]);
        assert_eq!(transceiver.direction(), Direction::SendOnly);
    }
}
