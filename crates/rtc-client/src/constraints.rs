//! Publication intent declared by the application.

use crate::encoding::{preset_layer, simulcast_layers, EncodingLayer, LayerOverride, Resolution};
use crate::media::{DeviceConstraints, TrackKind};

use serde::{Deserialize, Serialize};

/// What to capture and how to encode it.
///
/// Supplied once when a publication controller is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Constraints {
    pub resolution: Resolution,
    pub simulcast: bool,
    /// Per-tier caps merged over the simulcast defaults.
    pub encodings: Vec<LayerOverride>,
    pub audio: bool,
    pub video: bool,
    pub audio_device: Option<String>,
    pub video_device: Option<String>,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            simulcast: false,
            encodings: Vec::new(),
            audio: true,
            video: true,
            audio_device: None,
            video_device: None,
        }
    }
}

impl Constraints {
    /// Whether `kind` should be captured at all.
    #[must_use]
    pub const fn wants(&self, kind: TrackKind) -> bool {
        match kind {
            TrackKind::Audio => self.audio,
            TrackKind::Video => self.video,
        }
    }

    /// Initial capture request for `kind`.
    #[must_use]
    pub fn device_constraints(&self, kind: TrackKind) -> DeviceConstraints {
        match kind {
            TrackKind::Audio => DeviceConstraints {
                device_id: self.audio_device.clone(),
                ..DeviceConstraints::default()
            },
            TrackKind::Video => {
                let preset = self.resolution.preset();
                DeviceConstraints {
                    device_id: self.video_device.clone(),
                    width: Some(preset.width),
                    height: Some(preset.height),
                    frame_rate: Some(preset.frame_rate),
                }
            }
        }
    }

    /// Encodings to apply when publishing a track of `kind`.
    #[must_use]
    pub fn encodings_for(&self, kind: TrackKind) -> Vec<EncodingLayer> {
        match kind {
            TrackKind::Audio => vec![EncodingLayer::default()],
            TrackKind::Video if self.simulcast => simulcast_layers(&self.encodings),
            TrackKind::Video => preset_layer(self.resolution),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use signaling_protocol::Layer;

    #[test]
    fn test_defaults() {
        let c = Constraints::default();
        assert!(c.audio && c.video);
        assert!(!c.simulcast);
        assert_eq!(c.resolution, Resolution::Hd);
    }

    #[test]
    fn test_deserialize_fills_missing_fields() {
        let c: Constraints = serde_json::from_str(
            r#"{"simulcast": true, "encodings": [{"layer": "medium", "maxBitrate": 300000}]}"#,
        )
        .unwrap();
        assert!(c.simulcast);
        assert!(c.audio);
        assert_eq!(c.encodings.len(), 1);
        assert_eq!(c.encodings[0].layer, Layer::Medium);
    }

    #[test]
    fn test_video_device_constraints_follow_preset() {
        let c = Constraints {
            resolution: Resolution::Vga,
            video_device: Some("cam-2".to_string()),
            ..Constraints::default()
        };
        let dc = c.device_constraints(TrackKind::Video);
        assert_eq!(dc.device_id.as_deref(), Some("cam-2"));
        assert_eq!(dc.width, Some(640));
        assert_eq!(dc.height, Some(360));

        let audio = c.device_constraints(TrackKind::Audio);
        assert_eq!(audio, DeviceConstraints::default());
    }

    #[test]
    fn test_encodings_for_each_mode() {
        let single = Constraints::default();
        assert_eq!(single.encodings_for(TrackKind::Video).len(), 1);
        assert_eq!(single.encodings_for(TrackKind::Audio), vec![EncodingLayer::default()]);

        let simulcast = Constraints {
            simulcast: true,
            ..Constraints::default()
        };
        assert_eq!(simulcast.encodings_for(TrackKind::Video).len(), 3);
        // Simulcast never applies to audio.
        assert_eq!(simulcast.encodings_for(TrackKind::Audio).len(), 1);
    }
}
