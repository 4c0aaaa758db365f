//! Resolution presets and outbound encoding layers.
//!
//! With simulcast a video track is sent as three renditions:
//!
//! | rid | tier   | scale | max bitrate |
//! |-----|--------|-------|-------------|
//! | `f` | high   | 1     | uncapped    |
//! | `h` | medium | 2     | 150 kbps    |
//! | `q` | low    | 4     | 100 kbps    |
//!
//! Caller overrides are merged into the matching tier only. Without
//! simulcast the single encoding comes from the resolution preset.

use serde::{Deserialize, Serialize};
use signaling_protocol::Layer;
use tracing::warn;

/// Capture size and non-simulcast encoding cap of a resolution preset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoPreset {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub max_bitrate: u64,
}

impl VideoPreset {
    const fn new(width: u32, height: u32, frame_rate: f64, max_bitrate: u64) -> Self {
        Self {
            width,
            height,
            frame_rate,
            max_bitrate,
        }
    }
}

/// Named capture resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Qvga,
    Vga,
    Shd,
    #[default]
    Hd,
    Fhd,
    Qhd,
}

impl Resolution {
    pub const ALL: [Resolution; 6] = [
        Resolution::Qvga,
        Resolution::Vga,
        Resolution::Shd,
        Resolution::Hd,
        Resolution::Fhd,
        Resolution::Qhd,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Resolution::Qvga => "qvga",
            Resolution::Vga => "vga",
            Resolution::Shd => "shd",
            Resolution::Hd => "hd",
            Resolution::Fhd => "fhd",
            Resolution::Qhd => "qhd",
        }
    }

    #[must_use]
    pub const fn preset(self) -> VideoPreset {
        match self {
            Resolution::Qvga => VideoPreset::new(320, 180, 15.0, 150_000),
            Resolution::Vga => VideoPreset::new(640, 360, 30.0, 500_000),
            Resolution::Shd => VideoPreset::new(960, 540, 30.0, 1_200_000),
            Resolution::Hd => VideoPreset::new(1280, 720, 30.0, 2_500_000),
            Resolution::Fhd => VideoPreset::new(1920, 1080, 30.0, 4_000_000),
            Resolution::Qhd => VideoPreset::new(2560, 1440, 30.0, 8_000_000),
        }
    }
}

/// One simulcast rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimulcastTier {
    High,
    Medium,
    Low,
}

impl SimulcastTier {
    /// Ordered high to low.
    pub const ALL: [SimulcastTier; 3] = [
        SimulcastTier::High,
        SimulcastTier::Medium,
        SimulcastTier::Low,
    ];

    /// RTP stream id.
    #[must_use]
    pub const fn rid(self) -> &'static str {
        match self {
            SimulcastTier::High => "f",
            SimulcastTier::Medium => "h",
            SimulcastTier::Low => "q",
        }
    }

    /// Tier for a receive-quality layer. `Layer::None` has no tier.
    #[must_use]
    pub const fn from_layer(layer: Layer) -> Option<Self> {
        match layer {
            Layer::High => Some(SimulcastTier::High),
            Layer::Medium => Some(SimulcastTier::Medium),
            Layer::Low => Some(SimulcastTier::Low),
            Layer::None => None,
        }
    }

    fn default_layer(self) -> EncodingLayer {
        let (max_bitrate, scale) = match self {
            SimulcastTier::High => (None, 1.0),
            SimulcastTier::Medium => (Some(150_000), 2.0),
            SimulcastTier::Low => (Some(100_000), 4.0),
        };
        EncodingLayer {
            rid: Some(self.rid().to_string()),
            max_bitrate,
            max_framerate: None,
            scale_resolution_down_by: Some(scale),
        }
    }
}

/// Caller-supplied caps for one simulcast tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerOverride {
    pub layer: Layer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bitrate: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_framerate: Option<f64>,
}

/// Parameters of one outbound encoding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodingLayer {
    pub rid: Option<String>,
    /// Bits per second. `None` is uncapped.
    pub max_bitrate: Option<u64>,
    pub max_framerate: Option<f64>,
    pub scale_resolution_down_by: Option<f64>,
}

/// Three simulcast layers, high to low, with `overrides` merged in.
#[must_use]
pub fn simulcast_layers(overrides: &[LayerOverride]) -> Vec<EncodingLayer> {
    let mut layers: Vec<EncodingLayer> = SimulcastTier::ALL
        .iter()
        .map(|tier| tier.default_layer())
        .collect();

    for o in overrides {
        let Some(tier) = SimulcastTier::from_layer(o.layer) else {
            warn!(target: "rc.encoding", "Ignoring encoding override for layer none");
            continue;
        };
        let rid = tier.rid();
        if let Some(layer) = layers.iter_mut().find(|l| l.rid.as_deref() == Some(rid)) {
            if let Some(bitrate) = o.max_bitrate {
                layer.max_bitrate = Some(bitrate);
            }
            if let Some(framerate) = o.max_framerate {
                layer.max_framerate = Some(framerate);
            }
        }
    }

    layers
}

/// Single encoding capped by the preset.
#[must_use]
pub fn preset_layer(resolution: Resolution) -> Vec<EncodingLayer> {
    let preset = resolution.preset();
    vec![EncodingLayer {
        rid: None,
        max_bitrate: Some(preset.max_bitrate),
        max_framerate: Some(preset.frame_rate),
        scale_resolution_down_by: None,
    }]
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_default_simulcast_layers() {
        let layers = simulcast_layers(&[]);
        assert_eq!(layers.len(), 3);

        assert_eq!(layers[0].rid.as_deref(), Some("f"));
        assert_eq!(layers[0].max_bitrate, None);
        assert_eq!(layers[0].scale_resolution_down_by, Some(1.0));

        assert_eq!(layers[1].rid.as_deref(), Some("h"));
        assert_eq!(layers[1].max_bitrate, Some(150_000));
        assert_eq!(layers[1].scale_resolution_down_by, Some(2.0));

        assert_eq!(layers[2].rid.as_deref(), Some("q"));
        assert_eq!(layers[2].max_bitrate, Some(100_000));
        assert_eq!(layers[2].scale_resolution_down_by, Some(4.0));
    }

    #[test]
    fn test_override_merges_into_matching_tier_only() {
        let layers = simulcast_layers(&[LayerOverride {
            layer: Layer::Medium,
            max_bitrate: Some(300_000),
            max_framerate: None,
        }]);

        assert_eq!(layers[0].max_bitrate, None);
        assert_eq!(layers[1].max_bitrate, Some(300_000));
        assert_eq!(layers[1].scale_resolution_down_by, Some(2.0));
        assert_eq!(layers[1].max_framerate, None);
        assert_eq!(layers[2].max_bitrate, Some(100_000));
    }

    #[test]
    fn test_override_framerate_keeps_default_bitrate() {
        let layers = simulcast_layers(&[LayerOverride {
            layer: Layer::Low,
            max_bitrate: None,
            max_framerate: Some(10.0),
        }]);
        assert_eq!(layers[2].max_bitrate, Some(100_000));
        assert_eq!(layers[2].max_framerate, Some(10.0));
    }

    #[test]
    fn test_override_for_none_layer_is_ignored() {
        let layers = simulcast_layers(&[LayerOverride {
            layer: Layer::None,
            max_bitrate: Some(1),
            max_framerate: None,
        }]);
        assert_eq!(layers, simulcast_layers(&[]));
    }

    #[test]
    fn test_preset_table() {
        let hd = Resolution::Hd.preset();
        assert_eq!((hd.width, hd.height), (1280, 720));
        assert_eq!(hd.max_bitrate, 2_500_000);

        let qvga = Resolution::Qvga.preset();
        assert_eq!((qvga.width, qvga.height), (320, 180));
        assert_eq!(qvga.frame_rate, 15.0);

        // Presets grow monotonically.
        let bitrates: Vec<u64> = Resolution::ALL.iter().map(|r| r.preset().max_bitrate).collect();
        assert!(bitrates.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_preset_layer_uses_preset_caps() {
        let layers = preset_layer(Resolution::Vga);
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].rid, None);
        assert_eq!(layers[0].max_bitrate, Some(500_000));
        assert_eq!(layers[0].max_framerate, Some(30.0));
    }

    #[test]
    fn test_resolution_serde_names() {
        let r: Resolution = serde_json::from_str("\"fhd\"").unwrap();
        assert_eq!(r, Resolution::Fhd);
        assert_eq!(r.as_str(), "fhd");
    }
}
