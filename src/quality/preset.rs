use std::fmt;
use std::str::FromStr;

use image::codecs::png::CompressionType;
use image::imageops::FilterType;

use crate::foundation::core::CaptureClip;
use crate::foundation::error::{CaptureError, CaptureResult};

/// Closed set of quality levels.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum QualityKey {
    Low,
    #[default]
    Medium,
    High,
}

impl QualityKey {
    pub const ALL: [QualityKey; 3] = [QualityKey::Low, QualityKey::Medium, QualityKey::High];

    pub fn as_str(self) -> &'static str {
        match self {
            QualityKey::Low => "low",
            QualityKey::Medium => "medium",
            QualityKey::High => "high",
        }
    }

    pub fn preset(self) -> &'static QualityPreset {
        &PRESETS[self as usize]
    }
}

impl fmt::Display for QualityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityKey {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(QualityKey::Low),
            "medium" => Ok(QualityKey::Medium),
            "high" => Ok(QualityKey::High),
            _ => Err(CaptureError::InvalidQualityPreset(s.to_string())),
        }
    }
}

/// `paletteuse` dithering mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dither {
    Bayer { scale: u8 },
    Sierra2_4a,
    FloydSteinberg,
    None,
}

impl Dither {
    /// Value of the `dither` option, including any sub-options it needs.
    pub fn filter_value(self) -> String {
        match self {
            Dither::Bayer { scale } => format!("bayer:bayer_scale={}", scale.min(5)),
            Dither::Sierra2_4a => "sierra2_4a".to_string(),
            Dither::FloydSteinberg => "floyd_steinberg".to_string(),
            Dither::None => "none".to_string(),
        }
    }
}

/// `palettegen` statistics mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatsMode {
    Full,
    Diff,
    Single,
}

impl StatsMode {
    pub fn filter_value(self) -> &'static str {
        match self {
            StatsMode::Full => "full",
            StatsMode::Diff => "diff",
            StatsMode::Single => "single",
        }
    }
}

/// Palette generation/application parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PaletteParams {
    pub max_colors: u16,
    pub dither: Dither,
    pub stats_mode: StatsMode,
}

/// Per-frame resize and recompression parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResampleParams {
    /// Output scale relative to the capture clip.
    pub scale: f32,
    pub filter: FilterType,
    pub compression: CompressionType,
}

/// Frozen bundle of encoder and resampling parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QualityPreset {
    pub key: QualityKey,
    pub palette: PaletteParams,
    pub resample: ResampleParams,
}

impl QualityPreset {
    /// Encoder frame size for a clip; always even.
    pub fn output_dims(&self, clip: CaptureClip) -> (u32, u32) {
        clip.scaled_dims(self.resample.scale)
    }
}

// Indexed by `QualityKey as usize`.
static PRESETS: [QualityPreset; 3] = [
    QualityPreset {
        key: QualityKey::Low,
        palette: PaletteParams {
            max_colors: 128,
            dither: Dither::Bayer { scale: 3 },
            stats_mode: StatsMode::Diff,
        },
        resample: ResampleParams {
            scale: 0.5,
            filter: FilterType::Triangle,
            compression: CompressionType::Fast,
        },
    },
    QualityPreset {
        key: QualityKey::Medium,
        palette: PaletteParams {
            max_colors: 192,
            dither: Dither::Sierra2_4a,
            stats_mode: StatsMode::Diff,
        },
        resample: ResampleParams {
            scale: 0.75,
            filter: FilterType::CatmullRom,
            compression: CompressionType::Fast,
        },
    },
    QualityPreset {
        key: QualityKey::High,
        palette: PaletteParams {
            max_colors: 256,
            dither: Dither::FloydSteinberg,
            stats_mode: StatsMode::Full,
        },
        resample: ResampleParams {
            scale: 1.0,
            filter: FilterType::Lanczos3,
            compression: CompressionType::Default,
        },
    },
];

/// Resolve a quality name; absence means `medium`, matching is case-insensitive.
pub fn resolve_preset(name: Option<&str>) -> CaptureResult<&'static QualityPreset> {
    let key = match name {
        None => QualityKey::default(),
        Some(name) => name.parse::<QualityKey>()?,
    };
    Ok(key.preset())
}

#[cfg(test)]
#[path = "../../tests/unit/quality/preset.rs"]
mod tests;
