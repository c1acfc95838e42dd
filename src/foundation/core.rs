use crate::foundation::error::{CaptureError, CaptureResult};

pub use kurbo::{Point, Rect};

/// Selector used when the caller does not name a capture target.
pub const DOCUMENT_ROOT_SELECTOR: &str = ":root";

/// Smallest clip edge the encoder accepts.
pub const MIN_CLIP_EDGE: u32 = 2;

/// Frames-per-second represented as a rational `num/den`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Fps {
    pub num: u32,
    pub den: u32, // must be > 0
}

impl Fps {
    pub fn new(num: u32, den: u32) -> CaptureResult<Self> {
        if den == 0 {
            return Err(CaptureError::validation("Fps den must be > 0"));
        }
        if num == 0 {
            return Err(CaptureError::validation("Fps num must be > 0"));
        }
        Ok(Self { num, den })
    }

    /// Rate whose frame duration is the GIF-representable value closest to `secs`.
    ///
    /// GIF delays are whole centiseconds and players clamp anything under 2cs.
    pub fn from_frame_duration_secs(secs: f64) -> CaptureResult<Self> {
        if !secs.is_finite() || secs <= 0.0 {
            return Err(CaptureError::validation(
                "frame duration must be a positive number of seconds",
            ));
        }
        let centis = (secs * 100.0).round().clamp(2.0, f64::from(u16::MAX)) as u32;
        Self::new(100, centis)
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    pub fn frame_duration_secs(self) -> f64 {
        f64::from(self.den) / f64::from(self.num)
    }

    /// Timeline distance between consecutive frames, in milliseconds.
    pub fn frame_step_ms(self) -> f64 {
        1000.0 * self.frame_duration_secs()
    }

    pub fn frames_to_secs(self, frames: u64) -> f64 {
        (frames as f64) * self.frame_duration_secs()
    }
}

/// Where the captured page comes from.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageSource {
    /// Inline HTML injected into a blank page.
    Html(String),
    /// URL the page navigates to.
    Url(String),
}

/// Browser viewport size in CSS pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> CaptureResult<Self> {
        if width == 0 || height == 0 {
            return Err(CaptureError::validation(
                "viewport width/height must be non-zero",
            ));
        }
        Ok(Self { width, height })
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Immutable description of what to capture.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CaptureTarget {
    pub selector: String,
    pub source: PageSource,
    pub viewport: Viewport,
}

impl CaptureTarget {
    /// Target the whole document of `source`.
    pub fn new(source: PageSource, viewport: Viewport) -> Self {
        Self {
            selector: DOCUMENT_ROOT_SELECTOR.to_string(),
            source,
            viewport,
        }
    }

    /// Narrow the target to the subtree matched by `selector`.
    ///
    /// A blank selector keeps the document root.
    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        let selector = selector.into();
        if !selector.trim().is_empty() {
            self.selector = selector;
        }
        self
    }
}

/// Round a pixel length up to the next even value, never below [`MIN_CLIP_EDGE`].
///
/// The encoder's pixel format has half-resolution chroma planes, so odd edges are rejected.
pub fn even_dimension(v: u32) -> u32 {
    let v = v.max(MIN_CLIP_EDGE);
    if v.is_multiple_of(2) { v } else { v + 1 }
}

/// Pixel rectangle screenshotted for every frame. Width and height are always even and >= 2.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CaptureClip {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CaptureClip {
    /// Snap a floating-point box outward to whole pixels and normalize its edges.
    ///
    /// Content left of or above the page origin cannot be screenshotted and is cut off.
    pub fn from_rect(rect: Rect) -> Self {
        let rect = rect.abs();
        let x0 = finite_or_zero(rect.x0.floor()).max(0.0);
        let y0 = finite_or_zero(rect.y0.floor()).max(0.0);
        let x1 = finite_or_zero(rect.x1.ceil()).max(x0);
        let y1 = finite_or_zero(rect.y1.ceil()).max(y0);

        Self {
            x: x0 as u32,
            y: y0 as u32,
            width: even_dimension((x1 - x0) as u32),
            height: even_dimension((y1 - y0) as u32),
        }
    }

    /// Output dimensions after resampling by `scale`, kept even.
    pub fn scaled_dims(self, scale: f32) -> (u32, u32) {
        let scale = if scale.is_finite() && scale > 0.0 {
            f64::from(scale)
        } else {
            1.0
        };
        let w = (f64::from(self.width) * scale).round() as u32;
        let h = (f64::from(self.height) * scale).round() as u32;
        (even_dimension(w), even_dimension(h))
    }

    pub fn to_rect(self) -> Rect {
        Rect::new(
            f64::from(self.x),
            f64::from(self.y),
            f64::from(self.x + self.width),
            f64::from(self.y + self.height),
        )
    }
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() { v } else { 0.0 }
}

/// Encoded (PNG) frame tagged with its capture sequence index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameBuffer {
    pub seq: u64,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl FrameBuffer {
    /// Byte-level identity, ignoring the sequence index.
    pub fn same_pixels(&self, other: &FrameBuffer) -> bool {
        self.width == other.width && self.height == other.height && self.data == other.data
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
