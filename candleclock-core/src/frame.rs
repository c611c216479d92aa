//! Captured frames as they leave the capture boundary.
//!
//! The core never decodes pixels; it only needs the encoded payload and the
//! geometry the capture source settled on.

use serde::{Deserialize, Serialize};

/// Widest frame forwarded to the decision source.
pub const MAX_FRAME_WIDTH: u32 = 1280;

/// Lossy encode quality applied at the capture boundary.
pub const FRAME_QUALITY: f32 = 0.6;

/// A downscaled, lossy-encoded still frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedFrame {
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub quality: f32,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl EncodedFrame {
    pub fn jpeg(width: u32, height: u32, quality: f32, bytes: Vec<u8>) -> Self {
        Self {
            mime: "image/jpeg".into(),
            width,
            height,
            quality,
            bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Target dimensions for a source of `width × height` capped at `max_width`.
///
/// Never upscales. Height follows the same scale factor, rounded down and
/// kept at least one pixel. Returns `None` while the source has no dimensions.
pub fn scaled_dimensions(width: u32, height: u32, max_width: u32) -> Option<(u32, u32)> {
    if width == 0 || height == 0 || max_width == 0 {
        return None;
    }
    if width <= max_width {
        return Some((width, height));
    }
    let scale = f64::from(max_width) / f64::from(width);
    let scaled_height = (f64::from(height) * scale).floor().max(1.0) as u32;
    Some((max_width, scaled_height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downscales_wide_frames_preserving_aspect() {
        assert_eq!(scaled_dimensions(2560, 1440, MAX_FRAME_WIDTH), Some((1280, 720)));
        assert_eq!(scaled_dimensions(3840, 2160, MAX_FRAME_WIDTH), Some((1280, 720)));
    }

    #[test]
    fn never_upscales() {
        assert_eq!(scaled_dimensions(800, 600, MAX_FRAME_WIDTH), Some((800, 600)));
    }

    #[test]
    fn no_dimensions_yet() {
        assert_eq!(scaled_dimensions(0, 0, MAX_FRAME_WIDTH), None);
    }
}
