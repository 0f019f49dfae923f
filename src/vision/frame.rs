//! Frame decoding, validation and region geometry.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::{RecognitionError, Result};

/// Frames smaller than this on either side are rejected.
pub const MIN_FRAME_SIDE: u32 = 10;

/// Axis-aligned pixel region, `x2`/`y2` exclusive. Serialized as `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "[u32; 4]", from = "[u32; 4]")]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// True when `other` lies entirely inside this box.
    pub fn contains(&self, other: &BoundingBox) -> bool {
        self.x1 <= other.x1 && self.y1 <= other.y1 && self.x2 >= other.x2 && self.y2 >= other.y2
    }
}

impl From<BoundingBox> for [u32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

impl From<[u32; 4]> for BoundingBox {
    fn from(v: [u32; 4]) -> Self {
        BoundingBox { x1: v[0], y1: v[1], x2: v[2], y2: v[3] }
    }
}

/// One hand landmark in normalized image coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Decode a base64 payload, with or without a `data:image/...;base64,` header.
pub fn decode_base64_frame(payload: &str) -> Result<RgbImage> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(RecognitionError::InvalidFrame("no image data provided".to_string()));
    }

    let encoded = match payload.split_once(',') {
        Some((_, data)) => data,
        None => payload,
    };

    let bytes = BASE64.decode(encoded).map_err(|e| RecognitionError::Decode(format!("invalid base64: {}", e)))?;
    decode_frame(&bytes)
}

/// Decode encoded image bytes (PNG, JPEG, WebP) into an RGB frame.
pub fn decode_frame(bytes: &[u8]) -> Result<RgbImage> {
    if bytes.is_empty() {
        return Err(RecognitionError::InvalidFrame("empty payload".to_string()));
    }

    let image = image::load_from_memory(bytes).map_err(|e| RecognitionError::Decode(e.to_string()))?;
    let frame = image.to_rgb8();
    validate_frame(&frame)?;
    Ok(frame)
}

/// Reject frames too small to carry a gesture.
pub fn validate_frame(frame: &RgbImage) -> Result<()> {
    let (w, h) = frame.dimensions();
    if w < MIN_FRAME_SIDE || h < MIN_FRAME_SIDE {
        return Err(RecognitionError::InvalidFrame(format!("image too small: {}x{}", w, h)));
    }
    Ok(())
}

/// Copy out a region of the frame. Returns `None` for regions that fall outside
/// the frame or are empty.
pub fn crop(frame: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let (w, h) = frame.dimensions();
    if bbox.x2 > w || bbox.y2 > h || bbox.width() == 0 || bbox.height() == 0 {
        return None;
    }
    Some(image::imageops::crop_imm(frame, bbox.x1, bbox.y1, bbox.width(), bbox.height()).to_image())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(w, h, Rgb([10, 20, 30]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png).unwrap();
        bytes
    }

    #[test]
    fn test_decode_data_url() {
        let payload = format!("data:image/png;base64,{}", BASE64.encode(png_bytes(32, 24)));
        let frame = decode_base64_frame(&payload).unwrap();
        assert_eq!(frame.dimensions(), (32, 24));
        assert_eq!(frame.get_pixel(0, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_decode_rejects_empty_and_garbage() {
        assert!(matches!(decode_base64_frame("  "), Err(RecognitionError::InvalidFrame(_))));
        assert!(matches!(decode_base64_frame("data:image/png;base64,@@@"), Err(RecognitionError::Decode(_))));
        assert!(matches!(decode_frame(b"not an image"), Err(RecognitionError::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_tiny_frame() {
        let payload = BASE64.encode(png_bytes(8, 40));
        assert!(matches!(decode_base64_frame(&payload), Err(RecognitionError::InvalidFrame(_))));
    }

    #[test]
    fn test_bbox_serializes_as_array() {
        let bbox = BoundingBox { x1: 1, y1: 2, x2: 3, y2: 4 };
        assert_eq!(serde_json::to_string(&bbox).unwrap(), "[1,2,3,4]");
    }

    #[test]
    fn test_crop_bounds() {
        let frame = RgbImage::new(50, 40);
        let inside = BoundingBox { x1: 10, y1: 5, x2: 30, y2: 25 };
        assert_eq!(crop(&frame, &inside).unwrap().dimensions(), (20, 20));
        let outside = BoundingBox { x1: 10, y1: 5, x2: 60, y2: 25 };
        assert!(crop(&frame, &outside).is_none());
    }
}
