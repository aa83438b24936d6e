//! Frames moving through a camera session

use crate::error::VisionError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, RgbImage};
use std::sync::Arc;

/// JPEG quality used for artifacts and dashboard frames
pub const JPEG_QUALITY: u8 = 80;

/// One acquired image.
///
/// Pixels sit behind an `Arc` so the capture worker and the detector can hold
/// the same frame without copying it.
#[derive(Debug, Clone)]
pub struct Frame {
    image: Arc<RgbImage>,
    captured_at: DateTime<Utc>,
    sequence: u64,
}

impl Frame {
    pub fn new(image: RgbImage, captured_at: DateTime<Utc>, sequence: u64) -> Self {
        Self {
            image: Arc::new(image),
            captured_at,
            sequence,
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn to_jpeg(&self) -> Result<Bytes, VisionError> {
        encode_jpeg(&self.image)
    }
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Bytes, VisionError> {
    let mut buf = Vec::with_capacity((image.width() * image.height() / 4) as usize);
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY).encode(
        image.as_raw(),
        image.width(),
        image.height(),
        ColorType::Rgb8,
    )?;
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_encode_jpeg_produces_jpeg_magic() {
        let img = RgbImage::from_pixel(32, 24, Rgb([10, 200, 30]));
        let jpeg = encode_jpeg(&img).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);

        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(decoded.width(), 32);
        assert_eq!(decoded.height(), 24);
    }

    #[test]
    fn test_frame_clone_shares_pixels() {
        let frame = Frame::new(RgbImage::new(4, 4), Utc::now(), 7);
        let copy = frame.clone();
        assert!(std::ptr::eq(frame.image(), copy.image()));
        assert_eq!(copy.sequence(), 7);
    }
}
