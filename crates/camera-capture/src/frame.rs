//! Frame types and processing

use crate::CameraError;
use image::codecs::jpeg::JpegEncoder;
use image::{GrayImage, ImageFormat, Luma, RgbImage};

/// JPEG end-of-image marker
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// Decoded RGB frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// RGB pixels
    image: RgbImage,
    /// Acquisition sequence number
    pub sequence: u32,
    /// Capture timestamp (ms since UNIX epoch)
    pub timestamp_ms: u64,
}

impl Frame {
    /// Create a frame from already-decoded pixels
    pub fn new(image: RgbImage, sequence: u32, timestamp_ms: u64) -> Self {
        Self {
            image,
            sequence,
            timestamp_ms,
        }
    }

    /// Decode a complete JPEG payload
    ///
    /// The decoder fills missing scan data with grey, so a payload that
    /// does not end in an end-of-image marker is rejected up front.
    pub fn decode_jpeg(data: &[u8], sequence: u32, timestamp_ms: u64) -> Result<Self, CameraError> {
        // Some sensors pad the buffer with zeros after the marker
        let end = data.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        if !data[..end].ends_with(&JPEG_EOI) {
            return Err(CameraError::Decode(format!(
                "truncated JPEG: no end-of-image marker in {} bytes",
                data.len()
            )));
        }

        let img = image::load_from_memory_with_format(data, ImageFormat::Jpeg)
            .map_err(|e| CameraError::Decode(e.to_string()))?;

        Ok(Self::new(img.to_rgb8(), sequence, timestamp_ms))
    }

    /// Re-encode as JPEG (used for previews)
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, CameraError> {
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality)
            .encode_image(&self.image)
            .map_err(|e| CameraError::Decode(e.to_string()))?;
        Ok(out)
    }

    /// Frame width
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Frame height
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// RGB pixel buffer
    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Get pixel at (x, y)
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        self.image.get_pixel_checked(x, y).map(|p| p.0)
    }

    /// Convert to grayscale
    pub fn to_grayscale(&self) -> GrayImage {
        GrayImage::from_fn(self.width(), self.height(), |x, y| {
            let pixel = self.image.get_pixel(x, y);
            // Luminance formula: 0.299*R + 0.587*G + 0.114*B
            let y = pixel[0] as f32 * 0.299 + pixel[1] as f32 * 0.587 + pixel[2] as f32 * 0.114;
            Luma([y as u8])
        })
    }
}
