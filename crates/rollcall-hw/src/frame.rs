//! Frame type and image processing: JPEG decode, resize, contrast boost.

use image::imageops::FilterType;
use image::{ImageFormat, RgbImage};

/// A captured RGB camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u64,
}

impl Frame {
    /// Wrap raw RGB bytes, checking the buffer length.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self, FrameError> {
        let expected = (width as usize) * (height as usize) * 3;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    /// Decode a JPEG image into an RGB frame.
    pub fn from_jpeg(bytes: &[u8], sequence: u64) -> Result<Self, FrameError> {
        let rgb = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)?.to_rgb8();
        let (width, height) = rgb.dimensions();
        Self::from_rgb(rgb.into_raw(), width, height, sequence)
    }

    /// Average pixel brightness (0.0–255.0) across all channels.
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }

    /// Copy into an `image` buffer.
    pub fn to_image(&self) -> Result<RgbImage, FrameError> {
        RgbImage::from_raw(self.width, self.height, self.data.clone()).ok_or(FrameError::InvalidLength {
            expected: (self.width as usize) * (self.height as usize) * 3,
            actual: self.data.len(),
        })
    }

    /// Return a copy scaled to exactly `width` x `height`.
    pub fn resized(&self, width: u32, height: u32) -> Result<Frame, FrameError> {
        if self.width == width && self.height == height {
            return Ok(self.clone());
        }
        let scaled = image::imageops::resize(&self.to_image()?, width, height, FilterType::Triangle);
        Ok(Frame {
            data: scaled.into_raw(),
            width,
            height,
            timestamp: self.timestamp,
            sequence: self.sequence,
        })
    }
}

/// Linear contrast/brightness adjustment in place: `clamp(alpha * p + beta)`.
pub fn scale_contrast(pixels: &mut [u8], alpha: f32, beta: f32) {
    for p in pixels.iter_mut() {
        *p = (alpha * *p as f32 + beta).round().clamp(0.0, 255.0) as u8;
    }
}

/// Resize a frame to the processing resolution and apply a mild contrast
/// boost, so analysis throughput does not depend on the camera resolution.
pub fn normalize_for_analysis(frame: &Frame, width: u32, height: u32) -> Result<Frame, FrameError> {
    let mut out = frame.resized(width, height)?;
    scale_contrast(&mut out.data, 1.1, 5.0);
    Ok(out)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid RGB length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
}
