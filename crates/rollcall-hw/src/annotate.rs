//! Annotated frame rendering for viewers.
//!
//! Boxes are burned into the image (green for recognized, red for unknown);
//! labels travel alongside as structured data so viewers render text at
//! their own resolution.

use crate::frame::{Frame, FrameError};
use base64::Engine;
use image::{Rgb, RgbImage};
use rollcall_core::BoundingBox;
use serde::Serialize;

const RECOGNIZED: Rgb<u8> = Rgb([0, 255, 0]);
const UNKNOWN: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: u32 = 2;

/// One face overlay on a published frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceAnnotation {
    pub bbox: BoundingBox,
    /// Display name, or "Unknown".
    pub label: String,
    pub confidence: f32,
    pub recognized: bool,
}

impl FaceAnnotation {
    pub fn recognized(bbox: BoundingBox, name: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            label: name.into(),
            confidence,
            recognized: true,
        }
    }

    pub fn unknown(bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            bbox,
            label: "Unknown".to_string(),
            confidence,
            recognized: false,
        }
    }

    /// Caption as shown on screen, e.g. "Asha 82%".
    pub fn caption(&self) -> String {
        format!("{} {:.0}%", self.label, self.confidence * 100.0)
    }
}

/// Draw a rectangle outline, clipped to the image.
pub fn draw_box(img: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>, thickness: u32) {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let clamp_x = |v: f32| (v.max(0.0) as u32).min(w - 1);
    let clamp_y = |v: f32| (v.max(0.0) as u32).min(h - 1);
    let (x0, x1) = (clamp_x(bbox.x), clamp_x(bbox.x + bbox.width));
    let (y0, y1) = (clamp_y(bbox.y), clamp_y(bbox.y + bbox.height));

    for t in 0..thickness {
        for x in x0..=x1 {
            img.put_pixel(x, (y0 + t).min(y1), color);
            img.put_pixel(x, y1.saturating_sub(t).max(y0), color);
        }
        for y in y0..=y1 {
            img.put_pixel((x0 + t).min(x1), y, color);
            img.put_pixel(x1.saturating_sub(t).max(x0), y, color);
        }
    }
}

/// Render the frame with face boxes and encode it as a base64 JPEG.
pub fn render_jpeg_base64(frame: &Frame, faces: &[FaceAnnotation], quality: u8) -> Result<String, FrameError> {
    let mut img = frame.to_image()?;
    for face in faces {
        let color = if face.recognized { RECOGNIZED } else { UNKNOWN };
        draw_box(&mut img, &face.bbox, color, BOX_THICKNESS);
    }

    let mut jpeg = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, quality).encode_image(&img)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(jpeg))
}
