//! Face analysis seam: detection plus embedding extraction.
//!
//! Model inference is an external capability. Implementations of
//! [`FaceAnalyzer`] wrap whatever produces detections and embeddings; the
//! rest of the system only sees [`DetectedFace`] values.

use crate::types::{BoundingBox, Embedding};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("analyzer unavailable: {0}")]
    Unavailable(String),
    #[error("analysis failed: {0}")]
    Failed(String),
    #[error("malformed analyzer response: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A face found in a frame, with its embedding.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    /// Detector confidence in [0, 1].
    pub det_score: f32,
    pub embedding: Embedding,
}

/// Detects faces in an RGB frame and extracts one embedding per face.
pub trait FaceAnalyzer: Send {
    /// `rgb` holds `width * height * 3` bytes, row-major.
    fn analyze(&mut self, rgb: &[u8], width: u32, height: u32) -> Result<Vec<DetectedFace>, AnalyzerError>;
}

#[derive(Deserialize)]
struct WireFace {
    bbox: [f32; 4],
    det_score: f32,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    faces: Vec<WireFace>,
}

/// Decode the analyzer JSON body:
/// `{"faces":[{"bbox":[x1,y1,x2,y2],"det_score":0.9,"embedding":[...]}]}`.
///
/// Faces are returned best detection first.
pub fn parse_response(body: &str) -> Result<Vec<DetectedFace>, AnalyzerError> {
    let wire: WireResponse = serde_json::from_str(body)?;
    let mut faces: Vec<DetectedFace> = wire
        .faces
        .into_iter()
        .map(|f| DetectedFace {
            bbox: BoundingBox::from_corners(f.bbox),
            det_score: f.det_score,
            embedding: Embedding::new(f.embedding),
        })
        .collect();
    faces.sort_by(|a, b| b.det_score.total_cmp(&a.det_score));
    Ok(faces)
}
