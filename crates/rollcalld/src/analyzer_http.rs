//! HTTP client for an out-of-process face analysis service.

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use rollcall_core::analyzer::parse_response;
use rollcall_core::{AnalyzerError, DetectedFace, FaceAnalyzer};
use std::time::Duration;

const UPLOAD_QUALITY: u8 = 90;

/// Posts each frame as a JPEG and decodes the returned detections.
pub struct HttpFaceAnalyzer {
    agent: ureq::Agent,
    url: String,
}

impl HttpFaceAnalyzer {
    pub fn new(url: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            url: url.to_string(),
        }
    }
}

pub(crate) fn encode_jpeg(rgb: &[u8], width: u32, height: u32, quality: u8) -> Result<Vec<u8>, AnalyzerError> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality)
        .encode(rgb, width, height, ExtendedColorType::Rgb8)
        .map_err(|e| AnalyzerError::Failed(format!("jpeg encode: {e}")))?;
    Ok(jpeg)
}

impl FaceAnalyzer for HttpFaceAnalyzer {
    fn analyze(&mut self, rgb: &[u8], width: u32, height: u32) -> Result<Vec<DetectedFace>, AnalyzerError> {
        let jpeg = encode_jpeg(rgb, width, height, UPLOAD_QUALITY)?;
        let response = self
            .agent
            .post(&self.url)
            .set("Content-Type", "image/jpeg")
            .send_bytes(&jpeg)
            .map_err(|e| match e {
                ureq::Error::Status(code, _) => AnalyzerError::Failed(format!("{}: HTTP {code}", self.url)),
                ureq::Error::Transport(t) => AnalyzerError::Unavailable(format!("{}: {t}", self.url)),
            })?;
        let body = response
            .into_string()
            .map_err(|e| AnalyzerError::Failed(format!("read body: {e}")))?;
        let faces = parse_response(&body)?;
        tracing::trace!(faces = faces.len(), "analyzer responded");
        Ok(faces)
    }
}
