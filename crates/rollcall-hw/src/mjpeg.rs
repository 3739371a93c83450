//! MJPEG-over-HTTP stream reader.
//!
//! IP cameras commonly serve `multipart/x-mixed-replace` streams where each
//! part is a complete JPEG image. Rather than trusting part headers, frames
//! are delimited by the JPEG start-of-image (`FF D8`) and end-of-image
//! (`FF D9`) markers.

use crate::camera::{CameraError, FrameSource};
use crate::frame::Frame;
use std::io::Read;
use std::time::Duration;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];
const READ_CHUNK: usize = 16 * 1024;
/// Buffered bytes without a complete image before the buffer is discarded.
const MAX_BUFFERED: usize = 8 * 1024 * 1024;

/// Incremental JPEG boundary scanner.
#[derive(Default)]
pub struct JpegScanner {
    buf: Vec<u8>,
}

impl JpegScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > MAX_BUFFERED {
            tracing::warn!(buffered = self.buf.len(), "no complete JPEG in stream buffer; discarding");
            self.buf.clear();
        }
    }

    /// Pop the next complete JPEG image, dropping any bytes before it.
    pub fn next_image(&mut self) -> Option<Vec<u8>> {
        let start = find(&self.buf, &SOI, 0)?;
        let end = find(&self.buf, &EOI, start + SOI.len())? + EOI.len();
        let image = self.buf[start..end].to_vec();
        self.buf.drain(..end);
        Some(image)
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

fn find(haystack: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(2)
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// A live MJPEG stream.
pub struct MjpegSource {
    address: String,
    reader: Box<dyn Read + Send + Sync>,
    scanner: JpegScanner,
    sequence: u64,
}

impl MjpegSource {
    /// Connect to an MJPEG endpoint.
    pub fn connect(address: &str, connect_timeout: Duration, read_timeout: Duration) -> Result<Self, CameraError> {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(connect_timeout)
            .timeout_read(read_timeout)
            .build();

        let response = agent
            .get(address)
            .call()
            .map_err(|e| CameraError::ConnectFailed(format!("{address}: {e}")))?;

        tracing::info!(
            address,
            content_type = response.content_type(),
            "camera stream opened"
        );

        Ok(Self::from_reader(address, response.into_reader()))
    }

    /// Wrap an arbitrary byte stream (used by tests and file playback).
    pub fn from_reader(address: &str, reader: Box<dyn Read + Send + Sync>) -> Self {
        Self {
            address: address.to_string(),
            reader,
            scanner: JpegScanner::new(),
            sequence: 0,
        }
    }

    /// Read until one complete JPEG is available. `None` on end of stream.
    fn next_jpeg(&mut self) -> Result<Option<Vec<u8>>, CameraError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(image) = self.scanner.next_image() {
                self.sequence += 1;
                return Ok(Some(image));
            }
            let n = self
                .reader
                .read(&mut chunk)
                .map_err(|e| CameraError::ReadFailed(format!("{}: {e}", self.address)))?;
            if n == 0 {
                return Ok(None);
            }
            self.scanner.push(&chunk[..n]);
        }
    }
}

impl FrameSource for MjpegSource {
    fn grab(&mut self) -> Result<bool, CameraError> {
        Ok(self.next_jpeg()?.is_some())
    }

    fn read(&mut self) -> Result<Option<Frame>, CameraError> {
        match self.next_jpeg()? {
            Some(jpeg) => Ok(Some(Frame::from_jpeg(&jpeg, self.sequence)?)),
            None => Ok(None),
        }
    }

    fn address(&self) -> &str {
        &self.address
    }
}
