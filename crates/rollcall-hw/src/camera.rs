//! Camera source abstraction over network video streams.

use crate::frame::{Frame, FrameError};
use crate::mjpeg::MjpegSource;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("unsupported camera address: {0}")]
    UnsupportedAddress(String),
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("read failed: {0}")]
    ReadFailed(String),
    #[error("frame decode failed: {0}")]
    Frame(#[from] FrameError),
}

/// An open, streaming camera.
///
/// All calls block on network I/O; callers run them off the async runtime.
pub trait FrameSource: Send {
    /// Advance past one frame without decoding it. `false` when no frame
    /// was available.
    fn grab(&mut self) -> Result<bool, CameraError>;

    /// Read and decode the next frame. `Ok(None)` when no frame was returned.
    fn read(&mut self) -> Result<Option<Frame>, CameraError>;

    /// Address this source was opened from.
    fn address(&self) -> &str;
}

/// Opens camera sources by address.
pub trait SourceOpener: Send + Sync {
    fn open(&self, address: &str) -> Result<Box<dyn FrameSource>, CameraError>;
}

/// Opens `http://` and `https://` MJPEG streams.
#[derive(Debug, Clone)]
pub struct NetworkOpener {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for NetworkOpener {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
        }
    }
}

impl SourceOpener for NetworkOpener {
    fn open(&self, address: &str) -> Result<Box<dyn FrameSource>, CameraError> {
        let scheme = address.split_once("://").map(|(s, _)| s.to_ascii_lowercase());
        match scheme.as_deref() {
            Some("http") | Some("https") => {
                let source = MjpegSource::connect(address, self.connect_timeout, self.read_timeout)?;
                Ok(Box::new(source))
            }
            _ => Err(CameraError::UnsupportedAddress(address.to_string())),
        }
    }
}

/// Result of a one-shot connectivity check.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub address: String,
    pub width: u32,
    pub height: u32,
    pub elapsed: Duration,
}

/// Open `address`, read one frame, and report its resolution.
pub fn probe(opener: &dyn SourceOpener, address: &str) -> Result<ProbeReport, CameraError> {
    let started = Instant::now();
    let mut source = opener.open(address)?;
    let frame = source
        .read()?
        .ok_or_else(|| CameraError::ReadFailed(format!("{address}: stream returned no frame")))?;

    tracing::info!(address, width = frame.width, height = frame.height, "camera probe succeeded");

    Ok(ProbeReport {
        address: address.to_string(),
        width: frame.width,
        height: frame.height,
        elapsed: started.elapsed(),
    })
}
