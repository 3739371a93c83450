//! rollcall-hw: Camera capture and frame processing.
//!
//! Pulls frames from network cameras (MJPEG over HTTP), normalizes them for
//! analysis, and renders annotated JPEG frames for viewers.

pub mod annotate;
pub mod camera;
pub mod frame;
pub mod mjpeg;

pub use annotate::FaceAnnotation;
pub use camera::{CameraError, FrameSource, NetworkOpener, ProbeReport, SourceOpener};
pub use frame::{Frame, FrameError};
