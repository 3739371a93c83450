//! rollcall-core: Face recognition engine for attendance tracking.
//!
//! Holds enrolled identities as per-pose embeddings in a flat cosine
//! similarity index, and turns nearest-neighbour results into identity
//! decisions with a two-pose corroboration rule.

pub mod analyzer;
pub mod index;
pub mod matcher;
pub mod types;

pub use analyzer::{AnalyzerError, DetectedFace, FaceAnalyzer};
pub use index::{IndexError, IndexSnapshot, Neighbor, RecognitionIndex, DEFAULT_NEIGHBORS};
pub use matcher::{MatchDecision, Matcher, MatcherConfig, MultiAngleMatcher};
pub use types::{BoundingBox, Embedding, EnrolledIdentity, Pose, PoseEmbedding};
