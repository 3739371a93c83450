use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bounding box for a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// Build a box from corner coordinates `[x1, y1, x2, y2]`.
    ///
    /// Corners given in the wrong order are swapped rather than producing a
    /// negative extent.
    pub fn from_corners(corners: [f32; 4]) -> Self {
        let [x1, y1, x2, y2] = corners;
        let (left, right) = if x1 <= x2 { (x1, x2) } else { (x2, x1) };
        let (top, bottom) = if y1 <= y2 { (y1, y2) } else { (y2, y1) };
        Self {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Face embedding vector (typically 512-dimensional).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Return an L2-normalized copy, or `None` for a zero (or non-finite) vector.
    pub fn normalized(&self) -> Option<Embedding> {
        let norm = self.norm();
        if !norm.is_finite() || norm <= f32::EPSILON {
            return None;
        }
        Some(Embedding {
            values: self.values.iter().map(|v| v / norm).collect(),
        })
    }

    /// Inner product. Equals cosine similarity when both sides are normalized.
    pub fn dot(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum()
    }

    /// Cosine similarity in [-1, 1]; 0.0 if either vector is zero.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let denom = self.norm() * other.norm();
        if denom > 0.0 {
            self.dot(other) / denom
        } else {
            0.0
        }
    }

    /// Encode as little-endian `f32` bytes for blob storage.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Decode from little-endian `f32` bytes. Returns `None` if the length
    /// is not a multiple of four.
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Embedding> {
        if bytes.len() % 4 != 0 {
            return None;
        }
        let values = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Some(Embedding { values })
    }
}

/// Named head orientation captured during enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pose {
    Front,
    LookingUp,
    Left,
    Right,
    UpLeft,
    UpRight,
    TiltLeft,
    TiltRight,
}

impl Pose {
    pub const ALL: [Pose; 8] = [
        Pose::Front,
        Pose::LookingUp,
        Pose::Left,
        Pose::Right,
        Pose::UpLeft,
        Pose::UpRight,
        Pose::TiltLeft,
        Pose::TiltRight,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Pose::Front => "front",
            Pose::LookingUp => "looking_up",
            Pose::Left => "left",
            Pose::Right => "right",
            Pose::UpLeft => "up_left",
            Pose::UpRight => "up_right",
            Pose::TiltLeft => "tilt_left",
            Pose::TiltRight => "tilt_right",
        }
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pose {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pose::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("invalid pose: {s}"))
    }
}

/// One enrolled pose of an identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseEmbedding {
    pub pose: Pose,
    pub embedding: Embedding,
    /// Capture quality score recorded at enrollment time.
    pub quality: f32,
}

/// An enrolled person and their pose embeddings (0–8).
///
/// An identity with no poses is still a valid record (enrollment in
/// progress); it is simply absent from the recognition index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrolledIdentity {
    pub id: String,
    pub name: String,
    pub poses: Vec<PoseEmbedding>,
}

impl EnrolledIdentity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            poses: Vec::new(),
        }
    }

    /// Number of distinct poses with an embedding.
    pub fn pose_count(&self) -> usize {
        self.enrolled_poses().len()
    }

    /// Distinct enrolled poses, in canonical order.
    pub fn enrolled_poses(&self) -> Vec<Pose> {
        let mut poses: Vec<Pose> = self.poses.iter().map(|p| p.pose).collect();
        poses.sort();
        poses.dedup();
        poses
    }

    pub fn is_recognizable(&self) -> bool {
        !self.poses.is_empty()
    }

    /// Builder-style helper used by enrollment tooling and tests.
    pub fn with_pose(mut self, pose: Pose, values: Vec<f32>, quality: f32) -> Self {
        self.poses.retain(|p| p.pose != pose);
        self.poses.push(PoseEmbedding {
            pose,
            embedding: Embedding::new(values),
            quality,
        });
        self
    }
}
