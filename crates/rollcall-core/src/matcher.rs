//! Multi-angle identity decision over nearest-neighbour results.
//!
//! Neighbours are grouped per identity. An identity whose two best poses
//! agree (gap within `corroboration_gap`) scores the average of the two; a
//! lone strong pose among several is penalized; a single matched pose scores
//! its raw similarity. The best-scoring identity wins if it clears the
//! recognition threshold.

use crate::index::{IndexSnapshot, Neighbor, DEFAULT_NEIGHBORS};
use crate::types::Embedding;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Minimum confidence for a positive match.
    pub threshold: f32,
    /// Maximum gap between the two best poses for them to corroborate.
    pub corroboration_gap: f32,
    /// Multiplier applied to the best pose when the second does not agree.
    pub single_pose_penalty: f32,
    /// Neighbours fetched per query.
    pub neighbors: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            threshold: 0.40,
            corroboration_gap: 0.08,
            single_pose_penalty: 0.6,
            neighbors: DEFAULT_NEIGHBORS,
        }
    }
}

/// Outcome of matching one probe embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchDecision {
    /// Matched identity, `None` below threshold or with no candidates.
    pub identity_id: Option<String>,
    /// Display name of the matched identity.
    pub name: Option<String>,
    /// Best confidence observed, reported even when there is no match.
    pub confidence: f32,
}

impl MatchDecision {
    pub fn no_match(confidence: f32) -> Self {
        Self {
            identity_id: None,
            name: None,
            confidence,
        }
    }

    pub fn is_match(&self) -> bool {
        self.identity_id.is_some()
    }
}

/// Strategy for turning a probe embedding into an identity decision.
pub trait Matcher {
    fn identify(&self, snapshot: &IndexSnapshot, probe: &Embedding) -> MatchDecision;
}

/// Two-best-pose agreement matcher.
#[derive(Debug, Clone, Default)]
pub struct MultiAngleMatcher {
    config: MatcherConfig,
}

impl MultiAngleMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Confidence for one identity from its matched similarities, sorted
    /// best first.
    pub fn pose_confidence(&self, sorted_desc: &[f32]) -> f32 {
        match sorted_desc {
            [] => 0.0,
            [only] => *only,
            [top, second, ..] => {
                if top - second <= self.config.corroboration_gap {
                    (top + second) / 2.0
                } else {
                    top * self.config.single_pose_penalty
                }
            }
        }
    }

    /// Decide from a ranked neighbour list.
    ///
    /// Returns the best identity and its confidence, or `None` with the best
    /// confidence observed when it falls below the threshold.
    pub fn decide(&self, neighbors: &[Neighbor]) -> (Option<String>, f32) {
        // Grouped in order of first appearance so that ties go to the
        // identity ranked higher by the index.
        let mut groups: Vec<(&str, Vec<f32>)> = Vec::new();
        for n in neighbors {
            match groups.iter_mut().find(|(id, _)| *id == n.identity_id) {
                Some((_, sims)) => sims.push(n.similarity),
                None => groups.push((n.identity_id.as_str(), vec![n.similarity])),
            }
        }

        let mut best: Option<&str> = None;
        let mut best_confidence = 0.0f32;

        for (identity, mut sims) in groups {
            sims.sort_by(|a, b| b.total_cmp(a));
            let confidence = self.pose_confidence(&sims);
            tracing::trace!(identity, poses = sims.len(), confidence, "candidate scored");
            if confidence > best_confidence {
                best_confidence = confidence;
                best = Some(identity);
            }
        }

        match best {
            Some(identity) if best_confidence >= self.config.threshold => {
                (Some(identity.to_string()), best_confidence)
            }
            _ => {
                tracing::debug!(
                    confidence = best_confidence,
                    threshold = self.config.threshold,
                    "no match"
                );
                (None, best_confidence)
            }
        }
    }
}

impl Matcher for MultiAngleMatcher {
    fn identify(&self, snapshot: &IndexSnapshot, probe: &Embedding) -> MatchDecision {
        let neighbors = snapshot.search(probe, self.config.neighbors);
        if neighbors.is_empty() {
            return MatchDecision::no_match(0.0);
        }
        match self.decide(&neighbors) {
            (Some(identity_id), confidence) => MatchDecision {
                name: snapshot.name_of(&identity_id).map(str::to_string),
                identity_id: Some(identity_id),
                confidence,
            },
            (None, confidence) => MatchDecision::no_match(confidence),
        }
    }
}
