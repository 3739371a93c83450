//! Flat cosine-similarity index over enrolled pose embeddings.
//!
//! Every pose of every enrolled identity becomes one row holding an
//! L2-normalized vector, so the inner product of a normalized query with a
//! row is its cosine similarity. The index is never mutated in place: a
//! rebuild produces a fresh [`IndexSnapshot`] which is then published with a
//! single pointer swap. Readers clone the current `Arc` and search it without
//! holding any lock, so a query observes either the old snapshot or the new
//! one, never a mix.

use crate::types::{Embedding, EnrolledIdentity, Pose};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Neighbours fetched per query. Must stay above the maximum number of poses
/// per identity so that several candidates fit in one result set.
pub const DEFAULT_NEIGHBORS: usize = 20;

#[derive(Error, Debug, PartialEq)]
pub enum IndexError {
    #[error("embedding dimension mismatch for {identity}/{pose}: expected {expected}, got {actual}")]
    DimensionMismatch {
        identity: String,
        pose: Pose,
        expected: usize,
        actual: usize,
    },
    #[error("zero-length embedding for {identity}/{pose}")]
    EmptyEmbedding { identity: String, pose: Pose },
}

/// One row of a search result.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub identity_id: String,
    pub pose: Pose,
    pub similarity: f32,
}

#[derive(Debug)]
struct IndexEntry {
    identity: usize,
    pose: Pose,
    vector: Embedding,
}

/// An immutable, internally consistent index built from one enrollment
/// snapshot.
#[derive(Debug)]
pub struct IndexSnapshot {
    dim: usize,
    identity_ids: Vec<String>,
    names: HashMap<String, String>,
    entries: Vec<IndexEntry>,
    generation: u64,
}

impl IndexSnapshot {
    /// The explicit empty state: every query returns no candidates.
    pub fn empty() -> Self {
        Self {
            dim: 0,
            identity_ids: Vec::new(),
            names: HashMap::new(),
            entries: Vec::new(),
            generation: 0,
        }
    }

    /// Materialize the index from a full set of enrolled identities.
    ///
    /// Identities without poses are skipped. A pose whose vector has zero norm
    /// cannot be compared and is skipped with a warning. Any dimension
    /// mismatch fails the whole build.
    pub fn build(identities: &[EnrolledIdentity]) -> Result<Self, IndexError> {
        let mut snapshot = Self::empty();

        for identity in identities {
            if !identity.is_recognizable() {
                tracing::debug!(identity = %identity.id, "no enrolled poses; not indexed");
                continue;
            }

            let slot = snapshot.identity_ids.len();
            let mut indexed = 0usize;

            for pose in &identity.poses {
                let actual = pose.embedding.dim();
                if actual == 0 {
                    return Err(IndexError::EmptyEmbedding {
                        identity: identity.id.clone(),
                        pose: pose.pose,
                    });
                }
                if snapshot.dim == 0 {
                    snapshot.dim = actual;
                } else if actual != snapshot.dim {
                    return Err(IndexError::DimensionMismatch {
                        identity: identity.id.clone(),
                        pose: pose.pose,
                        expected: snapshot.dim,
                        actual,
                    });
                }

                let Some(vector) = pose.embedding.normalized() else {
                    tracing::warn!(identity = %identity.id, pose = %pose.pose, "zero-norm embedding skipped");
                    continue;
                };

                snapshot.entries.push(IndexEntry {
                    identity: slot,
                    pose: pose.pose,
                    vector,
                });
                indexed += 1;
            }

            if indexed > 0 {
                snapshot.identity_ids.push(identity.id.clone());
                snapshot.names.insert(identity.id.clone(), identity.name.clone());
            }
        }

        Ok(snapshot)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of indexed pose rows.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Number of identities with at least one indexed pose.
    pub fn identity_count(&self) -> usize {
        self.identity_ids.len()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Build counter; 0 for the initial empty state.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Display name for an indexed identity.
    pub fn name_of(&self, identity_id: &str) -> Option<&str> {
        self.names.get(identity_id).map(String::as_str)
    }

    /// Return up to `k` rows most similar to `query`, best first.
    ///
    /// An empty index, a zero query, or a query of the wrong dimension
    /// yields no candidates.
    pub fn search(&self, query: &Embedding, k: usize) -> Vec<Neighbor> {
        if self.is_empty() || k == 0 {
            return Vec::new();
        }
        if query.dim() != self.dim {
            tracing::warn!(expected = self.dim, actual = query.dim(), "query dimension mismatch");
            return Vec::new();
        }
        let Some(query) = query.normalized() else {
            return Vec::new();
        };

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, query.dot(&entry.vector)))
            .collect();

        let k = k.min(scored.len());
        let by_score_desc = |a: &(usize, f32), b: &(usize, f32)| b.1.total_cmp(&a.1);
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_score_desc);
            scored.truncate(k);
        }
        scored.sort_by(by_score_desc);

        scored
            .into_iter()
            .map(|(i, similarity)| {
                let entry = &self.entries[i];
                Neighbor {
                    identity_id: self.identity_ids[entry.identity].clone(),
                    pose: entry.pose,
                    similarity,
                }
            })
            .collect()
    }
}

/// Shared handle to the current index snapshot.
///
/// Single writer, many readers. The write lock is only held for the
/// duration of the pointer swap; building happens outside it.
pub struct RecognitionIndex {
    current: RwLock<Arc<IndexSnapshot>>,
    built_at: RwLock<Option<Instant>>,
    generation: AtomicU64,
    rebuilding: AtomicBool,
    max_age: Duration,
}

impl RecognitionIndex {
    /// Create an index in the empty state. It is stale until first built.
    pub fn new(max_age: Duration) -> Self {
        Self {
            current: RwLock::new(Arc::new(IndexSnapshot::empty())),
            built_at: RwLock::new(None),
            generation: AtomicU64::new(0),
            rebuilding: AtomicBool::new(false),
            max_age,
        }
    }

    /// The snapshot currently in use.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Build a new snapshot from `identities` and publish it.
    ///
    /// On error the previous snapshot stays in use.
    pub fn rebuild(&self, identities: &[EnrolledIdentity]) -> Result<Arc<IndexSnapshot>, IndexError> {
        let mut snapshot = IndexSnapshot::build(identities)?;
        snapshot.generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Arc::new(snapshot);

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&snapshot);
        *self.built_at.write().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());

        if snapshot.is_empty() {
            tracing::warn!(generation = snapshot.generation, "recognition index rebuilt empty");
        } else {
            tracing::info!(
                generation = snapshot.generation,
                identities = snapshot.identity_count(),
                embeddings = snapshot.len(),
                "recognition index rebuilt"
            );
        }
        Ok(snapshot)
    }

    /// True once `max_age` has elapsed since the last successful build, or
    /// if the index was never built.
    pub fn is_stale(&self) -> bool {
        match *self.built_at.read().unwrap_or_else(PoisonError::into_inner) {
            Some(at) => at.elapsed() > self.max_age,
            None => true,
        }
    }

    /// Claim the right to rebuild a stale index.
    ///
    /// Returns `None` when the index is fresh or another caller already holds
    /// the claim. The claim is released on drop.
    pub fn claim_rebuild(&self) -> Option<RebuildClaim<'_>> {
        if !self.is_stale() {
            return None;
        }
        self.rebuilding
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RebuildClaim { index: self })
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn search(&self, query: &Embedding, k: usize) -> Vec<Neighbor> {
        self.snapshot().search(query, k)
    }
}

/// Exclusive right to rebuild, see [`RecognitionIndex::claim_rebuild`].
pub struct RebuildClaim<'a> {
    index: &'a RecognitionIndex,
}

impl RebuildClaim<'_> {
    pub fn rebuild(&self, identities: &[EnrolledIdentity]) -> Result<Arc<IndexSnapshot>, IndexError> {
        self.index.rebuild(identities)
    }
}

impl Drop for RebuildClaim<'_> {
    fn drop(&mut self) {
        self.index.rebuilding.store(false, Ordering::Release);
    }
}
