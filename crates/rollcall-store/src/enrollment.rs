//! Enrollment data: identities and their pose embeddings.
//!
//! The recognition core only ever reads a full snapshot through
//! [`Store::load_identities`]. The write helpers exist for enrollment tooling.

use crate::db::{Store, StoreError};
use rollcall_core::{Embedding, EnrolledIdentity, Pose, PoseEmbedding};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;

/// Listing row for operator tooling.
#[derive(Debug, Clone, Serialize)]
pub struct IdentitySummary {
    pub id: String,
    pub name: String,
    pub department: String,
    pub position: String,
    pub is_active: bool,
    pub poses: Vec<Pose>,
}

impl IdentitySummary {
    pub fn pose_count(&self) -> usize {
        self.poses.len()
    }
}

struct PoseRow {
    identity_id: String,
    pose: String,
    embedding: Vec<u8>,
    quality: f64,
}

impl Store {
    /// Create or rename an identity. Reactivates a deactivated identity.
    pub async fn upsert_identity(
        &self,
        id: &str,
        name: &str,
        department: &str,
        position: &str,
    ) -> Result<(), StoreError> {
        let (id, name, department, position) =
            (id.to_string(), name.to_string(), department.to_string(), position.to_string());
        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO identities (id, name, department, position) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(id) DO UPDATE SET
                        name = excluded.name,
                        department = excluded.department,
                        position = excluded.position,
                        is_active = 1,
                        updated_at = CURRENT_TIMESTAMP",
                    params![id, name, department, position],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Store (or replace) one pose embedding for an identity.
    pub async fn save_pose_embedding(
        &self,
        identity_id: &str,
        pose: Pose,
        embedding: &Embedding,
        quality: f32,
    ) -> Result<(), StoreError> {
        let id = identity_id.to_string();
        let blob = embedding.to_le_bytes();
        let saved = self
            .conn()
            .call(move |conn| {
                let exists: Option<i64> = conn
                    .query_row("SELECT 1 FROM identities WHERE id = ?1", params![id], |row| row.get(0))
                    .optional()?;
                if exists.is_none() {
                    return Ok(false);
                }
                conn.execute(
                    "INSERT INTO pose_embeddings (identity_id, pose, embedding, quality) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(identity_id, pose) DO UPDATE SET
                        embedding = excluded.embedding,
                        quality = excluded.quality,
                        updated_at = CURRENT_TIMESTAMP",
                    params![id, pose.as_str(), blob, quality as f64],
                )?;
                conn.execute(
                    "UPDATE identities SET updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
                    params![id],
                )?;
                Ok(true)
            })
            .await?;

        if !saved {
            return Err(StoreError::IdentityNotFound(identity_id.to_string()));
        }
        tracing::info!(identity = identity_id, pose = %pose, quality, "pose embedding saved");
        Ok(())
    }

    /// Mark an identity inactive. Returns `false` if it does not exist.
    pub async fn deactivate_identity(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        let changed = self
            .conn()
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE identities SET is_active = 0, updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
                    params![id],
                )?)
            })
            .await?;
        Ok(changed > 0)
    }

    /// Full snapshot of active identities with all their poses.
    ///
    /// Identities without poses are included; the index skips them.
    pub async fn load_identities(&self) -> Result<Vec<EnrolledIdentity>, StoreError> {
        let (identities, poses) = self
            .conn()
            .call(|conn| {
                let tx = conn.transaction()?;
                let identities = {
                    let mut stmt = tx.prepare("SELECT id, name FROM identities WHERE is_active = 1 ORDER BY id")?;
                    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
                    rows.collect::<Result<Vec<_>, _>>()?
                };
                let poses = {
                    let mut stmt = tx.prepare(
                        "SELECT p.identity_id, p.pose, p.embedding, p.quality
                         FROM pose_embeddings p JOIN identities i ON i.id = p.identity_id
                         WHERE i.is_active = 1",
                    )?;
                    let rows = stmt.query_map([], |row| {
                        Ok(PoseRow {
                            identity_id: row.get(0)?,
                            pose: row.get(1)?,
                            embedding: row.get(2)?,
                            quality: row.get(3)?,
                        })
                    })?;
                    rows.collect::<Result<Vec<_>, _>>()?
                };
                tx.commit()?;
                Ok((identities, poses))
            })
            .await?;

        let mut by_id: HashMap<String, Vec<PoseEmbedding>> = HashMap::new();
        for row in poses {
            let pose: Pose = row.pose.parse().map_err(StoreError::InvalidValue)?;
            let embedding = Embedding::from_le_bytes(&row.embedding).ok_or_else(|| StoreError::CorruptEmbedding {
                identity: row.identity_id.clone(),
                pose: row.pose.clone(),
                len: row.embedding.len(),
            })?;
            by_id.entry(row.identity_id).or_default().push(PoseEmbedding {
                pose,
                embedding,
                quality: row.quality as f32,
            });
        }

        let snapshot: Vec<EnrolledIdentity> = identities
            .into_iter()
            .map(|(id, name)| {
                let mut poses = by_id.remove(&id).unwrap_or_default();
                poses.sort_by_key(|p| p.pose);
                EnrolledIdentity { id, name, poses }
            })
            .collect();

        tracing::debug!(identities = snapshot.len(), "enrollment snapshot loaded");
        Ok(snapshot)
    }

    /// All identities (active or not) with their enrolled pose names.
    pub async fn identity_summaries(&self) -> Result<Vec<IdentitySummary>, StoreError> {
        let rows = self
            .conn()
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT i.id, i.name, i.department, i.position, i.is_active, p.pose
                     FROM identities i LEFT JOIN pose_embeddings p ON p.identity_id = i.id
                     ORDER BY i.id",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, bool>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;

        let mut out: Vec<IdentitySummary> = Vec::new();
        for (id, name, department, position, is_active, pose) in rows {
            if out.last().map(|s| s.id != id).unwrap_or(true) {
                out.push(IdentitySummary {
                    id,
                    name,
                    department,
                    position,
                    is_active,
                    poses: Vec::new(),
                });
            }
            if let (Some(summary), Some(pose)) = (out.last_mut(), pose) {
                summary.poses.push(pose.parse().map_err(StoreError::InvalidValue)?);
            }
        }
        for summary in &mut out {
            summary.poses.sort();
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> Store {
        let store = Store::open_in_memory().await.unwrap();
        store.upsert_identity("E001", "Asha", "Ops", "Lead").await.unwrap();
        store.upsert_identity("E002", "Ravi", "", "").await.unwrap();
        store
            .save_pose_embedding("E001", Pose::Front, &Embedding::new(vec![1.0, 0.0]), 0.9)
            .await
            .unwrap();
        store
            .save_pose_embedding("E001", Pose::Left, &Embedding::new(vec![0.8, 0.2]), 0.7)
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_snapshot_includes_pose_less_identity() {
        let store = seeded().await;
        let snapshot = store.load_identities().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, "E001");
        assert_eq!(snapshot[0].pose_count(), 2);
        assert_eq!(snapshot[0].poses[0].pose, Pose::Front);
        assert_eq!(snapshot[0].poses[0].embedding.values, vec![1.0, 0.0]);
        assert_eq!(snapshot[1].id, "E002");
        assert!(!snapshot[1].is_recognizable());
    }

    #[tokio::test]
    async fn test_pose_replaced_not_duplicated() {
        let store = seeded().await;
        store
            .save_pose_embedding("E001", Pose::Front, &Embedding::new(vec![0.0, 1.0]), 0.95)
            .await
            .unwrap();
        let snapshot = store.load_identities().await.unwrap();
        assert_eq!(snapshot[0].pose_count(), 2);
        assert_eq!(snapshot[0].poses[0].embedding.values, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_save_for_unknown_identity() {
        let store = Store::open_in_memory().await.unwrap();
        let err = store
            .save_pose_embedding("ghost", Pose::Front, &Embedding::new(vec![1.0]), 0.5)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::IdentityNotFound(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn test_deactivated_identity_leaves_snapshot() {
        let store = seeded().await;
        assert!(store.deactivate_identity("E001").await.unwrap());
        assert!(!store.deactivate_identity("nobody").await.unwrap());
        let snapshot = store.load_identities().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "E002");

        let summaries = store.identity_summaries().await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert!(!summaries[0].is_active);
        assert_eq!(summaries[0].poses, vec![Pose::Front, Pose::Left]);
        assert_eq!(summaries[1].pose_count(), 0);
    }
}
