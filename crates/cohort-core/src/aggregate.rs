//! Incremental workspace membership.
//!
//! A workspace keeps a running centroid over its members. New or changed
//! items are accepted when their cosine similarity to that centroid meets
//! the workspace threshold (or when the caller forces them in), without a
//! batch clustering pass. Every admission and removal recomputes the
//! centroid from all current members; per-member similarity is the value
//! measured at admission time.
//!
//! All mutations of one workspace must be serialized by its owner.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cluster::Cluster;
use crate::constants::SEED_SIMILARITY;
use crate::engine::ClusteringEngine;
use crate::error::ClusteringError;
use crate::events::{ChangeEvent, MembershipChange};
use crate::item::Item;
use crate::time::now_unix_secs;
use crate::vector::{Vector, average, cosine_similarity, fit_dimension, is_valid};

/// One member of a workspace.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub item_id: String,
    pub embedding: Option<Vector>,
    /// Similarity to the centroid when the item was (last) admitted.
    pub similarity: f32,
}

impl Membership {
    pub fn valid_embedding(&self) -> Option<&[f32]> {
        self.embedding.as_deref().filter(|v| is_valid(v))
    }
}

/// Long-lived, persisted state of one workspace.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkspaceState {
    pub id: Uuid,
    pub name: String,
    pub threshold: f32,
    centroid: Option<Vector>,
    members: Vec<Membership>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl WorkspaceState {
    /// An empty workspace with no centroid.
    pub fn new(name: &str, threshold: f32) -> Self {
        let now = now_unix_secs();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            threshold,
            centroid: None,
            members: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuild a workspace from persisted parts. The stored centroid is
    /// kept as-is; call [`IncrementalAggregator::refresh`] to recompute it.
    pub fn restore(
        id: Uuid,
        name: String,
        threshold: f32,
        centroid: Option<Vector>,
        members: Vec<Membership>,
        created_at: u64,
        updated_at: u64,
    ) -> Self {
        Self {
            id,
            name,
            threshold,
            centroid,
            members,
            created_at,
            updated_at,
        }
    }

    pub fn centroid(&self) -> Option<&[f32]> {
        self.centroid.as_deref()
    }

    pub fn members(&self) -> &[Membership] {
        &self.members
    }

    pub fn member(&self, item_id: &str) -> Option<&Membership> {
        self.members.iter().find(|m| m.item_id == item_id)
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.member(item_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members as batch-clustering input.
    pub fn items(&self) -> Vec<Item> {
        self.members
            .iter()
            .map(|m| Item::new(m.item_id.clone(), m.embedding.clone()))
            .collect()
    }

    fn position(&self, item_id: &str) -> Option<usize> {
        self.members.iter().position(|m| m.item_id == item_id)
    }

    /// Insert or update; returns true when the item was already a member.
    fn upsert(&mut self, item_id: String, embedding: Option<Vector>, similarity: f32) -> bool {
        match self.position(&item_id) {
            Some(pos) => {
                let member = &mut self.members[pos];
                member.similarity = similarity;
                if embedding.is_some() {
                    member.embedding = embedding;
                }
                true
            }
            None => {
                self.members.push(Membership {
                    item_id,
                    embedding,
                    similarity,
                });
                false
            }
        }
    }

    fn take_member(&mut self, item_id: &str) -> Option<Membership> {
        let pos = self.position(item_id)?;
        Some(self.members.remove(pos))
    }

    fn touch(&mut self) {
        self.updated_at = now_unix_secs();
    }
}

/// Decides per-item inclusion and maintains workspace centroids.
#[derive(Debug, Clone, Default)]
pub struct IncrementalAggregator {
    dimension: Option<usize>,
}

impl IncrementalAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Truncate or zero-pad every incoming vector to `dimension`.
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: Some(dimension),
        }
    }

    fn prepare(&self, embedding: Option<Vector>) -> Option<Vector> {
        let v = embedding.filter(|v| is_valid(v))?;
        let v = match self.dimension {
            Some(dim) => fit_dimension(v, dim),
            None => v,
        };
        is_valid(&v).then_some(v)
    }

    /// Seed an empty workspace or gate `item` on similarity to the centroid.
    ///
    /// `force_add` bypasses the gate (bulk imports, explicit user adds).
    /// Items without a usable vector are only accepted when forced; they get
    /// similarity 0.0 and do not move the centroid. An existing member that
    /// arrives without a usable vector (the producer failed) is left as
    /// stored. A member that is re-submitted and now fails the gate is
    /// evicted.
    pub fn admit_or_seed(
        &self,
        state: &mut WorkspaceState,
        item: Item,
        force_add: bool,
    ) -> MembershipChange {
        let Item { id, embedding } = item;
        let vector = self.prepare(embedding);

        let Some(vector) = vector else {
            if state.contains(&id) {
                tracing::debug!(workspace = %state.name, item = %id, "no usable vector, keeping member as stored");
                return MembershipChange::Unchanged { item_id: id };
            }
            if force_add {
                state.upsert(id.clone(), None, 0.0);
                self.finish(state);
                return MembershipChange::Added {
                    item_id: id,
                    similarity: 0.0,
                };
            }
            return self.reject(state, id, 0.0);
        };

        let Some(centroid) = state.centroid() else {
            state.upsert(id.clone(), Some(vector), SEED_SIMILARITY);
            self.finish(state);
            tracing::debug!(workspace = %state.name, item = %id, "seeded workspace centroid");
            return MembershipChange::Seeded { item_id: id };
        };

        let similarity = cosine_similarity(centroid, &vector);
        if similarity < state.threshold && !force_add {
            return self.reject(state, id, similarity);
        }

        let existed = state.upsert(id.clone(), Some(vector), similarity);
        self.finish(state);
        tracing::debug!(
            workspace = %state.name,
            item = %id,
            similarity,
            forced = force_add,
            "admitted item"
        );
        if existed {
            MembershipChange::Updated {
                item_id: id,
                similarity,
            }
        } else {
            MembershipChange::Added {
                item_id: id,
                similarity,
            }
        }
    }

    fn reject(&self, state: &mut WorkspaceState, item_id: String, similarity: f32) -> MembershipChange {
        let evicted = state.take_member(&item_id).is_some();
        if evicted {
            self.finish(state);
        }
        tracing::debug!(
            workspace = %state.name,
            item = %item_id,
            similarity,
            threshold = state.threshold,
            evicted,
            "rejected item"
        );
        MembershipChange::Rejected {
            item_id,
            similarity,
            evicted,
        }
    }

    /// Drop a member and recompute the centroid from those that remain.
    pub fn remove(&self, state: &mut WorkspaceState, item_id: &str) -> MembershipChange {
        if state.take_member(item_id).is_none() {
            return MembershipChange::Unchanged {
                item_id: item_id.to_string(),
            };
        }
        self.finish(state);
        tracing::debug!(workspace = %state.name, item = %item_id, "removed item");
        MembershipChange::Removed {
            item_id: item_id.to_string(),
        }
    }

    /// Move a member from `old_id` to `item.id`.
    ///
    /// A fresh vector in `item` replaces the stored one. The similarity is
    /// re-measured against the centroid as it stood before the rename;
    /// renames are not gated. A member already tracked under the new id is
    /// dropped and reported through `replaced`. When `old_id` is unknown the
    /// item is treated as newly created.
    pub fn rename(
        &self,
        state: &mut WorkspaceState,
        old_id: &str,
        item: Item,
        force_add: bool,
    ) -> MembershipChange {
        let Some(mut member) = state.take_member(old_id) else {
            return self.admit_or_seed(state, item, force_add);
        };

        let Item { id, embedding } = item;
        if let Some(vector) = self.prepare(embedding) {
            member.embedding = Some(vector);
        }
        // The rename target may already be tracked under its new name.
        let replaced = state.take_member(&id).is_some();
        if replaced {
            tracing::debug!(workspace = %state.name, item = %id, "rename replaced existing member");
        }

        let similarity = match (state.centroid(), member.valid_embedding()) {
            (Some(centroid), Some(v)) => cosine_similarity(centroid, v),
            (None, Some(_)) => SEED_SIMILARITY,
            (_, None) => 0.0,
        };
        state.upsert(id.clone(), member.embedding, similarity);
        self.finish(state);
        tracing::debug!(workspace = %state.name, from = %old_id, to = %id, similarity, replaced, "renamed item");
        MembershipChange::Renamed {
            old_id: old_id.to_string(),
            item_id: id,
            similarity,
            replaced,
        }
    }

    /// Route a change event. `embedding` is the vector produced for the
    /// event's item (ignored for deletions).
    pub fn apply(
        &self,
        state: &mut WorkspaceState,
        event: ChangeEvent,
        embedding: Option<Vector>,
        force_add: bool,
    ) -> MembershipChange {
        match event {
            ChangeEvent::Created { id } | ChangeEvent::Modified { id } => {
                self.admit_or_seed(state, Item::new(id, embedding), force_add)
            }
            ChangeEvent::Deleted { id } => self.remove(state, &id),
            ChangeEvent::Renamed { id, old_id } => {
                self.rename(state, &old_id, Item::new(id, embedding), force_add)
            }
        }
    }

    /// Recompute the centroid and re-measure every member against it.
    pub fn refresh(&self, state: &mut WorkspaceState) {
        self.recompute_centroid(state);
        let centroid = state.centroid.clone();
        for member in &mut state.members {
            member.similarity = match (centroid.as_deref(), member.valid_embedding()) {
                (Some(c), Some(v)) => cosine_similarity(c, v),
                _ => 0.0,
            };
        }
        state.touch();
    }

    /// Change the threshold; returns the previous value. Existing members
    /// are kept. Callers typically follow up with [`recluster`](Self::recluster).
    pub fn set_threshold(&self, state: &mut WorkspaceState, threshold: f32) -> f32 {
        let previous = state.threshold;
        state.threshold = threshold;
        state.touch();
        tracing::debug!(workspace = %state.name, previous, threshold, "threshold changed");
        previous
    }

    /// Batch-cluster the workspace's members at its threshold.
    pub fn recluster(
        &self,
        state: &WorkspaceState,
        engine: &ClusteringEngine,
    ) -> Result<Vec<Cluster>, ClusteringError> {
        engine.cluster(state.items(), state.threshold)
    }

    /// Centroid from every member with a usable vector; `None` if there are none.
    pub fn recompute_centroid(&self, state: &mut WorkspaceState) {
        let vectors: Vec<&[f32]> = state
            .members
            .iter()
            .filter_map(Membership::valid_embedding)
            .collect();
        let has_vectors = !vectors.is_empty();
        let centroid = average(&vectors);
        if has_vectors && centroid.is_none() {
            tracing::error!(
                workspace = %state.name,
                "member vectors have inconsistent dimensions; centroid cleared"
            );
        }
        state.centroid = centroid;
    }

    fn finish(&self, state: &mut WorkspaceState) {
        self.recompute_centroid(state);
        state.touch();
    }
}
