use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::item::Item;
use crate::vector::{Vector, average, cosine_similarity};

/// A group of items with a derived centroid and coherence score.
///
/// Centroid and coherence are recomputed (fully or incrementally) by every
/// mutating method, so they always describe the current membership.
/// Identity is the `id`; two clusters with the same members but different
/// ids are different clusters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cluster {
    pub id: Uuid,
    members: Vec<Item>,
    centroid: Option<Vector>,
    coherence: f32,
}

impl Cluster {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            members: Vec::new(),
            centroid: None,
            coherence: 0.0,
        }
    }

    pub fn singleton(item: Item) -> Self {
        Self::from_members(vec![item])
    }

    pub fn from_members(members: Vec<Item>) -> Self {
        let mut cluster = Self::new();
        cluster.replace_members(members);
        cluster
    }

    /// Union of two clusters under a fresh id.
    pub fn merged(a: Cluster, b: Cluster) -> Self {
        let mut members = a.members;
        members.extend(b.members);
        Self::from_members(members)
    }

    pub fn members(&self) -> &[Item] {
        &self.members
    }

    pub fn into_members(self) -> Vec<Item> {
        self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn centroid(&self) -> Option<&[f32]> {
        self.centroid.as_deref()
    }

    pub fn coherence(&self) -> f32 {
        self.coherence
    }

    /// Valid member vectors, skipping members without one.
    pub fn member_vectors(&self) -> impl Iterator<Item = &[f32]> {
        self.members.iter().filter_map(Item::valid_embedding)
    }

    /// Full recompute of centroid and coherence from the member list.
    pub fn recompute_centroid(&mut self) {
        self.centroid = centroid_of(&self.members);
        self.refresh_coherence();
    }

    fn refresh_coherence(&mut self) {
        self.coherence = match self.centroid.as_deref() {
            Some(centroid) => coherence_of(centroid, &self.members),
            None => 0.0,
        };
    }

    /// Append one item.
    ///
    /// With an existing centroid the centroid moves by a running mean over
    /// the members that carry vectors, and coherence is recomputed exactly.
    /// Members without vectors only trigger a recompute while there is no
    /// centroid at all.
    ///
    /// The running mean's `n` counts members with a valid vector, not all
    /// members, so the result always equals a full recompute.
    pub fn add(&mut self, item: Item) {
        self.push_running_mean(item);
        self.refresh_coherence();
    }

    /// Append many items, updating the running mean per item and computing
    /// coherence once at the end.
    pub fn add_all(&mut self, items: impl IntoIterator<Item = Item>) {
        for item in items {
            self.push_running_mean(item);
        }
        self.refresh_coherence();
    }

    fn push_running_mean(&mut self, item: Item) {
        let vector = item.valid_embedding().map(<[f32]>::to_vec);
        self.members.push(item);

        let Some(vector) = vector else {
            if self.centroid.is_none() {
                self.centroid = centroid_of(&self.members);
            }
            return;
        };

        let n = self.members.iter().filter(|m| m.has_valid_embedding()).count() as f32;
        let same_dim = self.centroid.as_ref().is_some_and(|c| c.len() == vector.len());
        if !same_dim {
            self.centroid = centroid_of(&self.members);
            return;
        }
        if let Some(centroid) = self.centroid.as_mut() {
            for (c, x) in centroid.iter_mut().zip(&vector) {
                *c = (*c * (n - 1.0) + x) / n;
            }
        }
    }

    /// Remove every member matching `predicate`, then recompute fully.
    /// Returns the removed members.
    pub fn remove<F>(&mut self, mut predicate: F) -> Vec<Item>
    where
        F: FnMut(&Item) -> bool,
    {
        let (removed, kept): (Vec<Item>, Vec<Item>) =
            std::mem::take(&mut self.members)
                .into_iter()
                .partition(|item| predicate(item));
        self.members = kept;
        self.recompute_centroid();
        removed
    }

    pub fn replace_members(&mut self, members: Vec<Item>) {
        self.members = members;
        self.recompute_centroid();
    }
}

fn centroid_of(members: &[Item]) -> Option<Vector> {
    let vectors: Vec<&[f32]> = members.iter().filter_map(Item::valid_embedding).collect();
    average(&vectors)
}

/// Mean cosine of member vectors to the centroid, skipping members without one.
fn coherence_of(centroid: &[f32], members: &[Item]) -> f32 {
    let (sum, count) = members
        .iter()
        .filter_map(Item::valid_embedding)
        .fold((0.0f64, 0usize), |(sum, count), v| {
            (sum + f64::from(cosine_similarity(centroid, v)), count + 1)
        });
    if count == 0 {
        0.0
    } else {
        (sum / count as f64) as f32
    }
}

impl Default for Cluster {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Cluster {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Cluster {}

impl Hash for Cluster {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn item(id: &str, v: &[f32]) -> Item {
        Item::with_embedding(id, v.to_vec())
    }

    #[test]
    fn test_empty_cluster_has_no_centroid() {
        let c = Cluster::new();
        assert!(c.centroid().is_none());
        assert_eq!(c.coherence(), 0.0);
    }

    #[test]
    fn test_vectorless_members_do_not_seed_centroid() {
        let c = Cluster::from_members(vec![
            Item::without_embedding("a"),
            item("zero", &[0.0, 0.0]),
        ]);
        assert!(c.centroid().is_none());
        assert_eq!(c.coherence(), 0.0);
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn test_recompute_centroid_and_coherence() {
        let c = Cluster::from_members(vec![item("a", &[1.0, 0.0]), item("b", &[0.0, 1.0])]);
        let centroid = c.centroid().unwrap();
        assert_relative_eq!(centroid[0], 0.5);
        assert_relative_eq!(centroid[1], 0.5);
        assert_relative_eq!(c.coherence(), std::f32::consts::FRAC_1_SQRT_2, epsilon = 1e-6);
    }

    #[test]
    fn test_vectorless_member_does_not_penalize_coherence() {
        let mut c = Cluster::from_members(vec![item("a", &[1.0, 0.0]), item("b", &[2.0, 0.0])]);
        assert_relative_eq!(c.coherence(), 1.0, epsilon = 1e-6);
        c.add(Item::without_embedding("c"));
        assert_relative_eq!(c.coherence(), 1.0, epsilon = 1e-6);
        assert_eq!(c.len(), 3);
    }

    #[test]
    fn test_add_running_mean_matches_full_recompute() {
        let mut c = Cluster::singleton(item("a", &[1.0, 0.0, 2.0]));
        c.add(item("b", &[0.0, 1.0, 4.0]));
        c.add(item("c", &[2.0, 2.0, 0.0]));

        let running = c.centroid().unwrap().to_vec();
        let coherence = c.coherence();
        c.recompute_centroid();
        for (a, b) in running.iter().zip(c.centroid().unwrap()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-5);
        }
        assert_relative_eq!(coherence, c.coherence(), epsilon = 1e-5);
    }

    #[test]
    fn test_add_first_vector_after_vectorless_member() {
        let mut c = Cluster::singleton(Item::without_embedding("a"));
        c.add(item("b", &[3.0, 4.0]));
        assert_eq!(c.centroid().unwrap(), &[3.0, 4.0]);
    }

    #[test]
    fn test_add_all_defers_coherence_but_matches_add() {
        let mut one_by_one = Cluster::new();
        let mut batched = Cluster::new();
        let items = vec![item("a", &[1.0, 0.0]), item("b", &[1.0, 1.0]), item("c", &[0.0, 1.0])];
        for it in items.clone() {
            one_by_one.add(it);
        }
        batched.add_all(items);
        assert_relative_eq!(one_by_one.coherence(), batched.coherence(), epsilon = 1e-6);
    }

    #[test]
    fn test_remove_returns_removed_and_recomputes() {
        let mut c = Cluster::from_members(vec![
            item("a", &[1.0, 0.0]),
            item("b", &[0.0, 1.0]),
            Item::without_embedding("c"),
        ]);
        let removed = c.remove(|i| i.id == "b");
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, "b");
        assert_eq!(c.centroid().unwrap(), &[1.0, 0.0]);

        let removed = c.remove(|i| i.id == "a");
        assert_eq!(removed.len(), 1);
        assert!(c.centroid().is_none());
        assert_eq!(c.coherence(), 0.0);
    }

    #[test]
    fn test_replace_members() {
        let mut c = Cluster::singleton(item("a", &[1.0, 0.0]));
        c.replace_members(vec![item("x", &[0.0, 2.0])]);
        assert_eq!(c.len(), 1);
        assert_eq!(c.centroid().unwrap(), &[0.0, 2.0]);
    }

    #[test]
    fn test_equality_by_id_only() {
        let a = Cluster::singleton(item("a", &[1.0]));
        let mut same = a.clone();
        same.replace_members(vec![item("z", &[5.0])]);
        assert_eq!(a, same);
        assert_ne!(a, Cluster::singleton(item("a", &[1.0])));
    }
}
