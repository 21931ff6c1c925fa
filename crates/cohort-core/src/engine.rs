//! Batch single-link agglomerative clustering.
//!
//! Every item starts as a singleton. The engine keeps a max-heap of candidate
//! pairs whose single-link similarity already meets the threshold and merges
//! the best live pair, one merge per iteration, until no candidate is left.
//!
//! Deletion from the heap is lazy: merged clusters leave their slot empty
//! (retired), and any popped candidate that references a retired slot is
//! dropped. After a merge only the pairs between the new cluster and the
//! remaining active clusters are evaluated, which keeps the whole pass at
//! O(n² log n) pair operations instead of a full rescan per merge.
//!
//! Pair evaluation runs on rayon; the pop-and-merge decision is sequential.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use rayon::prelude::*;

use crate::cluster::Cluster;
use crate::constants::NO_LINK_SIMILARITY;
use crate::error::ClusteringError;
use crate::item::Item;
use crate::vector::cosine_similarity;

/// A mergeable pair of slots. Ordered by similarity, then by enqueue order
/// so that among equal similarities the earliest-enqueued pair pops first.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    similarity: f32,
    seq: u64,
    a: usize,
    b: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.similarity
            .total_cmp(&other.similarity)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Single-link similarity: the best pairwise cosine between member vectors.
/// `NO_LINK_SIMILARITY` when either side has no valid vector.
pub fn single_link_similarity(a: &Cluster, b: &Cluster) -> f32 {
    let mut best: Option<f32> = None;
    for va in a.member_vectors() {
        for vb in b.member_vectors() {
            let s = cosine_similarity(va, vb);
            best = Some(best.map_or(s, |cur| cur.max(s)));
        }
    }
    best.unwrap_or(NO_LINK_SIMILARITY)
}

/// Similarity of a pair if it may merge at `threshold`. A side without
/// vectors links at `NO_LINK_SIMILARITY`, so it only merges at τ <= -1.
fn mergeable(a: &Cluster, b: &Cluster, threshold: f32) -> Option<f32> {
    let s = single_link_similarity(a, b);
    (s >= threshold).then_some(s)
}

#[derive(Debug, Clone, Copy)]
pub struct ClusteringEngine {
    parallel: bool,
}

impl Default for ClusteringEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusteringEngine {
    pub fn new() -> Self {
        Self { parallel: true }
    }

    /// Evaluate pairs on the calling thread only.
    pub fn sequential() -> Self {
        Self { parallel: false }
    }

    /// Partition `items` into clusters at `threshold`.
    ///
    /// Output is sorted by member count, largest first, ties broken by
    /// higher coherence.
    pub fn cluster(&self, items: Vec<Item>, threshold: f32) -> Result<Vec<Cluster>, ClusteringError> {
        let never = AtomicBool::new(false);
        self.cluster_with_cancel(items, threshold, &never)
    }

    /// Like [`cluster`](Self::cluster), but checks `cancel` between merge
    /// iterations and stops with `ClusteringError::Cancelled` once it is set.
    pub fn cluster_with_cancel(
        &self,
        items: Vec<Item>,
        threshold: f32,
        cancel: &AtomicBool,
    ) -> Result<Vec<Cluster>, ClusteringError> {
        if items.is_empty() {
            return Err(ClusteringError::InsufficientData);
        }
        if !items.iter().any(Item::has_valid_embedding) {
            return Err(ClusteringError::NoEmbeddingsFound {
                item_count: items.len(),
            });
        }

        let item_count = items.len();
        // None marks a retired slot.
        let mut slots: Vec<Option<Cluster>> =
            items.into_iter().map(|i| Some(Cluster::singleton(i))).collect();
        let mut active = slots.len();
        let mut heap = BinaryHeap::new();
        let mut seq: u64 = 0;

        for (a, b, similarity) in self.initial_pairs(&slots, threshold) {
            heap.push(Candidate { similarity, seq, a, b });
            seq += 1;
        }

        let mut merges = 0usize;
        while active > 1 {
            if cancel.load(AtomicOrdering::Relaxed) {
                tracing::debug!(merges, "clustering cancelled");
                return Err(ClusteringError::Cancelled { merges });
            }

            let Some(best) = heap.pop() else {
                break;
            };
            if slots[best.a].is_none() || slots[best.b].is_none() {
                continue;
            }
            if best.similarity < threshold {
                break;
            }

            let (Some(a), Some(b)) = (slots[best.a].take(), slots[best.b].take()) else {
                continue;
            };
            let merged = Cluster::merged(a, b);
            let merged_slot = slots.len();
            for (other, similarity) in self.pairs_against(&merged, &slots, threshold) {
                heap.push(Candidate {
                    similarity,
                    seq,
                    a: other,
                    b: merged_slot,
                });
                seq += 1;
            }
            slots.push(Some(merged));
            active -= 1;
            merges += 1;
        }

        let mut clusters: Vec<Cluster> = slots.into_iter().flatten().collect();
        for cluster in &mut clusters {
            cluster.recompute_centroid();
        }
        clusters.sort_by(|a, b| {
            b.len()
                .cmp(&a.len())
                .then_with(|| b.coherence().total_cmp(&a.coherence()))
        });

        tracing::debug!(
            items = item_count,
            merges,
            clusters = clusters.len(),
            threshold,
            "clustering complete"
        );
        Ok(clusters)
    }

    /// All qualifying pairs among the initial singletons, in (i, j) order.
    fn initial_pairs(&self, slots: &[Option<Cluster>], threshold: f32) -> Vec<(usize, usize, f32)> {
        let n = slots.len();
        let row = |i: usize| -> Vec<(usize, usize, f32)> {
            let Some(a) = slots[i].as_ref() else {
                return Vec::new();
            };
            ((i + 1)..n)
                .filter_map(|j| {
                    let b = slots[j].as_ref()?;
                    mergeable(a, b, threshold).map(|s| (i, j, s))
                })
                .collect()
        };

        if self.parallel {
            (0..n).into_par_iter().flat_map_iter(row).collect()
        } else {
            (0..n).flat_map(row).collect()
        }
    }

    /// Qualifying pairs between a freshly merged cluster and each active slot.
    fn pairs_against(
        &self,
        merged: &Cluster,
        slots: &[Option<Cluster>],
        threshold: f32,
    ) -> Vec<(usize, f32)> {
        let eval = |(k, slot): (usize, &Option<Cluster>)| {
            let other = slot.as_ref()?;
            mergeable(merged, other, threshold).map(|s| (k, s))
        };

        if self.parallel {
            slots.par_iter().enumerate().filter_map(eval).collect()
        } else {
            slots.iter().enumerate().filter_map(eval).collect()
        }
    }
}
