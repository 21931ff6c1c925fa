//! End-to-end properties of batch clustering and incremental workspaces.

use cohort_core::{
    ChangeEvent, ClusteringEngine, ClusteringError, IncrementalAggregator, Item,
    MembershipChange, WorkspaceState, cosine_similarity, single_link_similarity,
};
use proptest::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

fn rng() -> SmallRng {
    SmallRng::seed_from_u64(42)
}

/// Points scattered tightly around a few well-separated axis directions.
fn blobs(rng: &mut SmallRng, per_blob: usize, dim: usize, blobs: usize) -> Vec<Item> {
    let mut items = Vec::new();
    for b in 0..blobs {
        for i in 0..per_blob {
            let mut v: Vec<f32> = (0..dim).map(|_| rng.random_range(-0.02..0.02)).collect();
            v[b] += 1.0;
            items.push(Item::with_embedding(format!("blob{b}-{i}"), v));
        }
    }
    items
}

fn arb_items() -> impl Strategy<Value = Vec<Item>> {
    prop::collection::vec(prop::collection::vec(-1.0f32..1.0, 4), 1..12).prop_map(|vs| {
        vs.into_iter()
            .enumerate()
            .map(|(i, mut v)| {
                // Keep every vector valid.
                v[0] += 2.0;
                Item::with_embedding(format!("i{i}"), v)
            })
            .collect()
    })
}

/// Like [`arb_items`], with some vectorless items mixed in; the first item
/// always keeps its vector.
fn arb_mixed_items() -> impl Strategy<Value = Vec<Item>> {
    (arb_items(), prop::collection::vec(any::<bool>(), 12)).prop_map(|(items, drop)| {
        items
            .into_iter()
            .zip(drop)
            .enumerate()
            .map(|(i, (item, drop))| {
                if i > 0 && drop {
                    Item::without_embedding(item.id)
                } else {
                    item
                }
            })
            .collect()
    })
}

#[test]
fn blobs_recover_their_groups() {
    let mut rng = rng();
    let items = blobs(&mut rng, 5, 16, 3);
    let clusters = ClusteringEngine::new().cluster(items, 0.9).unwrap();

    assert_eq!(clusters.len(), 3);
    for cluster in &clusters {
        assert_eq!(cluster.len(), 5);
        let prefix = &cluster.members()[0].id[..5];
        assert!(cluster.members().iter().all(|m| m.id.starts_with(prefix)));
        assert!(cluster.coherence() > 0.99);
    }
}

#[test]
fn reclustering_centroids_does_not_merge_further() {
    let mut rng = rng();
    let items = blobs(&mut rng, 4, 12, 4);
    let engine = ClusteringEngine::new();
    let first = engine.cluster(items, 0.85).unwrap();

    for (i, a) in first.iter().enumerate() {
        for b in &first[i + 1..] {
            assert!(single_link_similarity(a, b) < 0.85);
        }
    }

    let representatives: Vec<Item> = first
        .iter()
        .map(|c| Item::new(c.id.to_string(), c.centroid().map(<[f32]>::to_vec)))
        .collect();
    let second = engine.cluster(representatives, 0.85).unwrap();
    assert_eq!(second.len(), first.len());
}

#[test]
fn no_embeddings_is_recoverable() {
    let items = vec![Item::without_embedding("a"), Item::without_embedding("b")];
    match ClusteringEngine::new().cluster(items, 0.8) {
        Err(ClusteringError::NoEmbeddingsFound { item_count }) => assert_eq!(item_count, 2),
        other => panic!("expected NoEmbeddingsFound, got {other:?}"),
    }
}

#[test]
fn event_stream_keeps_workspace_consistent() {
    let agg = IncrementalAggregator::new();
    let mut ws = WorkspaceState::new("notes", 0.8);
    let v = |x: f32, y: f32| Some(vec![x, y, 0.0]);

    let changes = vec![
        agg.apply(&mut ws, ChangeEvent::Created { id: "a.md".into() }, v(1.0, 0.0), false),
        agg.apply(&mut ws, ChangeEvent::Created { id: "b.md".into() }, v(0.95, 0.1), false),
        agg.apply(&mut ws, ChangeEvent::Created { id: "c.md".into() }, v(0.0, 1.0), false),
        agg.apply(
            &mut ws,
            ChangeEvent::Renamed {
                id: "b2.md".into(),
                old_id: "b.md".into(),
            },
            None,
            false,
        ),
        agg.apply(&mut ws, ChangeEvent::Deleted { id: "a.md".into() }, None, false),
    ];

    assert!(matches!(changes[0], MembershipChange::Seeded { .. }));
    assert!(matches!(changes[1], MembershipChange::Added { .. }));
    assert!(matches!(changes[2], MembershipChange::Rejected { evicted: false, .. }));
    assert!(matches!(changes[3], MembershipChange::Renamed { .. }));
    assert!(matches!(changes[4], MembershipChange::Removed { .. }));

    let ids: Vec<&str> = ws.members().iter().map(|m| m.item_id.as_str()).collect();
    assert_eq!(ids, vec!["b2.md"]);
    let centroid = ws.centroid().unwrap();
    assert!((cosine_similarity(centroid, &[0.95, 0.1, 0.0]) - 1.0).abs() < 1e-6);
}

proptest! {
    #[test]
    fn prop_negative_threshold_merges_everything(items in arb_mixed_items()) {
        let n = items.len();
        let clusters = ClusteringEngine::new().cluster(items, -1.0).unwrap();
        prop_assert_eq!(clusters.len(), 1);
        prop_assert_eq!(clusters[0].len(), n);
    }

    #[test]
    fn prop_threshold_above_one_keeps_singletons(items in arb_items()) {
        let n = items.len();
        let clusters = ClusteringEngine::new().cluster(items, 1.0001).unwrap();
        prop_assert_eq!(clusters.len(), n);
        prop_assert!(clusters.iter().all(|c| c.len() == 1));
    }

    #[test]
    fn prop_partition_preserves_items(items in arb_items(), threshold in 0.0f32..1.0) {
        let mut expected: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
        let clusters = ClusteringEngine::new().cluster(items, threshold).unwrap();
        let mut seen: Vec<String> = clusters
            .iter()
            .flat_map(|c| c.members().iter().map(|m| m.id.clone()))
            .collect();
        expected.sort();
        seen.sort();
        prop_assert_eq!(seen, expected);
        for w in clusters.windows(2) {
            prop_assert!(w[0].len() >= w[1].len());
        }
    }

    #[test]
    fn prop_admit_remove_round_trip(
        base in prop::collection::vec(prop::collection::vec(0.1f32..1.0, 6), 1..6),
        extra in prop::collection::vec(0.1f32..1.0, 6),
    ) {
        let agg = IncrementalAggregator::new();
        let mut ws = WorkspaceState::new("prop", -1.0);
        for (i, v) in base.into_iter().enumerate() {
            agg.admit_or_seed(&mut ws, Item::with_embedding(format!("b{i}"), v), false);
        }
        let before = ws.centroid().unwrap().to_vec();

        agg.admit_or_seed(&mut ws, Item::with_embedding("extra", extra), false);
        agg.remove(&mut ws, "extra");

        let after = ws.centroid().unwrap();
        for (a, b) in after.iter().zip(&before) {
            prop_assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn prop_seed_always_succeeds(
        v in prop::collection::vec(0.1f32..1.0, 4),
        threshold in -2.0f32..2.0,
    ) {
        let agg = IncrementalAggregator::new();
        let mut ws = WorkspaceState::new("seed", threshold);
        let change = agg.admit_or_seed(&mut ws, Item::with_embedding("first", v), false);
        prop_assert!(matches!(change, MembershipChange::Seeded { .. }), "got {:?}", change);
        prop_assert_eq!(ws.member("first").map(|m| m.similarity), Some(1.0));
    }
}
