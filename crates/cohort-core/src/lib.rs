//! Similarity clustering and incremental workspace membership.
//!
//! Two cooperating pieces: a batch single-link agglomerative engine that
//! partitions items by embedding similarity, and an incremental aggregator
//! that keeps long-lived workspaces (a centroid plus members) current as
//! items are created, modified, renamed, or deleted.
//!
//! Zero I/O. Vector production, persistence, and change monitoring live
//! with the caller.

pub mod aggregate;
pub mod cluster;
pub mod constants;
pub mod engine;
pub mod error;
pub mod events;
pub mod item;
pub mod serde_compat;
pub mod time;
pub mod vector;

pub use aggregate::{IncrementalAggregator, Membership, WorkspaceState};
pub use cluster::Cluster;
pub use constants::{
    DEFAULT_DIMENSION, DEFAULT_THRESHOLD, EPSILON, MAX_UI_THRESHOLD, MIN_UI_THRESHOLD,
    NO_LINK_SIMILARITY, SEED_SIMILARITY,
};
pub use engine::{ClusteringEngine, single_link_similarity};
pub use error::{ClusteringError, EmbedError};
pub use events::{ChangeEvent, Embedder, MembershipChange};
pub use item::Item;
pub use serde_compat::{CURRENT_VERSION, export_json, import_json};
pub use time::now_unix_secs;
pub use vector::{
    Vector, average, batch_cosine_similarity, cosine_similarity, dot, fit_dimension, is_valid,
    l2_norm, normalize, sum_of_squares,
};
