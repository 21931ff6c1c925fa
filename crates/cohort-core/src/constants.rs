/// Embedding dimension shared with the vector producer.
pub const DEFAULT_DIMENSION: usize = 512;

/// Similarity threshold used when a workspace is created without one.
pub const DEFAULT_THRESHOLD: f32 = 0.75;

/// Lowest threshold the CLI accepts without `--allow-any-threshold`.
pub const MIN_UI_THRESHOLD: f32 = 0.5;

/// Highest threshold the CLI accepts without `--allow-any-threshold`.
pub const MAX_UI_THRESHOLD: f32 = 0.99;

/// Similarity recorded for the item that seeds an empty workspace.
pub const SEED_SIMILARITY: f32 = 1.0;

/// Single-link similarity of a cluster pair where one side has no valid vector.
pub const NO_LINK_SIMILARITY: f32 = -1.0;

/// Tolerance for float comparisons in tests and invariant checks.
pub const EPSILON: f32 = 1e-5;
