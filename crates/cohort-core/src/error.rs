/// Failures surfaced by the batch clustering engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClusteringError {
    /// Empty input. A caller error; not worth retrying.
    #[error("insufficient data: no items to cluster")]
    InsufficientData,

    /// Input was non-empty but no item carries a usable vector.
    /// Callers treat this as "nothing to cluster yet".
    #[error("no embeddings found among {item_count} items")]
    NoEmbeddingsFound { item_count: usize },

    /// The cancellation flag was raised between merge iterations.
    #[error("clustering cancelled after {merges} merges")]
    Cancelled { merges: usize },
}

/// Failures reported by a vector producer.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("no embedding available for {item_id}")]
    NotFound { item_id: String },

    #[error("embedding failed for {item_id}: {reason}")]
    Failed { item_id: String, reason: String },
}
