use serde::{Deserialize, Serialize};

use crate::error::EmbedError;
use crate::vector::Vector;

/// A filesystem-style change reported by the monitoring collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChangeEvent {
    Created { id: String },
    Modified { id: String },
    Deleted { id: String },
    Renamed { id: String, old_id: String },
}

impl ChangeEvent {
    /// The identity the item has after the event.
    pub fn id(&self) -> &str {
        match self {
            Self::Created { id }
            | Self::Modified { id }
            | Self::Deleted { id }
            | Self::Renamed { id, .. } => id,
        }
    }

    /// Whether a vector must be produced before the event reaches a workspace.
    pub fn needs_embedding(&self) -> bool {
        !matches!(self, Self::Deleted { .. })
    }
}

/// What an aggregator mutation did to a workspace.
///
/// Returned by every mutation so the owner can publish diffs to observers
/// after a batch of changes instead of sharing mutable state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "lowercase")]
pub enum MembershipChange {
    /// First item with a vector; it became the centroid.
    Seeded { item_id: String },
    Added { item_id: String, similarity: f32 },
    /// Already a member; similarity (and vector) refreshed.
    Updated { item_id: String, similarity: f32 },
    /// `replaced` is set when a different member already tracked under the
    /// new id was dropped in favour of the renamed one.
    Renamed {
        old_id: String,
        item_id: String,
        similarity: f32,
        #[serde(default)]
        replaced: bool,
    },
    Removed { item_id: String },
    /// Below threshold and not forced. `evicted` is set when the item had
    /// been a member and was dropped because of this decision.
    Rejected {
        item_id: String,
        similarity: f32,
        evicted: bool,
    },
    Unchanged { item_id: String },
}

impl MembershipChange {
    pub fn item_id(&self) -> &str {
        match self {
            Self::Seeded { item_id }
            | Self::Added { item_id, .. }
            | Self::Updated { item_id, .. }
            | Self::Renamed { item_id, .. }
            | Self::Removed { item_id }
            | Self::Rejected { item_id, .. }
            | Self::Unchanged { item_id } => item_id,
        }
    }

    /// True when membership or the centroid may have changed.
    pub fn is_mutation(&self) -> bool {
        match self {
            Self::Rejected { evicted, .. } => *evicted,
            Self::Unchanged { .. } => false,
            _ => true,
        }
    }
}

/// Produces a vector for an item. Implementations may be slow or fail;
/// callers must not hold a workspace lock while calling this.
pub trait Embedder: Send + Sync {
    fn embed(&self, item_id: &str) -> Result<Vector, EmbedError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let ev: ChangeEvent =
            serde_json::from_str(r#"{"kind":"renamed","id":"b.txt","old_id":"a.txt"}"#).unwrap();
        assert_eq!(
            ev,
            ChangeEvent::Renamed {
                id: "b.txt".to_string(),
                old_id: "a.txt".to_string()
            }
        );
        assert_eq!(ev.id(), "b.txt");
        assert!(ev.needs_embedding());
    }

    #[test]
    fn test_deleted_needs_no_embedding() {
        let ev: ChangeEvent = serde_json::from_str(r#"{"kind":"deleted","id":"x"}"#).unwrap();
        assert!(!ev.needs_embedding());
    }

    #[test]
    fn test_rejection_without_eviction_is_not_a_mutation() {
        let change = MembershipChange::Rejected {
            item_id: "a".to_string(),
            similarity: 0.1,
            evicted: false,
        };
        assert!(!change.is_mutation());
        assert_eq!(change.item_id(), "a");
    }
}
