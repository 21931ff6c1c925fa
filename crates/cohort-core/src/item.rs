use serde::{Deserialize, Serialize};

use crate::vector::{Vector, is_valid};

/// A content item: an opaque identity (usually a path) and its embedding, if any.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    #[serde(default)]
    pub embedding: Option<Vector>,
}

impl Item {
    pub fn new(id: impl Into<String>, embedding: Option<Vector>) -> Self {
        Self {
            id: id.into(),
            embedding,
        }
    }

    pub fn with_embedding(id: impl Into<String>, embedding: Vector) -> Self {
        Self::new(id, Some(embedding))
    }

    pub fn without_embedding(id: impl Into<String>) -> Self {
        Self::new(id, None)
    }

    /// The embedding, if present and not the all-zero sentinel.
    pub fn valid_embedding(&self) -> Option<&[f32]> {
        self.embedding.as_deref().filter(|v| is_valid(v))
    }

    pub fn has_valid_embedding(&self) -> bool {
        self.valid_embedding().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_embedding_is_not_valid() {
        let item = Item::with_embedding("a.txt", vec![0.0; 4]);
        assert!(item.embedding.is_some());
        assert!(!item.has_valid_embedding());
    }

    #[test]
    fn test_missing_embedding_deserializes_as_none() {
        let item: Item = serde_json::from_str(r#"{"id":"b.png"}"#).unwrap();
        assert_eq!(item.id, "b.png");
        assert!(item.embedding.is_none());
    }
}
