//! JSON wire format for workspace export/import.
//!
//! Field names are camelCase. Centroids and embeddings are plain float
//! arrays; an absent centroid is `null`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{Membership, WorkspaceState};
use crate::vector::Vector;

pub const CURRENT_VERSION: &str = "1";

#[derive(Serialize, Deserialize, Debug)]
pub struct WireExport {
    pub version: String,
    pub workspaces: Vec<WireWorkspace>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct WireWorkspace {
    pub id: String,
    pub name: String,
    pub threshold: f32,
    #[serde(default)]
    pub centroid: Option<Vector>,
    #[serde(default)]
    pub members: Vec<WireMember>,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct WireMember {
    pub item_id: String,
    #[serde(default)]
    pub similarity: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vector>,
}

impl WireWorkspace {
    pub fn from_state(state: &WorkspaceState) -> Self {
        Self {
            id: state.id.to_string(),
            name: state.name.clone(),
            threshold: state.threshold,
            centroid: state.centroid().map(<[f32]>::to_vec),
            members: state
                .members()
                .iter()
                .map(|m| WireMember {
                    item_id: m.item_id.clone(),
                    similarity: m.similarity,
                    embedding: m.embedding.clone(),
                })
                .collect(),
            created_at: state.created_at,
            updated_at: state.updated_at,
        }
    }

    /// Unparseable ids get a fresh UUID rather than failing the import.
    pub fn into_state(self) -> WorkspaceState {
        let id = Uuid::parse_str(&self.id).unwrap_or_else(|_| Uuid::new_v4());
        let members = self
            .members
            .into_iter()
            .map(|m| Membership {
                item_id: m.item_id,
                embedding: m.embedding,
                similarity: m.similarity,
            })
            .collect();
        WorkspaceState::restore(
            id,
            self.name,
            self.threshold,
            self.centroid,
            members,
            self.created_at,
            self.updated_at,
        )
    }
}

pub fn export_json(workspaces: &[WorkspaceState]) -> Result<String, serde_json::Error> {
    let export = WireExport {
        version: CURRENT_VERSION.to_string(),
        workspaces: workspaces.iter().map(WireWorkspace::from_state).collect(),
    };
    serde_json::to_string_pretty(&export)
}

pub fn import_json(json: &str) -> Result<Vec<WorkspaceState>, serde_json::Error> {
    let export: WireExport = serde_json::from_str(json)?;
    if export.version != CURRENT_VERSION {
        tracing::warn!(
            version = %export.version,
            expected = CURRENT_VERSION,
            "importing workspaces from a different format version"
        );
    }
    Ok(export
        .workspaces
        .into_iter()
        .map(WireWorkspace::into_state)
        .collect())
}
