use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use cohort_core::{Membership, Vector, WorkspaceState};

use crate::error::{Result, StoreError};
use crate::schema;

/// Short description of a stored workspace, for listings.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceSummary {
    pub id: Uuid,
    pub name: String,
    pub threshold: f32,
    pub member_count: usize,
    pub has_centroid: bool,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::initialize(&conn)?;
        tracing::info!("opened workspace store at {}", path.display());
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // --- Metadata ---

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM metadata WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    // --- Save ---

    /// Persist one workspace: header, centroid and the full member list,
    /// replacing whatever was stored for it before. One transaction.
    pub fn save_workspace(&self, state: &WorkspaceState) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        self.save_workspace_on(&tx, state)?;
        tx.commit()?;
        Ok(())
    }

    /// Save several workspaces atomically.
    pub fn save_workspaces(&self, states: &[WorkspaceState]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for state in states {
            self.save_workspace_on(&tx, state)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn save_workspace_on(&self, conn: &Connection, state: &WorkspaceState) -> Result<()> {
        let id = state.id.to_string();

        conn.execute(
            "INSERT INTO workspaces (id, name, threshold, centroid, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                threshold = excluded.threshold,
                centroid = excluded.centroid,
                updated_at = excluded.updated_at",
            params![
                id,
                state.name,
                f64::from(state.threshold),
                state.centroid().map(encode_vector),
                state.created_at as i64,
                state.updated_at as i64,
            ],
        )?;

        conn.execute("DELETE FROM members WHERE workspace_id = ?1", [&id])?;
        {
            let mut insert = conn.prepare(
                "INSERT INTO members (workspace_id, item_id, position, similarity, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (position, member) in state.members().iter().enumerate() {
                insert.execute(params![
                    id,
                    member.item_id,
                    position as i64,
                    f64::from(member.similarity),
                    member.embedding.as_deref().map(encode_vector),
                ])?;
            }
        }

        tracing::debug!(
            workspace = %state.name,
            members = state.len(),
            "saved workspace"
        );
        Ok(())
    }

    // --- Load ---

    pub fn load_workspace(&self, id: Uuid) -> Result<Option<WorkspaceState>> {
        self.load_where("id = ?1", &id.to_string())
    }

    pub fn find_workspace(&self, name: &str) -> Result<Option<WorkspaceState>> {
        self.load_where("name = ?1", name)
    }

    /// Like [`find_workspace`](Self::find_workspace) but a missing name is an error.
    pub fn require_workspace(&self, name: &str) -> Result<WorkspaceState> {
        self.find_workspace(name)?
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn load_where(&self, clause: &str, value: &str) -> Result<Option<WorkspaceState>> {
        let sql = format!(
            "SELECT id, name, threshold, centroid, created_at, updated_at
             FROM workspaces WHERE {clause}"
        );
        let header = self
            .conn
            .query_row(&sql, [value], read_header)
            .optional()?;
        let Some(header) = header else {
            return Ok(None);
        };

        let id = Uuid::parse_str(&header.id)
            .map_err(|e| StoreError::InvalidData(format!("bad workspace id {}: {e}", header.id)))?;
        let centroid = header.centroid.as_deref().map(decode_vector).transpose()?;
        let members = self.load_members(&header.id)?;

        Ok(Some(WorkspaceState::restore(
            id,
            header.name,
            header.threshold as f32,
            centroid,
            members,
            header.created_at.max(0) as u64,
            header.updated_at.max(0) as u64,
        )))
    }

    fn load_members(&self, workspace_id: &str) -> Result<Vec<Membership>> {
        let mut stmt = self.conn.prepare(
            "SELECT item_id, similarity, embedding FROM members
             WHERE workspace_id = ?1 ORDER BY position",
        )?;
        let rows: Vec<(String, f64, Option<Vec<u8>>)> = stmt
            .query_map([workspace_id], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<std::result::Result<_, _>>()?;

        rows.into_iter()
            .map(|(item_id, similarity, blob)| {
                Ok(Membership {
                    item_id,
                    similarity: similarity as f32,
                    embedding: blob.as_deref().map(decode_vector).transpose()?,
                })
            })
            .collect()
    }

    pub fn load_all(&self) -> Result<Vec<WorkspaceState>> {
        let ids: Vec<String> = {
            let mut stmt = self.conn.prepare("SELECT id FROM workspaces ORDER BY name")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<_, _>>()?;
            ids
        };
        let mut states = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(state) = self.load_where("id = ?1", &id)? {
                states.push(state);
            }
        }
        Ok(states)
    }

    pub fn list_workspaces(&self) -> Result<Vec<WorkspaceSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT w.id, w.name, w.threshold, w.centroid IS NOT NULL,
                    (SELECT count(*) FROM members m WHERE m.workspace_id = w.id)
             FROM workspaces w ORDER BY w.name",
        )?;
        let rows: Vec<(String, String, f64, bool, i64)> = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })?
            .collect::<std::result::Result<_, _>>()?;

        rows.into_iter()
            .map(|(id, name, threshold, has_centroid, count)| {
                Ok(WorkspaceSummary {
                    id: Uuid::parse_str(&id)
                        .map_err(|e| StoreError::InvalidData(format!("bad workspace id {id}: {e}")))?,
                    name,
                    threshold: threshold as f32,
                    member_count: count.max(0) as usize,
                    has_centroid,
                })
            })
            .collect()
    }

    /// Ids of every workspace that currently lists `item_id` as a member.
    pub fn workspaces_containing(&self, item_id: &str) -> Result<Vec<Uuid>> {
        let mut stmt = self
            .conn
            .prepare("SELECT workspace_id FROM members WHERE item_id = ?1 ORDER BY workspace_id")?;
        let ids: Vec<String> = stmt
            .query_map([item_id], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        ids.iter()
            .map(|id| {
                Uuid::parse_str(id)
                    .map_err(|e| StoreError::InvalidData(format!("bad workspace id {id}: {e}")))
            })
            .collect()
    }

    // --- Delete ---

    /// Remove a workspace and its members. Returns false when it did not exist.
    pub fn delete_workspace(&self, id: Uuid) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM workspaces WHERE id = ?1", [id.to_string()])?;
        if deleted > 0 {
            tracing::info!("deleted workspace {id}");
        }
        Ok(deleted > 0)
    }
}

struct HeaderRow {
    id: String,
    name: String,
    threshold: f64,
    centroid: Option<Vec<u8>>,
    created_at: i64,
    updated_at: i64,
}

fn read_header(row: &Row<'_>) -> rusqlite::Result<HeaderRow> {
    Ok(HeaderRow {
        id: row.get(0)?,
        name: row.get(1)?,
        threshold: row.get(2)?,
        centroid: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

/// Little-endian f32 bytes.
pub fn encode_vector(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

pub fn decode_vector(bytes: &[u8]) -> Result<Vector> {
    if bytes.len() % 4 != 0 {
        return Err(StoreError::InvalidData(format!(
            "vector blob of {} bytes is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
