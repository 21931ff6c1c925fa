//! Change-event pipeline: embed outside the lock, then mutate and persist
//! one workspace at a time.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use cohort_core::{
    ChangeEvent, EmbedError, Embedder, IncrementalAggregator, MembershipChange, Vector,
    WorkspaceState,
};
use cohort_store::Store;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Precomputed vectors keyed by item id, read from a JSON object.
pub struct TableEmbedder {
    table: HashMap<String, Vector>,
}

impl TableEmbedder {
    pub fn new(table: HashMap<String, Vector>) -> Self {
        Self { table }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let table = serde_json::from_str(json).context("embeddings must map item ids to arrays")?;
        Ok(Self::new(table))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json(&json)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl Embedder for TableEmbedder {
    fn embed(&self, item_id: &str) -> Result<Vector, EmbedError> {
        self.table
            .get(item_id)
            .cloned()
            .ok_or_else(|| EmbedError::NotFound {
                item_id: item_id.to_string(),
            })
    }
}

pub type WorkspaceHandle = Arc<Mutex<WorkspaceState>>;

#[derive(Default)]
struct Slots {
    by_name: HashMap<String, Uuid>,
    by_id: HashMap<Uuid, WorkspaceHandle>,
}

/// One lock per workspace. Mutations of the same workspace are serialized;
/// different workspaces proceed independently and only contend on the
/// short store write.
pub struct WorkspaceRegistry {
    store: Mutex<Store>,
    aggregator: IncrementalAggregator,
    slots: Mutex<Slots>,
}

impl WorkspaceRegistry {
    pub fn new(store: Store, aggregator: IncrementalAggregator) -> Self {
        Self {
            store: Mutex::new(store),
            aggregator,
            slots: Mutex::new(Slots::default()),
        }
    }

    /// Handle for the named workspace, loading it from the store on first use.
    pub async fn handle(&self, name: &str) -> Result<WorkspaceHandle> {
        let mut slots = self.slots.lock().await;
        if let Some(id) = slots.by_name.get(name)
            && let Some(handle) = slots.by_id.get(id)
        {
            return Ok(Arc::clone(handle));
        }

        let state = self
            .store
            .lock()
            .await
            .require_workspace(name)
            .with_context(|| format!("failed to load workspace '{name}'"))?;
        let id = state.id;
        let handle = Arc::new(Mutex::new(state));
        slots.by_name.insert(name.to_string(), id);
        slots.by_id.insert(id, Arc::clone(&handle));
        Ok(handle)
    }

    /// Apply one event under the workspace lock and persist if anything moved.
    pub async fn apply(
        &self,
        handle: &WorkspaceHandle,
        event: ChangeEvent,
        embedding: Option<Vector>,
        force_add: bool,
    ) -> Result<MembershipChange> {
        let mut state = handle.lock().await;
        let change = self
            .aggregator
            .apply(&mut state, event, embedding, force_add);
        if change.is_mutation() {
            self.store
                .lock()
                .await
                .save_workspace(&state)
                .with_context(|| format!("failed to save workspace '{}'", state.name))?;
        }
        Ok(change)
    }

    pub fn into_store(self) -> Store {
        self.store.into_inner()
    }
}

/// Produce the vector an event needs on the blocking pool. Embedder
/// failures are logged and yield `None`; the aggregator then decides.
pub async fn embed_for(embedder: Arc<dyn Embedder>, event: &ChangeEvent) -> Option<Vector> {
    if !event.needs_embedding() {
        return None;
    }
    let item_id = event.id().to_string();
    let task = tokio::task::spawn_blocking(move || embedder.embed(&item_id));
    match task.await {
        Ok(Ok(vector)) => Some(vector),
        Ok(Err(e)) => {
            tracing::warn!("{e}");
            None
        }
        Err(e) => {
            tracing::warn!("embedder task failed for {}: {e}", event.id());
            None
        }
    }
}

/// Run a batch of events against one workspace, in order.
pub async fn run_events(
    registry: &WorkspaceRegistry,
    workspace: &str,
    embedder: Arc<dyn Embedder>,
    events: Vec<ChangeEvent>,
    force_add: bool,
) -> Result<Vec<MembershipChange>> {
    let handle = registry.handle(workspace).await?;
    let mut changes = Vec::with_capacity(events.len());
    for event in events {
        let embedding = embed_for(Arc::clone(&embedder), &event).await;
        changes.push(registry.apply(&handle, event, embedding, force_add).await?);
    }
    tracing::info!(workspace, events = changes.len(), "applied change events");
    Ok(changes)
}

/// Parse a JSON-lines event feed. Blank lines are ignored; malformed lines
/// are logged and skipped.
pub fn parse_events(jsonl: &str) -> Vec<ChangeEvent> {
    jsonl
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(n, line)| match serde_json::from_str(line) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!("skipping event on line {}: {e}", n + 1);
                None
            }
        })
        .collect()
}
