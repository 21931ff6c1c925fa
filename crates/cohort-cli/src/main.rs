mod pipeline;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use cohort_core::{
    Cluster, ClusteringEngine, ClusteringError, Embedder, IncrementalAggregator, Item,
    MAX_UI_THRESHOLD, MIN_UI_THRESHOLD, MembershipChange, WorkspaceState, fit_dimension,
};
use cohort_store::{CohortConfig, CohortHome, Store};
use serde::Serialize;

use crate::pipeline::{TableEmbedder, WorkspaceRegistry, parse_events, run_events};

#[derive(Parser)]
#[command(name = "cohort", about = "Similarity clustering and incremental workspaces")]
struct Cli {
    /// Data directory (default: $COHORT_DATA_DIR or ~/.cohort)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Batch-cluster items from a JSON file
    Cluster {
        /// JSON array of {"id": ..., "embedding": [...] | null}
        items: PathBuf,

        /// Merge threshold (default: config default_threshold)
        #[arg(long)]
        threshold: Option<f32>,

        /// Accept thresholds outside the usual range
        #[arg(long)]
        allow_any_threshold: bool,

        /// Print clusters as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage persisted workspaces
    Workspace {
        #[command(subcommand)]
        action: WorkspaceCommand,
    },

    /// Feed change events into a workspace
    Apply {
        /// Workspace name
        name: String,

        /// JSON-lines file of change events
        #[arg(long)]
        events: PathBuf,

        /// JSON object mapping item ids to vectors
        #[arg(long)]
        embeddings: PathBuf,

        /// Admit items regardless of similarity
        #[arg(long)]
        force: bool,
    },

    /// Export all workspaces to a JSON file
    Export {
        /// Output file path
        path: PathBuf,
    },

    /// Import workspaces from a JSON file
    Import {
        /// Input file path
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum WorkspaceCommand {
    /// Create an empty workspace
    Create {
        name: String,

        #[arg(long)]
        threshold: Option<f32>,

        #[arg(long)]
        allow_any_threshold: bool,
    },

    /// List workspaces
    List,

    /// Show a workspace and its members
    Show {
        name: String,

        #[arg(long)]
        json: bool,
    },

    /// Delete a workspace
    Delete { name: String },

    /// Change the threshold and report the resulting clusters
    Threshold {
        name: String,

        threshold: f32,

        #[arg(long)]
        allow_any_threshold: bool,
    },

    /// Batch-cluster the workspace's members at its threshold
    Recluster { name: String },
}

fn open_home(cli: &Cli) -> Result<CohortHome> {
    CohortHome::open(cli.data_dir.as_deref()).context("failed to open data directory")
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Cluster {
            items,
            threshold,
            allow_any_threshold,
            json,
        } => cmd_cluster(&cli, items, *threshold, *allow_any_threshold, *json).await,
        Commands::Workspace { action } => cmd_workspace(&cli, action),
        Commands::Apply {
            name,
            events,
            embeddings,
            force,
        } => cmd_apply(&cli, name, events, embeddings, *force).await,
        Commands::Export { path } => cmd_export(&cli, path),
        Commands::Import { path } => cmd_import(&cli, path),
    }
}

fn validate_threshold(threshold: f32, allow_any: bool) -> Result<f32> {
    if !threshold.is_finite() {
        bail!("threshold must be a finite number");
    }
    if !allow_any && !(MIN_UI_THRESHOLD..=MAX_UI_THRESHOLD).contains(&threshold) {
        bail!(
            "threshold {threshold} is outside [{MIN_UI_THRESHOLD}, {MAX_UI_THRESHOLD}] \
             (pass --allow-any-threshold to override)"
        );
    }
    Ok(threshold)
}

#[derive(Serialize)]
struct ClusterReport<'a> {
    id: String,
    size: usize,
    coherence: f32,
    members: Vec<&'a str>,
}

impl<'a> ClusterReport<'a> {
    fn from_cluster(cluster: &'a Cluster) -> Self {
        Self {
            id: cluster.id.to_string(),
            size: cluster.len(),
            coherence: cluster.coherence(),
            members: cluster.members().iter().map(|m| m.id.as_str()).collect(),
        }
    }
}

fn print_clusters(clusters: &[Cluster], json: bool) -> Result<()> {
    if json {
        let reports: Vec<_> = clusters.iter().map(ClusterReport::from_cluster).collect();
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }
    for (n, cluster) in clusters.iter().enumerate() {
        println!(
            "cluster {}: {} items, coherence {:.3} ({})",
            n + 1,
            cluster.len(),
            cluster.coherence(),
            cluster.id
        );
        for member in cluster.members() {
            println!("  {}", member.id);
        }
    }
    Ok(())
}

fn read_items(path: &Path, config: &CohortConfig) -> Result<Vec<Item>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let items: Vec<Item> = serde_json::from_str(&json)
        .with_context(|| format!("{} is not a JSON array of items", path.display()))?;
    Ok(items
        .into_iter()
        .map(|item| Item {
            embedding: item.embedding.map(|v| fit_dimension(v, config.dimension)),
            ..item
        })
        .collect())
}

async fn cmd_cluster(
    cli: &Cli,
    path: &Path,
    threshold: Option<f32>,
    allow_any: bool,
    json: bool,
) -> Result<()> {
    let home = open_home(cli)?;
    let threshold = validate_threshold(
        threshold.unwrap_or(home.config().default_threshold),
        allow_any,
    )?;
    let items = read_items(path, home.config())?;
    tracing::info!("clustering {} items at threshold {threshold}", items.len());

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    let task = tokio::task::spawn_blocking(move || {
        ClusteringEngine::new().cluster_with_cancel(items, threshold, &flag)
    });
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.store(true, Ordering::Relaxed);
        }
    });
    let result = task.await.context("clustering task failed")?;
    watcher.abort();

    match result {
        Ok(clusters) => print_clusters(&clusters, json),
        Err(ClusteringError::NoEmbeddingsFound { .. }) => {
            println!("no clusters yet");
            Ok(())
        }
        Err(e) => Err(e).context("clustering failed"),
    }
}

fn cmd_workspace(cli: &Cli, action: &WorkspaceCommand) -> Result<()> {
    let home = open_home(cli)?;
    let (store, config) = home.into_parts();
    let aggregator = IncrementalAggregator::with_dimension(config.dimension);

    match action {
        WorkspaceCommand::Create {
            name,
            threshold,
            allow_any_threshold,
        } => {
            let threshold = validate_threshold(
                threshold.unwrap_or(config.default_threshold),
                *allow_any_threshold,
            )?;
            if store.find_workspace(name)?.is_some() {
                bail!("workspace '{name}' already exists");
            }
            let state = WorkspaceState::new(name, threshold);
            store
                .save_workspace(&state)
                .context("failed to save workspace")?;
            println!(
                "created workspace {name} ({}) threshold {threshold:.2}",
                state.id
            );
            Ok(())
        }
        WorkspaceCommand::List => {
            let summaries = store.list_workspaces()?;
            if summaries.is_empty() {
                println!("no workspaces");
            }
            for ws in summaries {
                println!(
                    "{}\t{} members\tthreshold {:.2}\t{}",
                    ws.name,
                    ws.member_count,
                    ws.threshold,
                    if ws.has_centroid { "centroid" } else { "empty" }
                );
            }
            Ok(())
        }
        WorkspaceCommand::Show { name, json } => {
            let state = load_workspace(&store, name)?;
            if *json {
                println!(
                    "{}",
                    cohort_core::export_json(std::slice::from_ref(&state))?
                );
                return Ok(());
            }
            println!("name:       {}", state.name);
            println!("id:         {}", state.id);
            println!("threshold:  {:.2}", state.threshold);
            println!("members:    {}", state.len());
            match state.centroid() {
                Some(c) => println!("centroid:   {} dims", c.len()),
                None => println!("centroid:   none"),
            }
            for member in state.members() {
                println!("  {:.3}  {}", member.similarity, member.item_id);
            }
            Ok(())
        }
        WorkspaceCommand::Delete { name } => {
            let state = load_workspace(&store, name)?;
            store.delete_workspace(state.id)?;
            println!("deleted workspace {name}");
            Ok(())
        }
        WorkspaceCommand::Threshold {
            name,
            threshold,
            allow_any_threshold,
        } => {
            let threshold = validate_threshold(*threshold, *allow_any_threshold)?;
            let mut state = load_workspace(&store, name)?;
            let previous = aggregator.set_threshold(&mut state, threshold);
            store
                .save_workspace(&state)
                .context("failed to save workspace")?;
            println!("threshold {previous:.2} -> {threshold:.2}");
            if state.is_empty() {
                println!("workspace is empty");
                return Ok(());
            }
            recluster_and_print(&aggregator, &state)
        }
        WorkspaceCommand::Recluster { name } => {
            let state = load_workspace(&store, name)?;
            recluster_and_print(&aggregator, &state)
        }
    }
}

fn load_workspace(store: &Store, name: &str) -> Result<WorkspaceState> {
    store
        .require_workspace(name)
        .with_context(|| format!("failed to load workspace '{name}'"))
}

fn recluster_and_print(aggregator: &IncrementalAggregator, state: &WorkspaceState) -> Result<()> {
    match aggregator.recluster(state, &ClusteringEngine::new()) {
        Ok(clusters) => {
            println!(
                "{} clusters at threshold {:.2}",
                clusters.len(),
                state.threshold
            );
            print_clusters(&clusters, false)
        }
        Err(ClusteringError::NoEmbeddingsFound { .. }) => {
            println!("no clusters yet");
            Ok(())
        }
        Err(e) => Err(e).context("reclustering failed"),
    }
}

fn describe(change: &MembershipChange) -> String {
    match change {
        MembershipChange::Seeded { item_id } => format!("seeded    {item_id}"),
        MembershipChange::Added {
            item_id,
            similarity,
        } => format!("added     {item_id} ({similarity:.3})"),
        MembershipChange::Updated {
            item_id,
            similarity,
        } => format!("updated   {item_id} ({similarity:.3})"),
        MembershipChange::Renamed {
            old_id,
            item_id,
            similarity,
            replaced,
        } => {
            let suffix = if *replaced { ", replaced" } else { "" };
            format!("renamed   {old_id} -> {item_id} ({similarity:.3}{suffix})")
        }
        MembershipChange::Removed { item_id } => format!("removed   {item_id}"),
        MembershipChange::Rejected {
            item_id,
            similarity,
            evicted,
        } => {
            let suffix = if *evicted { ", evicted" } else { "" };
            format!("rejected  {item_id} ({similarity:.3}{suffix})")
        }
        MembershipChange::Unchanged { item_id } => format!("unchanged {item_id}"),
    }
}

async fn cmd_apply(
    cli: &Cli,
    name: &str,
    events_path: &Path,
    embeddings_path: &Path,
    force: bool,
) -> Result<()> {
    let home = open_home(cli)?;
    let (store, config) = home.into_parts();

    let feed = std::fs::read_to_string(events_path)
        .with_context(|| format!("failed to read {}", events_path.display()))?;
    let events = parse_events(&feed);
    let embedder: Arc<dyn Embedder> = Arc::new(TableEmbedder::from_file(embeddings_path)?);

    // A first load into an empty workspace follows force_add_on_import.
    let first_load = load_workspace(&store, name)?.is_empty();
    let force = force || (first_load && config.force_add_on_import);

    let registry = WorkspaceRegistry::new(
        store,
        IncrementalAggregator::with_dimension(config.dimension),
    );
    let changes = run_events(&registry, name, embedder, events, force).await?;
    for change in &changes {
        println!("{}", describe(change));
    }

    let handle = registry.handle(name).await?;
    let state = handle.lock().await;
    println!("{}: {} members", state.name, state.len());
    Ok(())
}

fn cmd_export(cli: &Cli, path: &Path) -> Result<()> {
    let home = open_home(cli)?;
    home.store()
        .export_json_file(path)
        .context("failed to export workspaces")?;
    println!("exported to {}", path.display());
    Ok(())
}

fn cmd_import(cli: &Cli, path: &Path) -> Result<()> {
    let home = open_home(cli)?;
    let count = home
        .store()
        .import_json_file(path)
        .context("failed to import JSON")?;
    println!("imported {count} workspaces from {}", path.display());
    Ok(())
}
