//! Canvas storage operator CLI.
//!
//! Provides the `canvasctl` binary for inspecting and maintaining canvases
//! stored in a SQLite metadata database and a filesystem blob directory.
//!
//! Storage locations come from flags or the environment:
//! - `CANVAS_DB_PATH`: SQLite database file path (default: "canvas.db")
//! - `CANVAS_BLOB_DIR`: blob root directory (default: "./blobs")
//!
//! Retry and promotion settings are read from the `CANVAS_*` variables
//! documented on `StorageConfig::from_env`. Logs go to stderr, filtered by
//! `RUST_LOG`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use canvas_core::id::{CanvasId, CustomerId, NodeId, VersionId};
use canvas_core::{Canvas, CanvasScope, CoreError, Edge, Node};
use canvas_storage::{
    CanvasCoordinator, FsBlobStore, SqliteMetadataStore, StorageConfig, StorageError,
};

/// Canvas storage operator tools.
#[derive(Parser)]
#[command(name = "canvasctl", about = "Inspect and maintain versioned canvases")]
struct Cli {
    /// Path to the SQLite metadata database.
    #[arg(long, env = "CANVAS_DB_PATH", default_value = "canvas.db", global = true)]
    db: String,

    /// Root directory of the blob store.
    #[arg(long, env = "CANVAS_BLOB_DIR", default_value = "./blobs", global = true)]
    blobs: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// The canvas a command operates on.
#[derive(Args)]
struct Target {
    /// Customer id.
    #[arg(long)]
    customer: String,

    /// Canvas id.
    #[arg(long)]
    canvas: String,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Create an empty draft canvas.
    Create {
        #[command(flatten)]
        target: Target,

        /// Display name.
        #[arg(long, default_value = "untitled")]
        name: String,
    },

    /// Print one version of a canvas as JSON.
    Show {
        #[command(flatten)]
        target: Target,

        #[arg(long, default_value = "draft")]
        version: String,
    },

    /// List finalized versions, draft first.
    Versions {
        #[command(flatten)]
        target: Target,
    },

    /// Promote the draft to a new immutable version.
    Promote {
        #[command(flatten)]
        target: Target,
    },

    /// Print the dependency processing order.
    Order {
        #[command(flatten)]
        target: Target,

        #[arg(long, default_value = "draft")]
        version: String,

        /// Print batches of independent nodes, one batch per line.
        #[arg(long)]
        levels: bool,
    },

    /// Delete one version, or every version when none is given.
    Delete {
        #[command(flatten)]
        target: Target,

        #[arg(long)]
        version: Option<String>,
    },

    /// Remove copies left by unfinished promotions.
    Gc {
        #[command(flatten)]
        target: Target,
    },

    /// Replace the draft's nodes and edges with a JSON document.
    Apply {
        #[command(flatten)]
        target: Target,

        /// JSON file with `nodes`, `edges` and an optional `name`.
        #[arg(short, long)]
        file: PathBuf,
    },
}

/// Input of `canvasctl apply`.
#[derive(Deserialize)]
struct CanvasDocument {
    name: Option<String>,
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    edges: Vec<Edge>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    tracing::debug!(db = %cli.db, blobs = %cli.blobs.display(), "opening storage");
    let coordinator = match open(&cli.db, &cli.blobs) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: failed to open storage: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Create { target, name } => run_create(&coordinator, &target, &name),
        Commands::Show { target, version } => run_show(&coordinator, &target, &version),
        Commands::Versions { target } => run_versions(&coordinator, &target),
        Commands::Promote { target } => run_promote(&coordinator, &target),
        Commands::Order {
            target,
            version,
            levels,
        } => run_order(&coordinator, &target, &version, levels),
        Commands::Delete { target, version } => run_delete(&coordinator, &target, version.as_deref()),
        Commands::Gc { target } => run_gc(&coordinator, &target),
        Commands::Apply { target, file } => run_apply(&coordinator, &target, &file),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(exit_code(&e));
    }
}

fn open(db_path: &str, blob_dir: &Path) -> Result<CanvasCoordinator, StorageError> {
    let config = StorageConfig::from_env()?;
    let metadata = SqliteMetadataStore::new(db_path)?;
    let blobs = FsBlobStore::new(blob_dir)?;
    CanvasCoordinator::new(
        Arc::new(metadata),
        Arc::new(blobs),
        config,
        Default::default(),
    )
}

/// Exit codes: 0 = success, 1 = any other failure, 2 = immutable version,
/// 3 = dependency cycle.
fn exit_code(err: &StorageError) -> i32 {
    match err {
        StorageError::ImmutableVersion(_) => 2,
        StorageError::Core(CoreError::CycleDetected { .. }) => 3,
        _ => 1,
    }
}

impl Target {
    fn ids(&self) -> Result<(CustomerId, CanvasId), StorageError> {
        Ok((
            CustomerId::new(self.customer.as_str())?,
            CanvasId::new(self.canvas.as_str())?,
        ))
    }

    fn scope(&self, version: &str) -> Result<CanvasScope, StorageError> {
        let (customer, canvas) = self.ids()?;
        Ok(CanvasScope::new(customer, canvas, VersionId::new(version)?))
    }
}

fn not_found(scope: &CanvasScope) -> StorageError {
    StorageError::CanvasNotFound {
        customer: scope.customer.clone(),
        canvas: scope.canvas.clone(),
    }
}

fn run_create(c: &CanvasCoordinator, target: &Target, name: &str) -> Result<(), StorageError> {
    let (customer, canvas) = target.ids()?;
    let created = c.create_canvas(&customer, &canvas, name)?;
    println!("{}", created.scope);
    Ok(())
}

fn run_show(c: &CanvasCoordinator, target: &Target, version: &str) -> Result<(), StorageError> {
    let scope = target.scope(version)?;
    let canvas = c.get_canvas(&scope)?.ok_or_else(|| not_found(&scope))?;
    println!("{}", serde_json::to_string_pretty(&canvas)?);
    Ok(())
}

fn run_versions(c: &CanvasCoordinator, target: &Target) -> Result<(), StorageError> {
    let (customer, canvas) = target.ids()?;
    for info in c.list_version_info(&customer, &canvas)? {
        match info.created_at {
            Some(created_at) => println!("{}\t{}", info.version, created_at.to_rfc3339()),
            None => println!("{}\t-", info.version),
        }
    }
    Ok(())
}

fn run_promote(c: &CanvasCoordinator, target: &Target) -> Result<(), StorageError> {
    let (customer, canvas) = target.ids()?;
    let version = c.create_version(&customer, &canvas)?;
    println!("{}", version);
    Ok(())
}

fn run_order(
    c: &CanvasCoordinator,
    target: &Target,
    version: &str,
    levels: bool,
) -> Result<(), StorageError> {
    let scope = target.scope(version)?;
    if levels {
        let batches = c.processing_levels(&scope)?.ok_or_else(|| not_found(&scope))?;
        for batch in batches {
            println!("{}", join_ids(&batch));
        }
    } else {
        let order = c.processing_order(&scope)?.ok_or_else(|| not_found(&scope))?;
        for id in order {
            println!("{}", id);
        }
    }
    Ok(())
}

fn join_ids(ids: &[NodeId]) -> String {
    ids.iter()
        .map(NodeId::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

fn run_delete(
    c: &CanvasCoordinator,
    target: &Target,
    version: Option<&str>,
) -> Result<(), StorageError> {
    match version {
        Some(version) => c.delete_canvas(&target.scope(version)?),
        None => {
            let (customer, canvas) = target.ids()?;
            c.delete_canvas_all_versions(&customer, &canvas)
        }
    }
}

fn run_gc(c: &CanvasCoordinator, target: &Target) -> Result<(), StorageError> {
    let (customer, canvas) = target.ids()?;
    let report = c.collect_garbage(&customer, &canvas)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_apply(c: &CanvasCoordinator, target: &Target, file: &Path) -> Result<(), StorageError> {
    let scope = target.scope(canvas_core::DRAFT)?;
    let raw = fs::read_to_string(file)?;
    let document: CanvasDocument = serde_json::from_str(&raw)?;

    let mut canvas = match c.get_canvas(&scope)? {
        Some(existing) => existing,
        None => Canvas::new(scope.clone(), "untitled"),
    };
    if let Some(name) = document.name {
        canvas.name = name;
    }
    canvas.nodes = document.nodes;
    canvas.edges = document.edges;

    let saved = c.save_canvas(&canvas)?;
    println!(
        "{}: {} nodes, {} edges",
        saved.scope,
        saved.nodes.len(),
        saved.edges.len()
    );
    Ok(())
}
