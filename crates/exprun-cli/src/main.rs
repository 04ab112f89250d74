//! exprun - Experiment results CLI
//!
//! The `exprun` command runs experiment result snapshots and manages sticky
//! bucket assignments.
//!
//! ## Commands
//!
//! - `run`: Execute a results run described by a fixture file
//! - `show`: Print a stored snapshot
//! - `latest`: Print the newest snapshot for an experiment
//! - `sticky`: Read or merge sticky bucket assignments in a local store

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use exprun_core::fixture::RunFixture;
use exprun_core::lifecycle::SnapshotLifecycle;
use exprun_core::{
    Collaborators, ExperimentResultsRunner, RunnerConfig, Snapshot, SnapshotStatus,
    SurrealSnapshotStore,
};
use exprun_state::SurrealHandle;
use sticky_bucket::{
    persist_assignments, FsLocalStorage, LocalStorageStore, MergeReport,
    StickyAssignmentsDocument, StickyBucketStore,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "exprun")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Experiment results orchestration and sticky bucketing", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a results snapshot from a fixture file
    Run {
        /// Path to the run fixture (JSON)
        #[arg(short, long)]
        fixture: PathBuf,

        /// Per-query deadline in seconds (overrides EXPRUN_QUERY_TIMEOUT_SECS)
        #[arg(long)]
        query_timeout: Option<u64>,

        /// Whole-run deadline in seconds (overrides EXPRUN_RUN_TIMEOUT_SECS)
        #[arg(long)]
        run_timeout: Option<u64>,

        /// Write the snapshot result as JSON to this path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show a stored snapshot
    Show {
        /// Organization that owns the snapshot
        #[arg(long)]
        org: String,

        /// Snapshot ID
        snapshot: String,
    },

    /// Show the newest snapshot for an experiment
    Latest {
        /// Organization that owns the experiment
        #[arg(long)]
        org: String,

        /// Experiment ID
        experiment: String,
    },

    /// Sticky bucket assignments in a local directory store
    Sticky {
        #[command(subcommand)]
        action: StickyAction,
    },
}

#[derive(Subcommand)]
enum StickyAction {
    /// Print the stored assignments for an attribute
    Get {
        /// Store directory
        #[arg(long)]
        dir: PathBuf,

        /// Key prefix (default: gbStickyBuckets::)
        #[arg(long)]
        prefix: Option<String>,

        /// Attribute name, e.g. `id`
        attribute: String,

        /// Attribute value
        value: String,
    },

    /// Merge new assignments into the stored document
    Save {
        /// Store directory
        #[arg(long)]
        dir: PathBuf,

        /// Key prefix (default: gbStickyBuckets::)
        #[arg(long)]
        prefix: Option<String>,

        /// Attribute name, e.g. `id`
        attribute: String,

        /// Attribute value
        value: String,

        /// Assignments as `key=variation`
        #[arg(short, long = "assign", value_parser = parse_assignment, required = true)]
        assignments: Vec<(String, String)>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    exprun_core::telemetry::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            fixture,
            query_timeout,
            run_timeout,
            output,
        } => {
            let mut config = RunnerConfig::from_env().context("Invalid runner configuration")?;
            if let Some(secs) = query_timeout {
                config = config.with_query_timeout(Duration::from_secs(secs));
            }
            if let Some(secs) = run_timeout {
                config = config.with_run_timeout(Duration::from_secs(secs));
            }
            let handle = connect().await?;
            let snapshot = cmd_run(handle, &fixture, config, output.as_deref()).await?;
            if snapshot.status == SnapshotStatus::Error {
                anyhow::bail!("Snapshot {} finished with an error", snapshot.id);
            }
            Ok(())
        }
        Commands::Show { org, snapshot } => cmd_show(connect().await?, &org, &snapshot).await,
        Commands::Latest { org, experiment } => {
            cmd_latest(connect().await?, &org, &experiment).await
        }
        Commands::Sticky { action } => match action {
            StickyAction::Get {
                dir,
                prefix,
                attribute,
                value,
            } => {
                cmd_sticky_get(&dir, prefix.as_deref(), &attribute, &value)
                    .await
                    .map(|_| ())
            }
            StickyAction::Save {
                dir,
                prefix,
                attribute,
                value,
                assignments,
            } => {
                let assignments: BTreeMap<String, String> = assignments.into_iter().collect();
                cmd_sticky_save(&dir, prefix.as_deref(), &attribute, &value, &assignments)
                    .await
                    .map(|_| ())
            }
        },
    }
}

async fn connect() -> Result<Arc<SurrealHandle>> {
    let handle = SurrealHandle::setup_from_env()
        .await
        .context("Failed to connect to exprun database")?;
    Ok(Arc::new(handle))
}

fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, variation)) if !key.is_empty() && !variation.is_empty() => {
            Ok((key.to_string(), variation.to_string()))
        }
        _ => Err(format!("expected key=variation, got '{raw}'")),
    }
}

/// Execute a results run from a fixture file
async fn cmd_run(
    handle: Arc<SurrealHandle>,
    fixture: &Path,
    config: RunnerConfig,
    output: Option<&Path>,
) -> Result<Snapshot> {
    let fixture = RunFixture::load(fixture)
        .await
        .with_context(|| format!("Failed to load fixture {}", fixture.display()))?;
    let (request, integration, catalog) = fixture.into_parts();

    info!(
        experiment = %request.settings.experiment_id,
        analyses = request.analyses.len(),
        "Starting results run"
    );

    let runner = ExperimentResultsRunner::new(
        Arc::new(SurrealSnapshotStore::new(handle)),
        integration,
        Collaborators::from_shared(catalog),
    )
    .with_config(config);

    let snapshot = runner.run(request).await.context("Results run failed")?;
    print_snapshot(&snapshot);

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&snapshot.result())?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Result written to {}", path.display());
    }

    Ok(snapshot)
}

/// Show a stored snapshot
async fn cmd_show(handle: Arc<SurrealHandle>, org: &str, snapshot_id: &str) -> Result<()> {
    let lifecycle = SnapshotLifecycle::new(Arc::new(SurrealSnapshotStore::new(handle)));
    let snapshot = lifecycle.load(org, snapshot_id).await?;
    print_snapshot(&snapshot);
    Ok(())
}

/// Show the newest snapshot for an experiment
async fn cmd_latest(handle: Arc<SurrealHandle>, org: &str, experiment_id: &str) -> Result<()> {
    let lifecycle = SnapshotLifecycle::new(Arc::new(SurrealSnapshotStore::new(handle)));
    match lifecycle.latest_for_experiment(org, experiment_id).await? {
        Some(snapshot) => print_snapshot(&snapshot),
        None => println!("No snapshots for experiment {}", experiment_id),
    }
    Ok(())
}

fn print_snapshot(snapshot: &Snapshot) {
    println!("Snapshot:   {}", snapshot.id);
    println!("Experiment: {}", snapshot.experiment_id);
    println!("Status:     {}", snapshot.status.as_str());
    if let Some(error) = &snapshot.error {
        println!("Error:      {}", error);
    }

    if !snapshot.queries.is_empty() {
        println!();
        println!("Queries:");
        for query in &snapshot.queries {
            let duration = query
                .duration_ms()
                .map(|ms| format!(" ({}ms)", ms))
                .unwrap_or_default();
            match &query.error {
                Some(error) => println!("  {:?} {}{}: {}", query.status, query.name, duration, error),
                None => println!("  {:?} {}{}", query.status, query.name, duration),
            }
        }
    }

    if !snapshot.unknown_variations.is_empty() {
        println!();
        println!("Unknown variations: {}", snapshot.unknown_variations.join(", "));
    }
    if snapshot.multiple_exposures > 0 {
        println!("Multiple exposures: {}", snapshot.multiple_exposures);
    }
    if let Some(health) = &snapshot.health {
        println!("SRM p-value:        {:.6}", health.traffic.overall.srm);
    }
}

fn open_sticky_store(dir: &Path, prefix: Option<&str>) -> Result<LocalStorageStore> {
    let storage = FsLocalStorage::new(dir)
        .with_context(|| format!("Failed to open sticky store at {}", dir.display()))?;
    let store = LocalStorageStore::new(Arc::new(storage));
    Ok(match prefix {
        Some(prefix) => store.with_prefix(prefix),
        None => store,
    })
}

/// Print the stored assignments for one attribute
async fn cmd_sticky_get(
    dir: &Path,
    prefix: Option<&str>,
    attribute: &str,
    value: &str,
) -> Result<Option<StickyAssignmentsDocument>> {
    let store = open_sticky_store(dir, prefix)?;
    let doc = store.get_assignments(attribute, value).await;
    match &doc {
        Some(doc) => println!("{}", serde_json::to_string_pretty(doc)?),
        None => println!("No assignments for {}={}", attribute, value),
    }
    Ok(doc)
}

/// Merge assignments into the stored document for one attribute
async fn cmd_sticky_save(
    dir: &Path,
    prefix: Option<&str>,
    attribute: &str,
    value: &str,
    assignments: &BTreeMap<String, String>,
) -> Result<MergeReport> {
    let store = open_sticky_store(dir, prefix)?;
    let report = persist_assignments(&store, attribute, value, assignments).await;

    for conflict in &report.conflicts {
        println!(
            "! {}: kept {} (rejected {})",
            conflict.key, conflict.kept, conflict.rejected
        );
    }
    match report.ack {
        Some(ack) if ack.is_stored() => println!(
            "Saved {} assignment(s) for {}",
            report.document.assignments.len(),
            report.document.key()
        ),
        Some(_) => anyhow::bail!("Sticky store rejected the write for {}", report.document.key()),
        None => println!("No new assignments for {}", report.document.key()),
    }

    Ok(report)
}
