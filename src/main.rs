//! hypercube - command line driver for the attribute store and memory loop
//!
//! Usage:
//!   hypercube populate --count 1000     - Store synthetic brand records
//!   hypercube store '{"sector":"ai"}'   - Store one record
//!   hypercube query '{"sector":"ai"}'   - Query records
//!   hypercube ingest '{...}' --tag x    - Ingest a memory
//!   hypercube run --cycles 6            - Drive the memory loop periodically
//!
//! State lives in one snapshot file, loaded on start and saved after every
//! mutating command.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use hypercube::backup::{self, SnapshotArchive};
use hypercube::config::{self, HypercubeConfig};
use hypercube::errors::HypercubeError;
use hypercube::identity::Identity;
use hypercube::memory::{MemoryLoop, Phase, RecallRequest};
use hypercube::metrics;
use hypercube::populate::BrandGenerator;
use hypercube::store::{AttributeStore, Dimension};
use hypercube::tracing_setup;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

#[derive(Parser)]
#[command(name = "hypercube")]
#[command(about = "40-slot attribute store with a staged memory loop")]
#[command(version)]
struct Cli {
    /// Snapshot file holding the state between invocations
    #[arg(long, global = true, env = "HYPERCUBE_SNAPSHOT_PATH")]
    snapshot: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store synthetic brand records covering all 40 slots
    Populate {
        #[arg(long, default_value_t = 100)]
        count: usize,

        /// Seed for reproducible output
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Store one record from a flat JSON object of slot names (plus `value`)
    Store { record: String },

    /// Query records
    Query {
        /// JSON object mapping slot names to values (a list for `in`)
        #[arg(default_value = "{}")]
        filters: String,

        /// Operator for a slot, as `slot=op` (op: ==, >, <, >=, <=, in)
        #[arg(long = "op", value_name = "SLOT=OP")]
        operators: Vec<String>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Ingest a memory from JSON content
    Ingest {
        content: String,

        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Run memory loop cycles back to back
    Cycle {
        #[arg(long, default_value_t = 1)]
        count: usize,
    },

    /// Run memory loop cycles at the configured interval
    Run {
        #[arg(long, default_value_t = 6)]
        cycles: usize,

        /// Seconds between cycles (default: HYPERCUBE_CYCLE_INTERVAL)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Recall memories by identity, tags or phase
    Recall {
        #[arg(long, conflicts_with_all = ["tags", "phase"])]
        identity: Option<String>,

        #[arg(long = "tag")]
        tags: Vec<String>,

        #[arg(long, conflicts_with = "tags")]
        phase: Option<String>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show generation snapshots
    Wisdom {
        #[arg(long)]
        generation: Option<u64>,
    },

    /// Show store and memory loop statistics
    Stats,

    /// Print Prometheus metrics collected during this invocation
    Metrics,

    /// List the 40 attribute slots with their axis and category
    Dimensions,

    /// Manage the snapshot archive
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },

    /// Describe configuration environment variables
    EnvHelp,
}

#[derive(Subcommand)]
enum SnapshotAction {
    /// Archive the current state
    Save,
    /// List archived snapshots
    List,
    /// Check an archived snapshot's checksum
    Verify { id: u64 },
    /// Load the newest archived snapshot into the working state
    RestoreLatest,
    /// Keep only the newest snapshots
    Purge {
        #[arg(long)]
        keep: Option<usize>,
    },
}

// =============================================================================
// RUNTIME
// =============================================================================

struct Runtime {
    config: HypercubeConfig,
    snapshot_path: PathBuf,
    store: Arc<AttributeStore>,
    engine: MemoryLoop,
}

impl Runtime {
    fn open(config: HypercubeConfig, snapshot: Option<PathBuf>) -> Result<Self> {
        let snapshot_path = snapshot.unwrap_or_else(|| config.snapshot_path.clone());
        let store = Arc::new(AttributeStore::new(config.store_config())?);
        let engine = MemoryLoop::new(config.loop_config())?.with_store(Arc::clone(&store));

        match backup::load_from_file(&store, &engine, &snapshot_path) {
            Ok(metadata) => info!(
                records = metadata.record_count,
                memories = metadata.memory_count,
                "Loaded snapshot"
            ),
            Err(HypercubeError::NotFound(_)) => {
                info!(path = %snapshot_path.display(), "No snapshot yet, starting empty")
            }
            Err(e) => return Err(e).context("failed to load snapshot"),
        }

        Ok(Self {
            config,
            snapshot_path,
            store,
            engine,
        })
    }

    fn save(&self) -> Result<()> {
        backup::save_to_file(&self.store, &self.engine, &self.snapshot_path)
            .context("failed to save snapshot")?;
        Ok(())
    }

    fn archive(&self) -> Result<SnapshotArchive> {
        Ok(SnapshotArchive::new(self.config.archive_dir.clone())?)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_operators(raw: &[String]) -> Result<HashMap<String, String>> {
    raw.iter()
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(slot, op)| (slot.trim().to_string(), op.trim().to_string()))
                .ok_or_else(|| anyhow!("operator must look like slot=op, got '{entry}'"))
        })
        .collect()
}

fn print_dimensions() -> Result<()> {
    let slots: Vec<serde_json::Value> = Dimension::ALL
        .iter()
        .map(|d| {
            serde_json::json!({
                "axis": d.axis(),
                "name": d.name(),
                "category": d.category(),
            })
        })
        .collect();
    print_json(&slots)
}

fn main() {
    tracing_setup::init_tracing();
    if let Err(e) = metrics::register_metrics() {
        warn!(error = %e, "Metrics registration failed");
    }

    let cli = Cli::parse();
    let Err(err) = run(cli) else {
        return;
    };

    // Library errors go out as structured responses; bad input exits with 2
    match err.downcast_ref::<HypercubeError>() {
        Some(e) => {
            match serde_json::to_string(&e.to_response()) {
                Ok(body) => eprintln!("{body}"),
                Err(_) => eprintln!("{}", e.message()),
            }
            if err.chain().count() > 1 {
                eprintln!("{err:#}");
            }
            std::process::exit(if e.is_caller_error() { 2 } else { 1 });
        }
        None => {
            eprintln!("Error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::EnvHelp => {
            config::print_env_help();
            return Ok(());
        }
        Commands::Dimensions => return print_dimensions(),
        _ => {}
    }

    let config = HypercubeConfig::from_env();
    config.log();
    let runtime = Runtime::open(config, cli.snapshot)?;

    match cli.command {
        Commands::Populate { count, seed } => {
            let mut generator = BrandGenerator::new(seed);
            let start = Instant::now();
            for index in 1..=count {
                runtime.store.store(generator.brand(index))?;
                if index % 500 == 0 {
                    info!(stored = index, total = count, "Populating");
                }
            }
            let elapsed = start.elapsed();
            info!(
                count,
                elapsed_ms = elapsed.as_millis() as u64,
                rate = count as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
                "Population complete"
            );
            runtime.save()?;
            print_json(&runtime.store.get_stats())?;
        }

        Commands::Store { record } => {
            let document: serde_json::Value =
                serde_json::from_str(&record).context("record is not valid JSON")?;
            let identity = runtime.store.store_json(&document)?;
            runtime.save()?;
            println!("{identity}");
        }

        Commands::Query {
            filters,
            operators,
            limit,
        } => {
            let filters: serde_json::Value =
                serde_json::from_str(&filters).context("filters are not valid JSON")?;
            let filters = filters
                .as_object()
                .ok_or_else(|| anyhow!("filters must be a JSON object"))?;
            let operators = parse_operators(&operators)?;
            let records = runtime.store.query_json(filters, &operators, limit)?;
            print_json(&records)?;
        }

        Commands::Ingest { content, tags } => {
            let content: serde_json::Value =
                serde_json::from_str(&content).context("content is not valid JSON")?;
            let identity = runtime.engine.ingest(&content, &tags)?;
            runtime.save()?;
            println!("{identity}");
        }

        Commands::Cycle { count } => {
            let mut results = Vec::with_capacity(count);
            for _ in 0..count {
                results.push(runtime.engine.run_cycle());
            }
            runtime.save()?;
            print_json(&results)?;
        }

        Commands::Run { cycles, interval } => {
            let interval =
                Duration::from_secs(interval.unwrap_or(runtime.config.cycle_interval_secs));
            for n in 1..=cycles {
                let stats = runtime.engine.run_cycle();
                info!(
                    cycle = stats.cycle,
                    advanced = stats.total_advanced(),
                    echoes = stats.echoes,
                    generations = stats.generations_created.len(),
                    "Cycle"
                );
                runtime.save()?;
                if n < cycles {
                    std::thread::sleep(interval);
                }
            }
            print_json(&runtime.engine.get_stats())?;
        }

        Commands::Recall {
            identity,
            tags,
            phase,
            limit,
        } => {
            let mut request = match (identity, tags.is_empty(), phase) {
                (Some(id), _, _) => RecallRequest::by_identity(Identity::parse(&id)?),
                (None, false, _) => RecallRequest::by_tags(tags),
                (None, true, Some(phase)) => RecallRequest::by_phase(phase.parse::<Phase>()?),
                (None, true, None) => RecallRequest::all(),
            };
            request.limit = limit;
            print_json(&runtime.engine.recall(&request)?)?;
        }

        Commands::Wisdom { generation } => {
            print_json(&runtime.engine.get_generational_wisdom(generation))?;
        }

        Commands::Stats => {
            print_json(&serde_json::json!({
                "store": runtime.store.get_stats(),
                "memory": runtime.engine.get_stats(),
            }))?;
        }

        Commands::Metrics => {
            print!("{}", metrics::gather_text()?);
        }

        Commands::Snapshot { action } => {
            let archive = runtime.archive()?;
            match action {
                SnapshotAction::Save => print_json(&archive.save(&runtime.store, &runtime.engine)?)?,
                SnapshotAction::List => print_json(&archive.list()?)?,
                SnapshotAction::Verify { id } => {
                    let ok = archive.verify(id)?;
                    println!("snapshot {id}: {}", if ok { "ok" } else { "CHECKSUM MISMATCH" });
                    if !ok {
                        std::process::exit(1);
                    }
                }
                SnapshotAction::RestoreLatest => {
                    match archive.restore_latest(&runtime.store, &runtime.engine)? {
                        Some(restored) => {
                            runtime.save()?;
                            print_json(&restored)?;
                        }
                        None => println!("archive is empty"),
                    }
                }
                SnapshotAction::Purge { keep } => {
                    let purged = archive.purge_old(keep.unwrap_or(runtime.config.archive_keep))?;
                    println!("purged {purged} snapshot(s)");
                }
            }
        }

        Commands::EnvHelp | Commands::Dimensions => {}
    }

    Ok(())
}
