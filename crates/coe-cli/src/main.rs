//! COE CLI - coding-agent orchestration engine
//!
//! Usage:
//!   coe serve                   Run the JSON-RPC control server on stdio
//!   coe impact <old> <new>      Report the impact of a plan revision
//!   coe init                    Write a default .coe/config.toml

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coe_core::{CoeConfig, Task};
use coe_orchestrator::Orchestrator;
use coe_planning::{ImpactAnalyzer, PlanSnapshot};
use coe_protocol::{ControlServer, MethodRegistry};
use coe_stability::{FileWatcher, StabilityGate};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Parser)]
#[command(name = "coe")]
#[command(author, version, about = "Coding-agent orchestration engine")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the control protocol over stdin/stdout
    Serve {
        /// Repository root (config and watched files)
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// JSON array of tasks to enqueue at startup
        #[arg(long, value_name = "FILE")]
        backlog: Option<PathBuf>,

        /// Plan snapshot the backlog executes against
        #[arg(long, value_name = "FILE")]
        plan: Option<PathBuf>,

        /// Feed file-system changes under the root to the stability gate
        #[arg(long)]
        watch: bool,
    },

    /// Report the impact of changing one plan snapshot into another
    Impact {
        /// Previous plan snapshot (JSON)
        old: PathBuf,

        /// Revised plan snapshot (JSON)
        new: PathBuf,

        /// Print the analysis as JSON
        #[arg(long)]
        json: bool,

        /// Do not follow dependency links to neighbouring features
        #[arg(long)]
        no_transitive: bool,

        /// Maximum transitive traversal depth
        #[arg(long, value_name = "N")]
        max_depth: Option<usize>,
    },

    /// Write a default configuration
    Init {
        /// Repository path (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout carries protocol frames, so logs go to stderr
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Serve {
            root,
            backlog,
            plan,
            watch,
        } => cmd_serve(root, backlog, plan, watch).await,
        Commands::Impact {
            old,
            new,
            json,
            no_transitive,
            max_depth,
        } => cmd_impact(old, new, json, no_transitive, max_depth),
        Commands::Init { path } => cmd_init(path),
    }
}

async fn cmd_serve(
    root: PathBuf,
    backlog: Option<PathBuf>,
    plan: Option<PathBuf>,
    watch: bool,
) -> Result<()> {
    let config = CoeConfig::load_or_default(&root).context("Failed to load COE config")?;
    let orchestrator = Arc::new(Orchestrator::from_config(&config));

    if let Some(plan_file) = plan {
        let snapshot = load_plan(&plan_file)?;
        orchestrator.apply_plan_update(snapshot).await;
        info!("Loaded plan from {:?}", plan_file);
    }
    if let Some(backlog_file) = backlog {
        let tasks = load_backlog(&backlog_file)?;
        let total = tasks.len();
        let ready = orchestrator.enqueue_all(tasks).await;
        info!("Enqueued {} tasks ({} ready) from {:?}", total, ready, backlog_file);
    }

    let gate = StabilityGate::new(config.stability.clone());
    let _watcher = if watch {
        let watcher =
            FileWatcher::start(root.clone(), gate.clone()).context("Failed to start file watcher")?;
        info!("Watching {:?}", watcher.root());
        Some(watcher)
    } else {
        None
    };

    let registry = MethodRegistry::for_orchestrator(orchestrator).with_gate(gate.clone());
    debug!("Registered methods: {:?}", registry.method_names());

    let (input, input_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (output_tx, mut output) = mpsc::channel::<String>(CHANNEL_CAPACITY);
    let server = ControlServer::new(Arc::new(registry), input_rx, output_tx);

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(frame) = output.recv().await {
            stdout.write_all(frame.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    server.start();
    info!("COE control server listening on stdio");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                if input.send(line).await.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    drop(input);
    let released = gate.cancel_all();
    if released > 0 {
        warn!("Released {} pending stability waits", released);
    }
    server.join().await;
    drop(server);
    writer.await.context("Output writer panicked")??;

    info!("COE control server shut down");
    Ok(())
}

fn cmd_impact(
    old: PathBuf,
    new: PathBuf,
    json: bool,
    no_transitive: bool,
    max_depth: Option<usize>,
) -> Result<()> {
    let config = CoeConfig::load_or_default(Path::new(".")).context("Failed to load COE config")?;
    let mut impact = config.impact.clone();
    if no_transitive {
        impact.include_transitive = false;
    }
    if let Some(depth) = max_depth {
        impact.max_traversal_depth = depth;
    }

    let old_plan = load_plan(&old)?;
    let new_plan = load_plan(&new)?;
    let analyzer = ImpactAnalyzer::new(impact).with_weights(config.rework.clone());
    let result = analyzer.analyze_plan_update(&old_plan, &new_plan);

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", result);
    }
    Ok(())
}

fn cmd_init(path: PathBuf) -> Result<()> {
    info!("Initializing COE in {:?}", path);

    let config_path = path.join(".coe/config.toml");
    if config_path.exists() {
        println!("Config already exists: {:?}", config_path);
        return Ok(());
    }

    CoeConfig::write_default(&path).context("Failed to write default config")?;
    println!("Initialized COE in {:?}", path);
    println!("Created:");
    println!("  .coe/config.toml");
    Ok(())
}

fn load_plan(path: &Path) -> Result<PlanSnapshot> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan file {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse plan JSON {:?}", path))
}

fn load_backlog(path: &Path) -> Result<Vec<Task>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read backlog file {:?}", path))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse backlog JSON {:?}", path))
}
