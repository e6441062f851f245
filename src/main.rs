use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use conductor_adapters::{CommandInvoker, FsContextService};
use conductor_core::config::AppConfig;
use conductor_core::event::SnapshotBus;
use conductor_core::traits::{AiInvoker, StateObserver};
use conductor_core::types::{ControlRequest, PlanningSnapshot, SessionId};
use conductor_engine::manifest::load_manifest;
use conductor_engine::{InvokerPool, Orchestrator, RunOutcome, SnapshotLogger};

#[derive(Parser)]
#[command(name = "conductor", version, about = "Stack-based workflow orchestration for AI coding agents")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "conductor.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a workflow manifest
    Validate {
        /// Manifest file (.toml or .json)
        manifest: PathBuf,
    },
    /// Execute one node of a workflow against a worktree
    Run {
        /// Node to execute
        node: String,
        /// Manifest file (.toml or .json)
        #[arg(short, long)]
        manifest: PathBuf,
        /// Worktree the node operates on
        #[arg(short, long, default_value = ".")]
        worktree: PathBuf,
        /// Task description recorded as the first input segment
        #[arg(short, long)]
        input: Option<String>,
        /// Session ID (auto-generated if not provided)
        #[arg(short, long)]
        session: Option<String>,
        /// Abort instead of prompting when the workflow halts
        #[arg(long)]
        non_interactive: bool,
    },
    /// Show effective configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "conductor", &mut std::io::stdout());
        return Ok(());
    }

    let config = AppConfig::load_or_default(&cli.config)?;

    // Initialize tracing: RUST_LOG, then [log] filter, then the default.
    let default_filter = config
        .log
        .filter
        .clone()
        .unwrap_or_else(|| "conductor=info,warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Validate { manifest } => validate(&manifest),
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Run {
            node,
            manifest,
            worktree,
            input,
            session,
            non_interactive,
        } => {
            let options = RunOptions {
                node,
                manifest,
                worktree,
                input,
                session_id: session.map(|s| SessionId::from_str(&s)).unwrap_or_default(),
                non_interactive,
            };
            run(&config, options).await
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }
}

fn validate(path: &Path) -> anyhow::Result<()> {
    let manifest = load_manifest(path)?;
    println!("{}: ok", path.display());
    for (id, node) in &manifest.nodes {
        println!(
            "  {:<20} entry={:<16} blocks={}{}",
            id,
            node.entry_block,
            node.blocks.len(),
            if node.context_inheritance { " inherits" } else { "" }
        );
    }
    Ok(())
}

struct RunOptions {
    node: String,
    manifest: PathBuf,
    worktree: PathBuf,
    input: Option<String>,
    session_id: SessionId,
    non_interactive: bool,
}

fn build_invoker(config: &AppConfig) -> anyhow::Result<Arc<dyn AiInvoker>> {
    let Some(primary) = &config.invoker else {
        bail!("no [invoker] section in config; set invoker.command to the AI CLI to run");
    };
    let mut pool = InvokerPool::new(
        Arc::new(CommandInvoker::from_config(primary)),
        config.retry.clone(),
    );
    for fallback in &config.fallback_invokers {
        pool = pool.with_fallback(Arc::new(CommandInvoker::from_config(fallback)));
    }
    Ok(Arc::new(pool))
}

async fn run(config: &AppConfig, options: RunOptions) -> anyhow::Result<()> {
    let manifest = load_manifest(&options.manifest)?;
    let worktree = options
        .worktree
        .canonicalize()
        .with_context(|| format!("worktree {} not found", options.worktree.display()))?;
    let invoker = build_invoker(config)?;

    let bus = Arc::new(SnapshotBus::default());
    let cancel = CancellationToken::new();
    let logger_handle = config.log.snapshot_dir().map(|dir| {
        info!(dir = %dir.display(), "Snapshot logging enabled");
        tokio::spawn(SnapshotLogger::new(dir).run(
            bus.clone(),
            options.session_id.clone(),
            cancel.clone(),
        ))
    });

    let printer_bus = bus.clone();
    let observer: Arc<dyn StateObserver> = Arc::new(move |snapshot: &PlanningSnapshot| {
        print_snapshot(snapshot);
        printer_bus.publish(snapshot.clone());
    });

    let mut orchestrator = Orchestrator::from_config(
        manifest,
        Arc::new(FsContextService::from_config(&config.context)),
        invoker,
        observer,
        config,
    )
    .with_session_id(options.session_id.clone());

    let first = interruptible(orchestrator.execute_node_with_input(
        &options.node,
        &worktree,
        options.input.as_deref(),
    ))
    .await;
    let result = match first {
        Some(outcome) => drive_to_end(&mut orchestrator, outcome?, options.non_interactive).await,
        None => {
            warn!("Interrupted, aborting session");
            orchestrator.abort()?;
            Err(anyhow::anyhow!("interrupted"))
        }
    };

    cancel.cancel();
    if let Some(handle) = logger_handle {
        handle.await.ok();
    }
    result
}

/// Keep answering halts until the node finishes.
async fn drive_to_end(
    orchestrator: &mut Orchestrator,
    mut outcome: RunOutcome,
    non_interactive: bool,
) -> anyhow::Result<()> {
    loop {
        let reason = match outcome {
            RunOutcome::Terminal => {
                eprintln!("\n[done]");
                return Ok(());
            }
            RunOutcome::Aborted => bail!("session aborted"),
            RunOutcome::Halted { reason } => reason,
        };

        eprintln!("\n[halted] {}", reason);
        if non_interactive {
            orchestrator.abort()?;
            bail!("workflow halted: {}", reason);
        }

        let session_id = orchestrator.session_id().clone();
        let request = tokio::task::spawn_blocking(move || prompt_control(session_id)).await??;
        let next = interruptible(orchestrator.handle(request)).await;
        outcome = match next {
            Some(result) => result?,
            None => {
                warn!("Interrupted, aborting session");
                orchestrator.abort()?
            }
        };
    }
}

/// Ask the operator how to continue a halted session.
fn prompt_control(session_id: SessionId) -> anyhow::Result<ControlRequest> {
    let choices = ["Resume", "Retry current block", "Abort"];
    let choice = dialoguer::Select::new()
        .with_prompt("Workflow halted")
        .items(&choices)
        .default(0)
        .interact()?;
    if choice == 2 {
        return Ok(ControlRequest::abort(session_id));
    }

    let note: String = dialoguer::Input::new()
        .with_prompt("Guidance for the next attempt (optional)")
        .allow_empty(true)
        .interact_text()?;
    let note = Some(note).filter(|n| !n.trim().is_empty());
    Ok(if choice == 0 {
        ControlRequest::resume(session_id, note)
    } else {
        ControlRequest::retry(session_id, note)
    })
}

/// Race a drive against Ctrl-C. `None` means interrupted.
async fn interruptible<F, T>(fut: F) -> Option<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        result = fut => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    }
}

fn print_snapshot(snapshot: &PlanningSnapshot) {
    let trail: Vec<&str> = snapshot.steps.iter().map(|s| s.name.as_str()).collect();
    let status = if snapshot.is_halted {
        "halted"
    } else if snapshot.is_terminal {
        "finished"
    } else {
        "running"
    };
    eprintln!(
        "[{:>3}] {}/{} {} ({})",
        snapshot.sequence,
        snapshot.node_id,
        snapshot.current_block_id,
        status,
        trail.join(" > ")
    );
    if let Some(output) = &snapshot.last_output {
        let preview: String = output.lines().next().unwrap_or_default().chars().take(120).collect();
        if !preview.is_empty() {
            eprintln!("      {}", preview);
        }
    }
}
