//! Practice Tracker CLI
//!
//! Serves the tracker API and derives session signals offline.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use practice_tracker::{
    config::Config,
    core::{derive_signals, ErrorEvent, RunEvent, Session},
    execute::ProcessRunner,
    store::{MemoryStore, PromptStore},
    tracker::Tracker,
    VERSION,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// How often `serve` writes the store snapshot while running.
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "practice-tracker")]
#[command(version = VERSION)]
#[command(about = "Coding-practice session tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Serve {
        /// Port to bind (overrides configuration)
        #[arg(long)]
        port: Option<u16>,

        /// Keep everything in memory; do not load or save the store snapshot
        #[arg(long)]
        ephemeral: bool,
    },

    /// Derive signals from a session snapshot file
    Signals {
        /// JSON file with `session`, `runs` and `errors`
        #[arg(long, short)]
        input: PathBuf,

        /// Pretty-print the output
        #[arg(long)]
        pretty: bool,
    },

    /// List the prompt catalog
    Prompts,

    /// Show configuration
    Config,
}

/// Offline input for the `signals` command.
#[derive(Deserialize)]
struct SignalsInput {
    session: Session,
    #[serde(default)]
    runs: Vec<RunEvent>,
    #[serde(default)]
    errors: Vec<ErrorEvent>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, ephemeral } => cmd_serve(port, ephemeral),
        Commands::Signals { input, pretty } => cmd_signals(&input, pretty),
        Commands::Prompts => cmd_prompts(),
        Commands::Config => cmd_config(),
    }
}

fn cmd_serve(port: Option<u16>, ephemeral: bool) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = Config::load().context("loading configuration")?;
    if let Some(port) = port {
        config.port = port;
    }
    config.validate().context("invalid configuration")?;

    let store = if config.persist_store && !ephemeral {
        Arc::new(
            MemoryStore::with_persistence(config.store_path())
                .with_context(|| format!("loading store from {:?}", config.store_path()))?,
        )
    } else {
        Arc::new(MemoryStore::with_default_prompts())
    };

    let runner = Arc::new(ProcessRunner::new(
        config.interpreter.clone(),
        config.execution_timeout,
    ));
    let tracker = Arc::new(Tracker::new(&config, store.clone(), runner));

    tracing::info!(
        "Practice Tracker v{} ({:?}, interpreter: {}, timeout: {}s)",
        VERSION,
        config.environment,
        config.interpreter,
        config.execution_timeout.as_secs()
    );

    let runtime = tokio::runtime::Runtime::new().context("starting runtime")?;
    runtime.block_on(async {
        let server_config =
            practice_tracker::server::ServerConfig::new(config.port, config.allowed_origins.clone());
        let (_addr, shutdown_tx) = practice_tracker::server::run(server_config, tracker.clone())
            .await
            .context("starting server")?;

        let snapshots = tokio::spawn({
            let store = store.clone();
            async move {
                let mut ticker = tokio::time::interval(SNAPSHOT_INTERVAL);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(e) = store.save() {
                        tracing::warn!("Failed to save store snapshot: {}", e);
                    }
                }
            }
        });

        shutdown_signal().await?;
        snapshots.abort();
        let _ = shutdown_tx.send(());

        anyhow::Ok(())
    })?;

    store.save().context("saving store snapshot")?;
    println!();
    println!("{}", tracker.activity().summary());

    Ok(())
}

/// Wait for Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("waiting for Ctrl+C")?,
            _ = terminate.recv() => tracing::info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl+C")?;

    Ok(())
}

fn cmd_signals(input: &Path, pretty: bool) -> anyhow::Result<()> {
    let content =
        std::fs::read_to_string(input).with_context(|| format!("reading {input:?}"))?;
    let mut snapshot: SignalsInput =
        serde_json::from_str(&content).with_context(|| format!("parsing {input:?}"))?;

    if snapshot.runs.iter().any(|r| r.session_id != snapshot.session.id) {
        bail!("runs must belong to session {}", snapshot.session.id);
    }

    // Caller-side ordering: ascending occurrence time, ties by id.
    snapshot.runs.sort_by_key(|r| (r.occurred_at, r.id));
    snapshot.errors.sort_by_key(|e| (e.occurred_at, e.id));

    let signals = derive_signals(&snapshot.session, &snapshot.runs, &snapshot.errors);
    let output = if pretty {
        serde_json::to_string_pretty(&signals)?
    } else {
        serde_json::to_string(&signals)?
    };
    println!("{output}");

    Ok(())
}

fn cmd_prompts() -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();
    let store = if config.persist_store {
        MemoryStore::with_persistence(config.store_path())?
    } else {
        MemoryStore::with_default_prompts()
    };

    println!("Prompts");
    println!("=======");
    println!();
    for prompt in store.list_prompts()? {
        println!("{:>3}. {}", prompt.id, prompt.text);
    }

    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();

    // Never print the signing secret.
    let mut shown = serde_json::to_value(&config)?;
    shown["secret_key"] = serde_json::Value::String("<redacted>".to_string());
    println!("{}", serde_json::to_string_pretty(&shown)?);

    Ok(())
}
