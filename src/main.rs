//! # notegate CLI
//!
//! ## Usage
//!
//! ```bash
//! notegate --config ./config/notegate.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `notegate serve` | Startup scan, file watcher and HTTP API |
//! | `notegate scan` | Reconcile the tree with the index once, then exit |
//! | `notegate check-config` | Validate the configuration file |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use notegate::app::Services;
use notegate::config::{self, Config};
use notegate::server::{run_server, AppState};
use notegate::watcher::{spawn_watcher, NotifySource};

/// Incremental document indexer with directory gates and ignore lists.
#[derive(Parser)]
#[command(name = "notegate", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/notegate.toml")]
    config: PathBuf,

    /// More log output (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the watcher and the HTTP API until interrupted.
    Serve {
        /// Override `[server].bind`.
        #[arg(long)]
        bind: Option<String>,

        /// Skip the startup reconcile scan.
        #[arg(long)]
        no_scan: bool,
    },

    /// Index new and changed files, drop deleted ones, and exit.
    Scan,

    /// Parse and validate the configuration, then print a summary.
    CheckConfig,
}

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("RUST_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve { bind, no_scan } => serve(cfg, bind, !no_scan).await,
        Commands::Scan => scan(cfg).await,
        Commands::CheckConfig => {
            print_config(&cfg);
            Ok(())
        }
    }
}

async fn serve(cfg: Config, bind: Option<String>, startup_scan: bool) -> anyhow::Result<()> {
    let services = Arc::new(Services::open(&cfg).await?);
    let bind = bind.unwrap_or_else(|| cfg.server.bind.clone());

    let watcher = spawn_watcher(
        services.indexer.clone(),
        Box::new(NotifySource::new(&cfg.watcher)),
        &cfg.watcher,
        startup_scan,
    )?;

    let state = AppState::new(services, Some(watcher.control()));
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        tracing::info!("shutdown requested");
    };

    let served = run_server(state, &bind, shutdown).await;
    watcher.shutdown().await;
    served
}

async fn scan(cfg: Config) -> anyhow::Result<()> {
    let services = Services::open(&cfg).await?;
    let summary = services.indexer.sync_all().await?;

    println!("Scan complete:");
    println!("  queued:   {}", summary.scanned);
    println!("  indexed:  {} ({} chunks)", summary.indexed, summary.chunks);
    println!("  removed:  {}", summary.removed);
    println!("  skipped:  {}", summary.skipped);
    println!("  failed:   {}", summary.failed);
    println!("  total:    {} documents", services.registry.len());

    if summary.failed > 0 {
        anyhow::bail!("{} file(s) failed to index; see log for details", summary.failed);
    }
    Ok(())
}

fn print_config(cfg: &Config) {
    println!("Configuration OK");
    println!("  root:       {}", cfg.index.root.display());
    println!("  state dir:  {}", cfg.state.dir.display());
    println!("  store:      {:?}", cfg.store.backend);
    println!("  embedding:  {}", cfg.embedding.url);
    println!(
        "  chunking:   {} chars, {} overlap",
        cfg.chunking.chunk_chars, cfg.chunking.overlap_chars
    );
    println!(
        "  watcher:    {} ms debounce, {} worker(s)",
        cfg.watcher.debounce_ms, cfg.watcher.workers
    );
    println!("  bind:       {}", cfg.server.bind);
}
