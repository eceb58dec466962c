use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sift_core::Config;
use sift_core::bootstrap::{build_app, create_provider, health_check};
use sift_gateway::GatewayServer;
use tokio::sync::watch;

/// Retrieval-augmented chat over a local document corpus.
#[derive(Parser, Debug)]
#[command(name = "sift", version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file (falls back to `SIFT_CONFIG`, then `sift.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service (default).
    Serve {
        /// Build or load the index before accepting requests.
        #[arg(long)]
        warm: bool,
    },
    /// Build the index and exit.
    Index {
        /// Ignore any persisted index and rebuild from the corpus.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config);
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    match cli.command.unwrap_or(Command::Serve { warm: false }) {
        Command::Serve { warm } => serve(&config, warm).await,
        Command::Index { force } => index(&config, force).await,
    }
}

async fn serve(config: &Config, warm: bool) -> anyhow::Result<()> {
    let provider = create_provider(config)?;
    health_check(&provider).await;
    let app = build_app(config, provider)?;

    if warm {
        let started = std::time::Instant::now();
        match app.store.ensure_ready().await {
            Ok(snapshot) => tracing::info!(
                chunks = snapshot.len(),
                elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                "index warmed"
            ),
            Err(e) => tracing::warn!("index warm-up failed, will retry on first request: {e:#}"),
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e:#}");
            return;
        }
        tracing::info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    GatewayServer::new(&config.server.bind, config.server.port, app, shutdown_rx)
        .with_max_body_size(config.server.max_body_size)
        .with_default_k(config.chat.default_k)
        .serve()
        .await?;
    Ok(())
}

async fn index(config: &Config, force: bool) -> anyhow::Result<()> {
    let provider = create_provider(config)?;
    let app = build_app(config, provider)?;

    let snapshot = if force {
        app.store.rebuild().await
    } else {
        app.store.ensure_ready().await
    }
    .context("index build failed")?;

    let status = app.store.status();
    tracing::info!(
        chunks = snapshot.len(),
        dim = snapshot.dim(),
        documents = ?status.documents,
        rebuilds = status.rebuilds,
        index = %config.index.index_path.display(),
        "index ready"
    );
    Ok(())
}

fn resolve_config_path(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| std::env::var_os("SIFT_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("sift.toml"))
}

fn init_subscriber() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
