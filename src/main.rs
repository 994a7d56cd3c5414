use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use taskhub::config::HubConfig;
use taskhub::core::dispatch::{DispatcherConfig, JobDispatcher};
use taskhub::core::heartbeat::ClusterHeartbeatMonitor;
use taskhub::core::reaper::RetentionReaper;
use taskhub::core::runtime::{HttpRuntime, JobRuntime};
use taskhub::core::store::SessionStore;
use taskhub::interfaces::web::{AppState, build_api_router};
use taskhub::logging::BroadcastMakeWriter;

#[derive(Parser, Debug)]
#[command(name = "taskhub")]
#[command(version)]
#[command(about = "Session orchestration hub for externally scheduled agent jobs")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the hub API server and its background loops
    Serve(ServeArgs),
}

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Path to a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind host, overrides the config file
    #[arg(long)]
    host: Option<String>,

    /// Bind port, overrides the config file
    #[arg(long)]
    port: Option<u16>,

    /// Job runtime base URL, overrides the config file
    #[arg(long)]
    runtime_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    match args.command {
        Commands::Serve(serve_args) => run_serve(serve_args).await,
    }
}

async fn run_serve(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = HubConfig::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(url) = args.runtime_url {
        config.runtime_url = url;
    }

    let (log_tx, _) = tokio::sync::broadcast::channel::<String>(500);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(BroadcastMakeWriter {
            sender: log_tx.clone(),
        })
        .init();

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;
    let store = SessionStore::open(&config.db_path())?;
    let runtime: Arc<dyn JobRuntime> =
        Arc::new(HttpRuntime::new(&config.runtime_url, config.poll_timeout()));
    let dispatcher = Arc::new(JobDispatcher::new(
        store.clone(),
        runtime.clone(),
        DispatcherConfig {
            poll_interval: config.poll_interval(),
            retry_budget: config.retry_budget,
        },
    ));
    let reaper = Arc::new(RetentionReaper::new(
        store.clone(),
        runtime.clone(),
        config.retention_ttl(),
    ));
    let heartbeat = Arc::new(ClusterHeartbeatMonitor::new());

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    tokio::spawn(dispatcher.clone().run(shutdown_tx.subscribe()));
    tokio::spawn(reaper.run(shutdown_tx.subscribe()));

    let state = AppState::new(store, dispatcher, runtime, heartbeat, log_tx);
    let app = build_api_router(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding API server to {}", addr))?;
    info!("API server running at http://{}", addr);
    info!("dispatcher polling runtime at {}", config.runtime_url);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("API server crashed")?;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("ctrl-c handler failed: {}", e);
        return;
    }
    info!("shutdown requested, stopping background loops");
    let _ = shutdown_tx.send(());
}
