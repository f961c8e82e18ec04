use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use conprof::*;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

/// Continuous profiling collector for a distributed database cluster.
#[derive(Parser)]
#[command(name = "conprof", about)]
struct Cli {
    /// HTTP server host.
    #[arg(long)]
    host: Option<String>,

    /// HTTP server port.
    #[arg(long)]
    port: Option<u16>,

    /// Config file path.
    #[arg(long)]
    config: Option<String>,

    /// Log file name.
    #[arg(long)]
    log_file: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = match cli.config.as_deref() {
        Some(path) => config::Config::load(path)?,
        None => config::Config::default(),
    };
    if let Some(path) = cli.config {
        cfg.config_path = path;
    }
    if let Some(host) = cli.host {
        cfg.host = host;
    }
    if let Some(port) = cli.port {
        cfg.port = port;
    }
    if let Some(log_file) = cli.log_file {
        cfg.log.filename = log_file;
    }
    anyhow::ensure!(!cfg.pd_address.is_empty(), "need specify PD address");

    init_tracing(&cfg.log)?;
    config::store_global_config(cfg.clone());

    let store = Arc::new(profile_repo::ProfileStorage::open(&cfg.store_path).await?);

    let shutdown = CancellationToken::new();
    let gc_handle = profile_repo::gc::spawn(store.clone(), shutdown.child_token());

    let source = cluster_repo::ClusterClient::new(&cfg.pd_address, cfg.scheme(), &cfg.security)?;
    let discoverer = Arc::new(discovery::TopologyDiscoverer::new(Box::new(source)));

    let manager = Arc::new(scrape::ScrapeManager::new(store.clone()));
    manager.clone().start(discoverer.subscribe());
    let discovery_handle = discoverer.clone().start();

    let app = routes::app(store, manager.clone());
    let addr = format!("{}:{}", cfg.host, cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("received shutdown signal");
    shutdown.cancel();
    discoverer.close();
    manager.close().await;
    let _ = gc_handle.await;
    let _ = discovery_handle.await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn init_tracing(log: &config::Log) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let builder = tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter);
    if log.filename.is_empty() {
        builder.init();
    } else {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log.filename)?;
        builder.with_writer(Arc::new(file)).with_ansi(false).init();
    }
    Ok(())
}
