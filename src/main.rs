//! Decoy Intrusion Lab - Core Service Entry Point
//!
//! Wires the pipeline together: decoy listeners and the integrity engine
//! feed bounded event streams, the containment orchestrator reads them and
//! acts, the forensics exporter packages everything. One supervised task
//! per listener and loop; ctrl-c propagates a shutdown signal that every
//! task awaits.

mod config;
mod constants;
mod error;
mod logic;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;

use config::AppConfig;
use error::{LabError, Result};
use logic::containment::{HostRemediation, Orchestrator};
use logic::decoy::DecoyListener;
use logic::events::{AnomalyEvent, ContainmentAction, ProbeEvent};
use logic::forensics::ForensicsExporter;
use logic::integrity::{BaselineDb, IntegrityMonitor};
use store::JsonlStore;

#[derive(Parser)]
#[command(name = "snare-core", about = "Decoy Intrusion Lab - Core Service")]
struct Cli {
    /// Path to a JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the data directory from the configuration.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => match AppConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                log::error!("cannot load config {:?}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => AppConfig::default(),
    };
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    log::info!(
        "Starting snare-core v{} ({} decoy services, {} watch paths)",
        env!("CARGO_PKG_VERSION"),
        config.services.len(),
        config.watch_paths.len()
    );

    if let Err(e) = run(config).await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(config: AppConfig) -> Result<()> {
    // Storage initialization failures are the only fatal errors besides a
    // fully failed listener startup.
    let decoy_store: Arc<JsonlStore<ProbeEvent>> =
        Arc::new(JsonlStore::open(&config.decoy_log_path(), config.stream_cap)?);
    let integrity_store: Arc<JsonlStore<AnomalyEvent>> = Arc::new(JsonlStore::open(
        &config.integrity_log_path(),
        config.stream_cap,
    )?);
    let action_store: Arc<JsonlStore<ContainmentAction>> = Arc::new(JsonlStore::open(
        &config.containment_log_path(),
        config.stream_cap,
    )?);
    let baseline = BaselineDb::open(&config.baseline_db_path())?;

    let monitor = Arc::new(IntegrityMonitor::new(
        config.watch_paths.clone(),
        config.size_ceiling_bytes,
        baseline,
        integrity_store.clone(),
    ));

    // One synchronous scan before anything else runs, so the first
    // periodic scan compares against a populated baseline.
    if let Some(emitted) = monitor.run_scan() {
        log::info!(
            "startup integrity scan done ({} anomalies, {} baselined paths)",
            emitted,
            monitor.baseline().entry_count().unwrap_or(0)
        );
    }

    let orchestrator = Arc::new(Orchestrator::new(
        decoy_store.clone(),
        integrity_store.clone(),
        action_store.clone(),
        Arc::new(HostRemediation),
        config.service_ports(),
        config.probe_threshold,
    ));

    let exporter = Arc::new(ForensicsExporter::new(
        decoy_store.clone(),
        integrity_store.clone(),
        action_store.clone(),
        config.export_dir(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = DecoyListener::new(
        config.services.clone(),
        config.decoy_files.clone(),
        decoy_store.clone(),
    );
    let decoy_handles = listener.spawn_all(shutdown_rx.clone()).await?;
    log::info!(
        "{}/{} decoy services listening",
        decoy_handles.bound.len(),
        config.services.len()
    );

    let mut tasks = decoy_handles.tasks;
    tasks.push(tokio::spawn(logic::integrity::run_loop(
        monitor,
        config.scan_interval_secs,
        shutdown_rx.clone(),
    )));
    tasks.push(tokio::spawn(logic::containment::run_loop(
        orchestrator,
        config.cycle_interval_secs,
        shutdown_rx.clone(),
    )));
    tasks.push(tokio::spawn(logic::forensics::run_loop(
        exporter,
        config.export_interval_secs,
        shutdown_rx,
    )));

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| LabError::Fatal(format!("cannot install signal handler: {}", e)))?;
    log::info!("shutdown requested, stopping all tasks");
    let _ = shutdown_tx.send(true);

    for task in tasks {
        let _ = task.await;
    }
    log::info!("snare-core stopped");
    Ok(())
}
