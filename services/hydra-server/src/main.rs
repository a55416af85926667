//! Open Hydra control plane server.
//!
//! Every replica runs leader election and serves health endpoints; only the
//! elected leader reconciles sandbox workloads.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use hydra_election::{LeaderElector, TracingCallbacks};
use hydra_id::SandboxId;
use hydra_lease::{LeaseStore, MemoryLeaseStore, PgLeaseStore};
use hydra_quota::QuotaCalculator;
use hydra_reconcile::Backoff;
use hydra_server::{
    api,
    config::{LeaseBackend, ServerConfig, WorkloadBackend},
    controller::{ControllerWorker, SandboxReconciler, WorkerConfig},
    db::Database,
    desired::{
        spawn_notification_forwarder, DesiredState, InMemoryDesiredState, PgDesiredState,
    },
    state::AppState,
    workload::{InMemoryWorkloadClient, PodWorkloadClient, WorkloadClient},
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const NOTIFICATION_BUFFER: usize = 1024;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "hydra-server", version, about = "Open Hydra control plane")]
struct Args {
    /// YAML configuration file.
    #[arg(long, short, env = "HYDRA_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, env = "HYDRA_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = ServerConfig::load(args.config.as_deref())?;
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    config.validate()?;
    let catalog = Arc::new(config.catalog()?);
    let election_config = config.election();

    info!(
        identity = %election_config.identity,
        listen_addr = %config.listen_addr,
        "Starting Open Hydra control plane"
    );

    let db = match config.db() {
        Some(db_config) => {
            let db = Database::connect(&db_config)
                .await
                .context("connecting to desired-state database")?;
            info!("Database connection established");
            if config.database.run_migrations {
                info!("Running database migrations");
                db.run_migrations().await?;
            }
            Some(db)
        }
        None => {
            warn!("No database configured, desired state is held in memory");
            None
        }
    };

    let lease_store: Arc<dyn LeaseStore> = match config.lease_store.backend {
        LeaseBackend::Postgres => {
            let store = PgLeaseStore::connect(&config.lease_store())
                .await
                .context("connecting to lease store")?;
            store.ensure_schema().await?;
            Arc::new(store)
        }
        LeaseBackend::Memory => {
            warn!("Using in-memory lease store, only safe with a single replica");
            Arc::new(MemoryLeaseStore::new())
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let callbacks = Arc::new(TracingCallbacks::new(election_config.identity.clone()));
    let elector = LeaderElector::new(lease_store, election_config, callbacks)?;
    let election = elector.handle();
    let mut election_handle = tokio::spawn(elector.run(shutdown_rx.clone()));

    let (notify_tx, notify_rx) = mpsc::channel::<SandboxId>(NOTIFICATION_BUFFER);
    let (desired, forwarder_handle): (Arc<dyn DesiredState>, Option<JoinHandle<()>>) = match &db {
        Some(db) => {
            let forwarder =
                spawn_notification_forwarder(db.pool().clone(), notify_tx, shutdown_rx.clone());
            (Arc::new(PgDesiredState::new(db.pool().clone())), Some(forwarder))
        }
        None => (Arc::new(InMemoryDesiredState::with_notifications(notify_tx)), None),
    };

    let workloads: Arc<dyn WorkloadClient> = match config.workloads.backend {
        WorkloadBackend::Kubernetes => Arc::new(
            PodWorkloadClient::try_default(&config.workloads.namespace)
                .await
                .context("creating orchestrator client")?,
        ),
        WorkloadBackend::Memory => {
            warn!("Using in-memory workload client, no pods will be created");
            Arc::new(InMemoryWorkloadClient::new())
        }
    };

    let reconciler = SandboxReconciler::new(
        desired,
        workloads.clone(),
        QuotaCalculator::new(catalog.clone()),
        election.clone(),
        config.workloads.image.clone(),
    );
    let worker_config = WorkerConfig {
        resync_period: config.resync_period(),
        backoff: Backoff::new(
            hydra_reconcile::DEFAULT_BACKOFF_BASE,
            config.leader_election.timing().retry_period,
        ),
        ..WorkerConfig::default()
    };
    let worker = ControllerWorker::new(reconciler, election.clone(), notify_rx, worker_config);
    let worker_handle = tokio::spawn(worker.run(shutdown_rx.clone()));

    let state = AppState::new(db, election, catalog, workloads);
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let server_handle = tokio::spawn({
        let mut shutdown_rx = shutdown_rx.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    loop {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                        if shutdown_rx.changed().await.is_err() {
                            break;
                        }
                    }
                    info!("HTTP server shutting down");
                })
                .await
        }
    });

    let mut exit: Result<()> = Ok(());
    let mut election_done = false;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut election_handle => {
            election_done = true;
            match result {
                Ok(Ok(())) => info!("Leader election exited"),
                Ok(Err(e)) => {
                    error!(error = %e, "Leader election failed, shutting down");
                    exit = Err(e.into());
                }
                Err(e) => {
                    error!(error = %e, "Leader election task panicked");
                    exit = Err(e.into());
                }
            }
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, worker_handle).await.is_err() {
        warn!("Controller worker did not shut down in time");
    }
    if !election_done && tokio::time::timeout(SHUTDOWN_TIMEOUT, election_handle).await.is_err() {
        warn!("Leader election did not release in time");
    }
    if let Some(handle) = forwarder_handle {
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await.is_err() {
            warn!("Notification forwarder did not shut down in time");
        }
    }

    info!("Control plane shutdown complete");
    exit
}
