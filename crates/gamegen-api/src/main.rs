//! Game generation pipeline server

use bollard::Docker;
use clap::Parser;
use gamegen_api::{AppState, ServerSettings, routes};
use gamegen_config::{ProviderConfig, SchedulerConfig};
use gamegen_core::WorkspaceLayout;
use gamegen_db::{JobStore, MemoryJobStore, PgJobStore, create_pool, run_migrations};
use gamegen_deployer::StaticSiteDeployer;
use gamegen_executor::DockerExecutor;
use gamegen_oracle::ScriptOracle;
use gamegen_scheduler::{Maintenance, PipelineOrchestrator, Scheduler};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// How long shutdown waits for in-flight jobs.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "gamegen-server", about = "Game generation pipeline server", version)]
struct Args {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Keep jobs in memory instead of PostgreSQL
    #[arg(long)]
    memory: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let settings = ServerSettings::from_env();
    let config = SchedulerConfig::load()?;
    let providers = ProviderConfig::from_env();
    if providers.default.api_key.is_empty() {
        warn!("ZAI_API_KEY is not set, execution units will run without credentials");
    }

    let store: Arc<dyn JobStore> = if args.memory {
        info!("Using in-memory job store");
        Arc::new(MemoryJobStore::new())
    } else {
        info!("Connecting to database...");
        let pool = create_pool(&settings.database_url).await?;
        run_migrations(&pool).await?;
        info!("Database connected");
        Arc::new(PgJobStore::new(pool))
    };

    let docker = Docker::connect_with_local_defaults()?;
    let executor = Arc::new(DockerExecutor::with_client(
        docker.clone(),
        settings.executor_config(),
    ));
    let deployer = Arc::new(StaticSiteDeployer::with_docker(
        settings.deployer_config(),
        docker,
    ));
    let oracle = Arc::new(ScriptOracle::new(&settings.test_script_path));

    let orchestrator = PipelineOrchestrator::new(
        store.clone(),
        executor.clone(),
        deployer.clone(),
        oracle,
        WorkspaceLayout::new(&settings.workspace_path),
    )
    .with_config(config.clone())
    .with_providers(providers);
    let scheduler = Arc::new(Scheduler::new(store.clone(), Arc::new(orchestrator)));
    let maintenance = Maintenance::new(store.clone(), executor, config.retention_days);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = {
        let scheduler = scheduler.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { scheduler.run(shutdown).await })
    };
    let maintenance_task = tokio::spawn(async move { maintenance.run(shutdown_rx).await });

    let app = routes::router(AppState::new(store, deployer))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!(
        max_concurrent = config.max_concurrent,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        "Starting server on {}",
        addr
    );

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down, no new jobs will be claimed");
    let _ = shutdown_tx.send(true);
    let _ = scheduler_task.await;
    let _ = maintenance_task.await;

    if tokio::time::timeout(SHUTDOWN_GRACE, scheduler.pool().wait_idle())
        .await
        .is_err()
    {
        warn!(
            in_flight = scheduler.pool().in_flight(),
            "Jobs still running at shutdown"
        );
    }

    Ok(())
}

/// `GAMEGEN_LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("GAMEGEN_LOG_FORMAT").is_ok_and(|format| format == "json");

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
