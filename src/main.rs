use std::sync::Arc;
use std::time::Duration;
use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};
use signal_infra::api::{create_router, ApiState};
use signal_infra::cache::{DurableStore, FileDurableStore, MemoryDurableStore};
use signal_infra::config::{AppConfig, DurableBackend};
use signal_infra::core::{ArtifactWriter, Orchestrator, Scheduler};
use signal_infra::observability::{metrics, tracing::init_tracing};
use signal_infra::sources::AdapterRegistry;
use signal_infra::utils::task_supervisor::TaskSupervisor;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);
const SUPERVISOR_INTERVAL: Duration = Duration::from_secs(30);
const HTTP_TIMEOUT: Duration = Duration::from_secs(20);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = std::env::args().nth(1).unwrap_or_else(|| "default".to_string());
    let config = AppConfig::load(&env).context("loading configuration")?;

    init_tracing(&config.logging)?;
    metrics::register_metrics()?;
    info!(
        "Starting signal-infra ({}): {} instruments, {} providers",
        env,
        config.instruments.len(),
        config.enabled_providers().count()
    );

    let client = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("signal-infra/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building HTTP client")?;
    let registry = AdapterRegistry::from_config(&config.providers, client)?;

    let durable: Arc<dyn DurableStore> = match config.cache.durable_backend {
        DurableBackend::File => Arc::new(
            FileDurableStore::open(&config.cache.durable_dir)
                .await
                .with_context(|| format!("opening durable store {:?}", config.cache.durable_dir))?,
        ),
        DurableBackend::Memory => {
            warn!("Durable store is in memory; history is lost on restart");
            Arc::new(MemoryDurableStore::new())
        }
    };
    durable.health_check().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let writer = ArtifactWriter::new(&config.artifacts);
    let restored = writer.load_latest().await;
    let orchestrator = Orchestrator::from_config(&config, registry, durable, shutdown_rx.clone())?
        .with_artifacts(writer);
    match restored {
        Ok(Some(cycle)) => orchestrator.restore(cycle).await,
        Ok(None) => info!("No published cycle on disk yet"),
        Err(e) => warn!("Ignoring unreadable cycle artifact: {}", e),
    }
    let orchestrator = Arc::new(orchestrator);

    let mut supervisor = TaskSupervisor::new();
    supervisor.spawn("scheduler", Scheduler::new(orchestrator.clone(), &config.scheduler).run());

    if config.api.enabled {
        let listener = tokio::net::TcpListener::bind(config.api.bind)
            .await
            .with_context(|| format!("binding API on {}", config.api.bind))?;
        info!("API listening on {}", config.api.bind);

        let router = create_router(Arc::new(ApiState { orchestrator: orchestrator.clone() }));
        let mut stop = shutdown_rx.clone();
        supervisor.spawn("api", async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = stop.wait_for(|stopping| *stopping).await;
                })
                .await;
            if let Err(e) = served {
                error!("API server failed: {}", e);
            }
        });
    }

    let mut supervise = tokio::time::interval(SUPERVISOR_INTERVAL);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
            _ = supervise.tick() => {
                if let Err(e) = supervisor.check_health() {
                    error!("Stopping: {}", e);
                    break;
                }
            }
        }
    }

    let _ = shutdown_tx.send(true);
    supervisor.shutdown(SHUTDOWN_GRACE).await;
    info!("signal-infra stopped");
    Ok(())
}
