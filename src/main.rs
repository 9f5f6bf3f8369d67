//! `fleetscored`: runs benchmark rounds on a schedule and records their scores.

use anyhow::Context;
use fleetscore::config::Config;
use fleetscore::runner::{spawn_log_drain, OutputSink, ProcessRunner};
use fleetscore::scheduler::{Scheduler, SchedulerSettings};
use fleetscore::store::ParquetStore;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("fleetscore=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        inventory = %config.inventory_path.display(),
        results = %config.results_path.display(),
        data_dir = %config.data_dir.display(),
        "starting fleetscored"
    );

    let store = ParquetStore::open(&config.data_dir, config.schema.clone())
        .with_context(|| format!("failed to open store in {}", config.data_dir.display()))?;
    let runner = ProcessRunner::from_config(&config)?;

    let (sink, rx) = OutputSink::channel(config.output_buffer);
    let drain = spawn_log_drain(rx);

    let mut scheduler = Scheduler::new(SchedulerSettings::from_config(&config), runner, store, sink);
    scheduler
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for Ctrl-C, running until killed");
                std::future::pending::<()>().await;
            }
        })
        .await;

    drop(scheduler);
    drain.await.context("benchmark output drain panicked")?;
    info!("fleetscored stopped");
    Ok(())
}
