use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use striker::alerts::LogSink;
use striker::config::AppConfig;
use striker::feed::JsonFileFeed;
use striker::logging;
use striker::persistence::{CsvPersistence, StateStore};
use striker::scheduler;
use striker::Engine;

#[tokio::main]
async fn main() -> Result<()> {
    // Load and validate configuration (.env is read first).
    let config = AppConfig::load()?;
    logging::init_tracing(&config.logging)?;

    let engine_config = config.validate()?;
    let schedule = config.schedule()?;

    info!(
        tag = %config.engine.tag,
        data_dir = %config.engine.data_dir,
        digest = %config,
        "Striker starting"
    );

    let feed = Arc::new(JsonFileFeed::new(&config.feed.snapshot_path));
    let mut engine = Engine::new(engine_config, feed)?
        .with_sink(Arc::new(LogSink))
        .with_state_store(StateStore::new(config.state_path()))
        .with_status_file(config.status_path());

    if config.persistence.csv_enabled {
        let csv = CsvPersistence::new(config.data_dir()).context("Failed to open CSV records")?;
        engine = engine.with_csv(csv);
    }

    let restored = engine
        .restore_from_store()
        .context("Failed to restore engine state")?;
    info!(
        restored,
        cycle = engine.cycle(),
        regime = %engine.regime_state().regime,
        open_positions = engine.open_positions().len(),
        "Engine ready"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    if let Err(e) = scheduler::run(&mut engine, &schedule, shutdown_rx).await {
        error!(error = %e, "Engine stopped on invariant violation");
        return Err(e.into());
    }

    let summary = engine.tracker().summary();
    info!(
        trades = summary.trades,
        win_rate = summary.win_rate,
        total_pnl = summary.total_pnl,
        "Striker stopped"
    );
    Ok(())
}
