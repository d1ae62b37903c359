//! Long-running mode: periodic house cleaning until Ctrl-C.

use std::path::Path;
use std::time::Duration;

use farm_balancer::{EventHub, HouseCleaning};
use farm_core::FarmConfig;
use tokio::sync::watch;
use tracing::info;

pub async fn run(data_dir: &Path, config: FarmConfig, interval: Option<u64>) -> anyhow::Result<()> {
    info!("farmd starting");

    let store = crate::open_store(data_dir)?;
    let balancer = crate::balancer_for(&store, &config);

    let hub = EventHub::new();
    let _subscription = balancer.attach(&hub);
    info!(
        state = %config.balancer.active_state,
        zero_priority = %config.balancer.zero_priority,
        "balancer attached"
    );

    let interval = interval
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.housekeeping.interval());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cleaner = HouseCleaning::new(hub, interval);
    let cleaning_handle = tokio::spawn(async move { cleaner.run(shutdown_rx).await });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let ticks = cleaning_handle.await?;
    info!(ticks, "farmd stopped");
    Ok(())
}
