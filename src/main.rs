use std::sync::Arc;

use tracing::info;

use equipalloc::config::Config;
use equipalloc::inventory::MemoryInventory;
use equipalloc::reconciler::Background;
use equipalloc::SyncCoordinator;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    equipalloc::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;

    let inventory = Arc::new(MemoryInventory::load_json(&config.inventory_file)?);
    let coordinator = Arc::new(SyncCoordinator::open(config.coordinator(), inventory.clone())?);

    info!("equipalloc started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  inventory: {}", config.inventory_file.display());
    info!("  allocations loaded: {}", coordinator.registry().len());
    info!("  sync interval: {}s", config.sync_interval_secs);
    info!("  retention: {}s", config.retention_secs);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let background = Background::spawn(&coordinator);

    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    info!("shutdown signal received, stopping background tasks");
    background.abort();

    let report = coordinator.sync_inventory_status().await;
    if !report.failures.is_empty() {
        tracing::warn!("final sync left {} item(s) unsynced", report.failures.len());
    }
    coordinator.registry().flush().await?;
    inventory.save_json(&config.inventory_file)?;

    info!("equipalloc stopped");
    Ok(())
}
