// ABOUTME: Entry point for the strongbox binary.
// ABOUTME: Loads configuration, initializes tracing, bootstraps persistence and reports the on-disk layout.

use anyhow::Context;
use strongbox_store::{PersistenceService, StrongboxConfig, scan_layout};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("strongbox=debug")),
        )
        .init();

    let config = StrongboxConfig::from_env().context("invalid configuration")?;
    tracing::info!(base_dir = %config.base_dir.display(), "strongbox starting up");

    let service = PersistenceService::new(config).context("could not start io worker")?;

    let summary = service.read_all_persisted().await;
    if !summary.all_succeeded() {
        tracing::warn!(failed = summary.failed, "some stores could not be loaded");
    }

    let layout = scan_layout(service.base_dir())
        .with_context(|| format!("could not scan {}", service.base_dir().display()))?;
    for category in &layout.categories {
        tracing::info!(
            category = %category.category,
            stores = category.stores.len(),
            backups = category.backups,
            stale_temps = category.stale_temps,
            quarantined = category.quarantined,
            "category layout"
        );
        for store in &category.stores {
            tracing::debug!(category = %category.category, store = %store, "store file");
        }
    }
    tracing::info!(
        stores = layout.store_count(),
        quarantined = layout.quarantined_count(),
        "layout scanned"
    );

    service.shutdown().await;
    Ok(())
}
