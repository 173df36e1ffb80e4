//! fleetpack - fleet package reconciliation service
//!
//! One bounded pass per invocation:
//! - walk the group/vehicle directory and index the fleet's devices
//! - collect firmware/configuration telemetry from the MQTT bus in parallel
//! - join both on device id and deduplicate to one canonical package per
//!   configuration class
//! - back the current package table up, then replace it with the new set
//!
//! An interrupt during the collection window stops collecting, not the run.

mod config;
mod directory;
mod firmware;
mod inventory;
mod reconcile;
mod store;
mod telemetry;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().init();

    info!(pid = std::process::id(), "fleetpack starting");
    let cfg = config::load_config().await;

    let client = Arc::new(
        directory::DirectoryClient::new(&cfg.directory.base_url)
            .context("building directory client")?,
    );
    let token = client
        .authenticate(&cfg.directory.username, &cfg.directory.password)
        .await
        .context("authenticating against the directory API")?;

    // Both aggregations run concurrently and independently; reconciliation
    // waits for both. The directory side always drains its queue, the
    // telemetry side stops on signal or timeout.
    let (devices, records) = tokio::join!(
        inventory::collect_devices(Arc::clone(&client), &token, cfg.directory.fetch_workers),
        telemetry::collect(&cfg.mqtt),
    );
    let devices = devices.context("directory aggregation failed")?;
    let records = records.context("telemetry collection failed")?;

    let candidates = reconcile::build_candidates(devices, &records);
    let canonical = reconcile::dedup(candidates);
    let package_count = canonical.len();

    store::persist(&cfg.database, &cfg.backup_dir, canonical)
        .await
        .context("persisting canonical packages")?;

    info!(packages = package_count, "run complete");
    Ok(())
}
