//! Persistence pipeline for canonical packages.
//!
//! Step order: back the current table up to a datestamped CSV export, clear
//! the table, reset the key sequence once, then insert through a bounded
//! worker pool. The backup write is the safe abort point: it fails before
//! any mutation. Per-row insert failures are logged and skipped.

use crate::config::DatabaseConfig;
use crate::reconcile::Package;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

const MAX_CONNECTIONS: u32 = 10;
const CONNECTION_LIFETIME: Duration = Duration::from_secs(10 * 60);

/// Export columns, in table order.
const COLUMNS: [&str; 13] = [
    "packagecode",
    "groupid",
    "modelid",
    "groupname",
    "modelname",
    "hardwareversion",
    "networkprovider",
    "mainfirmware",
    "coprocfirmware",
    "mainsettingsid",
    "plsign",
    "coprocsettingname",
    "updatedby",
];

#[derive(Debug, sqlx::FromRow)]
struct PackageRow {
    packagecode: Option<i64>,
    groupid: Option<i64>,
    modelid: Option<i64>,
    groupname: Option<String>,
    modelname: Option<String>,
    hardwareversion: Option<String>,
    networkprovider: Option<String>,
    mainfirmware: Option<String>,
    coprocfirmware: Option<String>,
    mainsettingsid: Option<String>,
    plsign: Option<String>,
    coprocsettingname: Option<String>,
    updatedby: Option<String>,
}

/// Runs the full backup-clear-insert cycle and releases the pool.
pub async fn persist(cfg: &DatabaseConfig, backup_dir: &str, packages: Vec<Package>) -> Result<()> {
    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .max_lifetime(CONNECTION_LIFETIME)
        .connect(&cfg.url)
        .await
        .context("connecting to the package store")?;

    let result = run_pipeline(&pool, cfg, backup_dir, packages).await;
    pool.close().await;
    result
}

async fn run_pipeline(
    pool: &PgPool,
    cfg: &DatabaseConfig,
    backup_dir: &str,
    packages: Vec<Package>,
) -> Result<()> {
    let backup_path = backup_table(pool, backup_dir)
        .await
        .context("backing up the package table")?;
    info!(path = %backup_path.display(), "backup written");

    sqlx::query("DELETE FROM packages")
        .execute(pool)
        .await
        .context("clearing the package table")?;

    // One global reset, before any insert worker starts.
    sqlx::query(
        "SELECT setval(pg_get_serial_sequence('packages', 'packagecode'), \
         COALESCE(MAX(packagecode), 1)) FROM packages",
    )
    .execute(pool)
    .await
    .context("resetting the package sequence")?;

    insert_packages(pool, cfg, packages).await;
    Ok(())
}

/// Streams the current table to a datestamped CSV file. Multiple runs on
/// one day overwrite the same file.
async fn backup_table(pool: &PgPool, backup_dir: &str) -> Result<PathBuf> {
    let rows: Vec<PackageRow> = sqlx::query_as(
        "SELECT packagecode, groupid, modelid, groupname, modelname, hardwareversion, \
         networkprovider, mainfirmware, coprocfirmware, mainsettingsid, plsign, \
         coprocsettingname, updatedby FROM packages",
    )
    .fetch_all(pool)
    .await
    .context("reading rows for backup")?;

    let date = chrono::Local::now().format("%Y_%m_%d");
    let path = Path::new(backup_dir).join(format!("package_backup_{date}.csv"));
    write_backup_file(&path, &rows).await?;
    info!(rows = rows.len(), "table backed up");
    Ok(path)
}

async fn write_backup_file(path: &Path, rows: &[PackageRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating backup dir {}", parent.display()))?;
    }
    tokio::fs::write(path, render_csv(rows))
        .await
        .with_context(|| format!("writing backup file {}", path.display()))
}

fn render_csv(rows: &[PackageRow]) -> String {
    let mut out = String::new();
    out.push_str(&COLUMNS.join(","));
    out.push('\n');
    for row in rows {
        let cells = [
            optional_number(row.packagecode),
            optional_number(row.groupid),
            optional_number(row.modelid),
            optional_text(&row.groupname),
            optional_text(&row.modelname),
            optional_text(&row.hardwareversion),
            optional_text(&row.networkprovider),
            optional_text(&row.mainfirmware),
            optional_text(&row.coprocfirmware),
            optional_text(&row.mainsettingsid),
            optional_text(&row.plsign),
            optional_text(&row.coprocsettingname),
            optional_text(&row.updatedby),
        ];
        let escaped: Vec<String> = cells.iter().map(|c| escape_csv(c)).collect();
        out.push_str(&escaped.join(","));
        out.push('\n');
    }
    out
}

fn optional_number(value: Option<i64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn optional_text(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

/// Quotes cells containing commas, quotes or newlines, doubling any
/// embedded quotes.
fn escape_csv(cell: &str) -> String {
    if cell.contains(',') || cell.contains('"') || cell.contains('\n') {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

/// Inserts packages through a bounded worker pool over a pre-filled queue.
/// Failed rows are logged with the offending record and do not stop the
/// other insertions.
async fn insert_packages(pool: &PgPool, cfg: &DatabaseConfig, packages: Vec<Package>) {
    let total = packages.len();
    let queue: Arc<Mutex<VecDeque<Package>>> = Arc::new(Mutex::new(packages.into()));
    let inserted = Arc::new(Mutex::new(0usize));

    let mut workers = JoinSet::new();
    for _ in 0..cfg.insert_workers.max(1) {
        let pool = pool.clone();
        let queue = Arc::clone(&queue);
        let inserted = Arc::clone(&inserted);
        let updated_by = cfg.updated_by.clone();
        workers.spawn(async move {
            loop {
                let package = match queue.lock().pop_front() {
                    Some(package) => package,
                    None => break,
                };
                match insert_package(&pool, &package, &updated_by).await {
                    Ok(()) => *inserted.lock() += 1,
                    Err(e) => {
                        error!(device = %package.device_no, record = ?package, error = %e,
                               "package insert failed");
                    }
                }
            }
        });
    }
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "insert worker panicked");
        }
    }

    let inserted = *inserted.lock();
    info!(inserted, failed = total - inserted, "package insertion complete");
}

async fn insert_package(pool: &PgPool, package: &Package, updated_by: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO packages (groupid, modelid, groupname, modelname, hardwareversion, \
         networkprovider, mainfirmware, coprocfirmware, mainsettingsid, plsign, \
         coprocsettingname, updatedby) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
    )
    .bind(package.group_id)
    .bind(package.model_id)
    .bind(&package.group_names)
    .bind(&package.model)
    .bind(&package.hw_version)
    .bind(&package.sim)
    .bind(&package.laf_firmware)
    .bind(&package.can_firmware)
    .bind(&package.iot_settings_signed)
    .bind(&package.pl_sign)
    .bind(&package.coproc_setting)
    .bind(updated_by)
    .execute(pool)
    .await?;
    Ok(())
}
