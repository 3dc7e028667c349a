mod logic;
pub(crate) mod db_restore;
pub(crate) mod s3_download;
pub(crate) mod verification;

use anyhow::{Context, Result};
use tracing::{info, warn};
use crate::config::{AppConfig, OperationConfig};
use crate::storage::{BlobStore, S3BlobStore};
use crate::utils::find_executable;

/// Public entry point for the restore process.
pub async fn run_restore_flow(app_config: &AppConfig) -> Result<()> {
    let restore_config = match &app_config.operation {
        Some(OperationConfig::Restore(cfg)) => cfg,
        _ => anyhow::bail!("Restore operation selected but no restore configuration found."),
    };

    let s3_config = app_config
        .s3_config
        .as_ref()
        .filter(|_| restore_config.download_from_s3);
    let store = match s3_config {
        Some(cfg) => Some(S3BlobStore::connect(cfg).await),
        None => None,
    };
    let archive = store
        .as_ref()
        .zip(s3_config)
        .map(|(store, cfg)| (store as &dyn BlobStore, cfg.bucket_name.as_str()));

    let summary = logic::perform_restore_orchestration(restore_config, archive)
        .await
        .context("Restore orchestration failed")?;

    println!("{}", serde_json::to_string_pretty(&summary.timings)?);
    let failed = summary.failed_files();
    if failed.is_empty() {
        info!(
            schema_files = summary.schema.total(),
            data_files = summary.data.total(),
            "Restore finished"
        );
    } else {
        warn!(failed = ?failed, "Restore finished with failed files; check their logs");
    }
    Ok(())
}

/// Public entry point for the row-count report.
pub async fn run_row_count_flow(app_config: &AppConfig) -> Result<()> {
    let row_count_config = match &app_config.operation {
        Some(OperationConfig::RowCounts(cfg)) => cfg,
        _ => anyhow::bail!("Row count operation selected but no row count configuration found."),
    };

    let sql_runner = find_executable(&row_count_config.connection.sql_runner)?;
    let report = verification::collect_row_counts(&sql_runner, row_count_config)
        .await
        .context("Row count report failed")?;

    println!("{}", serde_json::to_string_pretty(&report.counts)?);
    if !report.failed.is_empty() {
        warn!(failed = ?report.failed, "Some tables could not be counted");
    }
    Ok(())
}
