mod logic;
pub(crate) mod db_dump;
pub(crate) mod row_count;
pub(crate) mod s3_upload;

use anyhow::{Context, Result};
use tracing::info;
use crate::config::AppConfig;
use crate::storage::{BlobTarget, S3BlobStore};

/// Public entry point for the backup process.
pub async fn run_backup_flow(app_config: &AppConfig) -> Result<()> {
    let backup_config = match &app_config.operation {
        Some(crate::config::OperationConfig::Backup(cfg)) => cfg,
        _ => anyhow::bail!("Backup operation selected but no backup configuration found."),
    };

    let s3_config = app_config
        .s3_config
        .as_ref()
        .filter(|_| backup_config.upload_to_s3);
    let store = match s3_config {
        Some(cfg) => Some(S3BlobStore::connect(cfg).await),
        None => None,
    };
    let archive = store.as_ref().zip(s3_config).map(|(store, cfg)| BlobTarget {
        store,
        bucket: &cfg.bucket_name,
        key_prefix: &cfg.key_prefix,
    });

    let summary = logic::perform_backup_orchestration(backup_config, archive)
        .await
        .context("Backup orchestration failed")?;
    info!(
        tables = summary.dumped.len(),
        uploaded = summary.uploaded,
        "Backup finished"
    );
    Ok(())
}
