// tablebackup/src/restore/logic.rs
use std::fs;
use std::path::Path;
use tracing::{error, info};

use crate::config::RestoreConfig;
use crate::errors::{AppError, Result};
use crate::orchestrator::{BatchOutcome, ProcessOutcome, ProcessPool, WorkItem, wait_all};
use crate::restore::db_restore::{discover_sql_files, relative_input_path, restore_command, timing_key};
use crate::restore::s3_download::download_prefix;
use crate::storage::BlobStore;
use crate::utils::artifacts::prepare_file_log_bundle;
use crate::utils::find_executable;
use crate::utils::timing::{TimingMap, TimingTracker};

#[derive(Debug)]
pub struct RestoreSummary {
    pub schema: BatchOutcome,
    pub data: BatchOutcome,
    pub timings: TimingMap,
}

impl RestoreSummary {
    pub fn failed_files(&self) -> Vec<String> {
        let mut failed = self.schema.failed_labels();
        failed.extend(self.data.failed_labels());
        failed
    }
}

/// download -> schema phase -> data phase.
///
/// Download failures abort the run. Failing restore files are logged and the run
/// carries on; the schema phase is fully drained before any data file starts.
pub async fn perform_restore_orchestration(
    restore_config: &RestoreConfig,
    archive: Option<(&dyn BlobStore, &str)>,
) -> Result<RestoreSummary> {
    let sql_runner = find_executable(&restore_config.connection.sql_runner)?;
    fs::create_dir_all(&restore_config.local_backup_dir)?;

    if restore_config.download_from_s3 {
        let Some((store, bucket)) = archive else {
            return Err(AppError::Config(
                "download_from_s3 is enabled but no object store is available".to_string(),
            ));
        };
        for (key_prefix, local_root) in [
            (&restore_config.schema_key_prefix, &restore_config.schema_dir),
            (&restore_config.data_key_prefix, &restore_config.data_dir),
        ] {
            download_phase(store, bucket, key_prefix.as_deref(), local_root).await?;
        }
    }

    let timing_path = restore_config
        .local_backup_dir
        .join(format!("time_data_{}.json", restore_config.cluster_endpoint));
    let tracker = TimingTracker::start(timing_path);
    let pool = ProcessPool::new(restore_config.max_concurrent_processes);

    info!(
        endpoint = %restore_config.cluster_endpoint,
        database = %restore_config.target_database,
        max_concurrent = pool.limit(),
        "Starting restore"
    );

    let schema = run_restore_phase(
        "schema",
        &restore_config.schema_dir,
        &sql_runner,
        restore_config,
        &pool,
        &tracker,
    )
    .await?;
    info!(files = schema.total(), failed = schema.failed.len(), "Schema restore is complete");

    let data = run_restore_phase(
        "data",
        &restore_config.data_dir,
        &sql_runner,
        restore_config,
        &pool,
        &tracker,
    )
    .await?;
    info!(files = data.total(), failed = data.failed.len(), "Data restore is complete");

    let timing_path = tracker.path().to_path_buf();
    let timings = tracker.shutdown().await?;
    info!(path = %timing_path.display(), entries = timings.len(), "Timing data saved");

    Ok(RestoreSummary {
        schema,
        data,
        timings,
    })
}

async fn download_phase(
    store: &dyn BlobStore,
    bucket: &str,
    key_prefix: Option<&str>,
    local_root: &Path,
) -> Result<()> {
    let Some(key_prefix) = key_prefix else {
        return Err(AppError::Config(format!(
            "no key prefix configured for downloading into {}",
            local_root.display()
        )));
    };
    fs::create_dir_all(local_root)?;
    if !download_prefix(store, bucket, key_prefix, local_root).await {
        return Err(AppError::BlobTransfer(format!(
            "downloading s3://{}/{} into {} failed",
            bucket,
            key_prefix,
            local_root.display()
        )));
    }
    Ok(())
}

/// Restores every `.sql` file under `dir` and drains the batch. Each file is timed
/// from the moment it gets a worker slot until its process exits, keyed by its
/// path relative to `dir`.
async fn run_restore_phase(
    phase: &str,
    dir: &Path,
    sql_runner: &Path,
    restore_config: &RestoreConfig,
    pool: &ProcessPool,
    tracker: &TimingTracker,
) -> Result<BatchOutcome> {
    let files = discover_sql_files(dir)?;
    info!(phase, files = files.len(), dir = %dir.display(), "Starting restore phase");

    let database = &restore_config.target_database;
    let mut handles = Vec::with_capacity(files.len());
    for file in &files {
        let relative = relative_input_path(dir, file);
        let bundle = prepare_file_log_bundle(
            &restore_config.local_backup_dir,
            database,
            &Path::new(phase).join(&relative),
        )?;
        let command = restore_command(sql_runner, restore_config, file, &bundle);
        let key = timing_key(phase, &relative);

        info!(phase, file = %file.display(), "Restoring");
        let handle = pool
            .spawn_observed(WorkItem::file(database, file), command, || {
                let timing = tracker.record(&key);
                move |_: &ProcessOutcome| timing.finish()
            })
            .await;
        handles.push(handle);
    }

    let batch = wait_all(handles).await;
    for outcome in &batch.failed {
        error!(phase, item = %outcome.item, "Restore failed; continuing with remaining files");
    }
    Ok(batch)
}
