// tablebackup/src/backup/logic.rs
use std::fs;
use tracing::{info, warn};

use crate::backup::db_dump::{dump_command, dump_file_path};
use crate::backup::row_count::verify_row_count;
use crate::backup::s3_upload::upload_dumps;
use crate::config::BackupConfig;
use crate::errors::{AppError, Result};
use crate::orchestrator::{ProcessPool, WorkItem, wait_all};
use crate::storage::BlobTarget;
use crate::utils::artifacts::prepare_log_bundle;
use crate::utils::find_executable;

#[derive(Debug)]
pub struct BackupSummary {
    pub dumped: Vec<String>,
    pub uploaded: bool,
}

/// verify -> dump for every catalog item, then wait for the whole batch, then
/// upload the dumps this batch produced.
///
/// A failing count query stops submission; dumps already running are drained
/// before the error is returned. Failing dumps are reported only after every dump
/// has finished, and all of them are named. Nothing is uploaded unless the whole
/// batch succeeded.
pub async fn perform_backup_orchestration(
    backup_config: &BackupConfig,
    archive: Option<BlobTarget<'_>>,
) -> Result<BackupSummary> {
    let dump_tool = find_executable(&backup_config.dump_tool)?;
    let sql_runner = find_executable(&backup_config.connection.sql_runner)?;
    let backup_dir = &backup_config.local_backup_dir;
    fs::create_dir_all(backup_dir)?;

    let pool = ProcessPool::new(backup_config.max_concurrent_processes);
    info!(
        databases = ?backup_config.databases,
        tables = backup_config.tables.len(),
        max_concurrent = pool.limit(),
        dir = %backup_dir.display(),
        "Starting backup"
    );

    let mut handles = Vec::new();
    let mut dump_paths = Vec::new();
    for database in &backup_config.databases {
        for table in &backup_config.tables {
            let bundle = prepare_log_bundle(backup_dir, database, table)?;

            let verified = verify_row_count(
                &sql_runner,
                &backup_config.connection,
                database,
                table,
                &bundle.row_count_log,
            )
            .await;
            if let Err(e) = verified {
                if !handles.is_empty() {
                    warn!(running = handles.len(), "Row count failed; waiting for dumps already started");
                    wait_all(handles).await;
                }
                return Err(e);
            }

            let dump_path = dump_file_path(backup_dir, table, &bundle.timestamp);
            let command = dump_command(
                &dump_tool,
                backup_config,
                database,
                table,
                &dump_path,
                &bundle,
            );
            info!(database = %database, table = %table, dump = %dump_path.display(), "Creating a dump");
            handles.push(pool.spawn(WorkItem::table(database, table), command).await);
            dump_paths.push(dump_path);
        }
    }

    let batch = wait_all(handles).await;
    if !batch.is_success() {
        return Err(AppError::DumpProcess {
            tables: batch.failed.iter().map(|o| o.item.to_string()).collect(),
        });
    }
    info!(tables = batch.total(), "DUMPING is FINISHED");

    let uploaded = match archive {
        Some(target) => {
            if !upload_dumps(target.store, &dump_paths, target.bucket, target.key_prefix).await {
                return Err(AppError::BlobTransfer(format!(
                    "uploading dumps from {} to bucket {} failed",
                    backup_dir.display(),
                    target.bucket
                )));
            }
            true
        }
        None => {
            info!("No object storage configured; dumps stay local");
            false
        }
    };

    Ok(BackupSummary {
        dumped: batch.succeeded.iter().map(|o| o.item.to_string()).collect(),
        uploaded,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::storage::memory::MemoryBlobStore;
    use crate::utils::test_support::write_script;
    use serial_test::serial;
    use std::path::Path;

    /// Fake `mysqldump` and `mysql` that log what they do to `events.log`.
    /// The dump fails for any table listed in `failing_dumps`, the count query for
    /// any table in `failing_counts`.
    fn setup(dir: &Path, failing_dumps: &str, failing_counts: &str) -> BackupConfig {
        let events = dir.join("events.log");
        let dump_tool = write_script(
            dir,
            "mysqldump",
            &format!(
                r#"out=""
for a in "$@"; do case "$a" in -r*) out="${{a#-r}}";; esac; done
for last; do :; done
echo "dump $last" >> '{events}'
case " {failing} " in *" $last "*) echo "mysqldump: error on $last" >&2; exit 2;; esac
sleep 0.1
echo "-- dump of $last" > "$out"
echo "dumpdone $last" >> '{events}'"#,
                events = events.display(),
                failing = failing_dumps
            ),
        );
        let sql_runner = write_script(
            dir,
            "mysql",
            &format!(
                r#"for last; do :; done
table=$(echo "$last" | sed 's/.*FROM \([^;]*\);/\1/')
echo "count $table" >> '{events}'
case " {failing} " in *" $table "*) exit 1;; esac
echo 7"#,
                events = events.display(),
                failing = failing_counts
            ),
        );

        BackupConfig {
            connection: ConnectionConfig {
                admin_user: "root".to_string(),
                credentials_file: dir.join("my.cnf"),
                host: None,
                sql_runner: sql_runner.display().to_string(),
            },
            databases: vec!["db1".to_string()],
            tables: vec!["t1".to_string(), "t2".to_string()],
            local_backup_dir: dir.join("backups"),
            dump_tool: dump_tool.display().to_string(),
            max_concurrent_processes: 4,
            upload_to_s3: true,
        }
    }

    /// Top-level `.sql` files in the backup directory, sorted.
    fn dump_files(dir: &Path) -> anyhow::Result<Vec<std::path::PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "sql") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn events(dir: &Path) -> Vec<String> {
        std::fs::read_to_string(dir.join("events.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    #[serial]
    async fn test_successful_backup_uploads_every_dump() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = setup(dir.path(), "", "");
        let store = MemoryBlobStore::default();
        let target = BlobTarget {
            store: &store,
            bucket: "backups",
            key_prefix: "rds_backup/sql_files",
        };

        let summary = perform_backup_orchestration(&config, Some(target)).await?;
        assert_eq!(summary.dumped, vec!["db1.t1", "db1.t2"]);
        assert!(summary.uploaded);

        let dumps = dump_files(&config.local_backup_dir)?;
        assert_eq!(dumps.len(), 2);
        let keys = store.keys("backups");
        assert_eq!(keys.len(), 2);
        assert!(keys.iter().all(|k| k.starts_with("rds_backup/sql_files/") && k.ends_with(".sql")));

        let row_count_logs: Vec<_> = walkdir::WalkDir::new(config.local_backup_dir.join("db1"))
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with("_row_count.txt"))
            .collect();
        assert_eq!(row_count_logs.len(), 2);
        for log in row_count_logs {
            assert!(std::fs::read_to_string(log.path())?.contains('7'));
        }
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn test_row_count_precedes_each_dump() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = setup(dir.path(), "", "");
        perform_backup_orchestration(&config, None).await?;

        let events = events(dir.path());
        for table in ["t1", "t2"] {
            let count_at = events.iter().position(|e| *e == format!("count {}", table));
            let dump_at = events.iter().position(|e| *e == format!("dump {}", table));
            assert!(count_at.is_some() && dump_at.is_some(), "events: {:?}", events);
            assert!(count_at < dump_at, "events: {:?}", events);
        }
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn test_failed_dump_is_reported_after_batch_drains() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = setup(dir.path(), "t2", "");
        let store = MemoryBlobStore::default();
        let target = BlobTarget {
            store: &store,
            bucket: "backups",
            key_prefix: "prefix",
        };

        let err = perform_backup_orchestration(&config, Some(target))
            .await
            .unwrap_err();
        match &err {
            AppError::DumpProcess { tables } => assert_eq!(tables, &vec!["db1.t2".to_string()]),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(err.to_string().contains("t2"));

        // t1 still ran to completion before the error surfaced.
        let dumps = dump_files(&config.local_backup_dir)?;
        assert_eq!(dumps.len(), 1);
        assert!(std::fs::read_to_string(&dumps[0])?.contains("dump of t1"));
        assert!(store.put_attempts.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn test_every_failed_table_is_named() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = setup(dir.path(), "t1 t2", "");
        let err = perform_backup_orchestration(&config, None).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::DumpProcess { ref tables } if tables == &vec!["db1.t1".to_string(), "db1.t2".to_string()]
        ));
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn test_row_count_failure_aborts_before_dump() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = setup(dir.path(), "", "t2");

        let result = perform_backup_orchestration(&config, None).await;
        assert!(matches!(result, Err(AppError::QueryExecution { ref table, .. }) if table == "t2"));
        assert!(!events(dir.path()).contains(&"dump t2".to_string()));
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn test_upload_failure_is_blob_transfer_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = setup(dir.path(), "", "");
        let store = MemoryBlobStore {
            fail_put_key_containing: Some(".sql".to_string()),
            ..Default::default()
        };
        let target = BlobTarget {
            store: &store,
            bucket: "backups",
            key_prefix: "prefix",
        };

        let result = perform_backup_orchestration(&config, Some(target)).await;
        assert!(matches!(result, Err(AppError::BlobTransfer(_))));
        assert_eq!(store.put_attempts.lock().unwrap().len(), 1);
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn test_row_count_failure_waits_for_started_dumps() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = setup(dir.path(), "", "t2");

        let result = perform_backup_orchestration(&config, None).await;
        assert!(matches!(result, Err(AppError::QueryExecution { ref table, .. }) if table == "t2"));

        // t1 was already dumping when t2's count failed; it finished before the return.
        let events = events(dir.path());
        assert!(events.contains(&"dumpdone t1".to_string()), "events: {:?}", events);
        let dumps = dump_files(&config.local_backup_dir)?;
        assert_eq!(dumps.len(), 1);
        assert!(std::fs::read_to_string(&dumps[0])?.contains("dump of t1"));
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn test_dumps_from_earlier_runs_are_not_uploaded() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = setup(dir.path(), "", "");
        std::fs::create_dir_all(&config.local_backup_dir)?;
        std::fs::write(config.local_backup_dir.join("t9_01-01-2024_00-00-00-000.sql"), "partial")?;
        let store = MemoryBlobStore::default();
        let target = BlobTarget {
            store: &store,
            bucket: "backups",
            key_prefix: "prefix",
        };

        let summary = perform_backup_orchestration(&config, Some(target)).await?;
        assert!(summary.uploaded);
        let keys = store.keys("backups");
        assert_eq!(keys.len(), 2, "keys: {:?}", keys);
        assert!(keys.iter().all(|k| !k.contains("t9_")));
        Ok(())
    }
}
