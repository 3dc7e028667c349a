// tablebackup/src/utils/artifacts.rs
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::errors::Result;
use crate::utils::file_timestamp;

/// Per-work-item log targets, all under `{root}/{database}/{table}/logs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBundle {
    pub timestamp: String,
    pub out_log: PathBuf,
    pub err_log: PathBuf,
    pub row_count_log: PathBuf,
}

/// Creates the log directory for `database`/`table` and touches its three log
/// files with a fresh timestamp. Existing files are left untouched.
pub fn prepare_log_bundle(root: &Path, database: &str, table: &str) -> Result<LogBundle> {
    prepare_log_bundle_at(&root.join(database).join(table), table, file_timestamp())
}

/// Bundle for a restore input under `{root}/{database}/{relative_file}/logs`, so
/// same-named files in different directories get separate logs.
pub fn prepare_file_log_bundle(root: &Path, database: &str, relative_file: &Path) -> Result<LogBundle> {
    let name = relative_file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| relative_file.display().to_string());
    prepare_log_bundle_at(&root.join(database).join(relative_file), &name, file_timestamp())
}

fn prepare_log_bundle_at(item_dir: &Path, name: &str, timestamp: String) -> Result<LogBundle> {
    let logs_dir = item_dir.join("logs");
    fs::create_dir_all(&logs_dir)?;

    let bundle = LogBundle {
        out_log: logs_dir.join(format!("{}_{}_out.txt", name, timestamp)),
        err_log: logs_dir.join(format!("{}_{}_err.txt", name, timestamp)),
        row_count_log: logs_dir.join(format!("{}_{}_row_count.txt", name, timestamp)),
        timestamp,
    };

    for path in [&bundle.out_log, &bundle.err_log, &bundle.row_count_log] {
        touch(path)?;
    }
    debug!(item = name, logs = %logs_dir.display(), "Prepared log bundle");
    Ok(bundle)
}

fn touch(path: &Path) -> Result<()> {
    OpenOptions::new().create(true).append(true).open(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_layout_and_files_exist() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let bundle = prepare_log_bundle(root.path(), "db1", "orders")?;

        let logs_dir = root.path().join("db1").join("orders").join("logs");
        assert!(logs_dir.is_dir());
        for path in [&bundle.out_log, &bundle.err_log, &bundle.row_count_log] {
            assert!(path.is_file());
            assert_eq!(path.parent(), Some(logs_dir.as_path()));
        }
        let out_name = bundle.out_log.file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(out_name, format!("orders_{}_out.txt", bundle.timestamp));
        Ok(())
    }

    #[test]
    fn test_existing_files_are_not_truncated() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let item_dir = root.path().join("db1").join("t1");
        let first = prepare_log_bundle_at(&item_dir, "t1", "ts".to_string())?;
        fs::write(&first.err_log, "earlier output")?;

        let second = prepare_log_bundle_at(&item_dir, "t1", "ts".to_string())?;
        assert_eq!(first, second);
        assert_eq!(fs::read_to_string(&second.err_log)?, "earlier output");
        Ok(())
    }

    #[test]
    fn test_fresh_timestamp_per_call() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let first = prepare_log_bundle(root.path(), "db1", "t1")?;
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = prepare_log_bundle(root.path(), "db1", "t1")?;
        assert_ne!(first.out_log, second.out_log);
        Ok(())
    }

    #[test]
    fn test_same_named_files_get_separate_log_dirs() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let a = prepare_file_log_bundle(root.path(), "db1", Path::new("schema/db_a/orders.sql"))?;
        let b = prepare_file_log_bundle(root.path(), "db1", Path::new("schema/db_b/orders.sql"))?;

        assert_eq!(
            a.out_log.parent(),
            Some(root.path().join("db1/schema/db_a/orders.sql/logs").as_path())
        );
        assert_eq!(
            b.out_log.parent(),
            Some(root.path().join("db1/schema/db_b/orders.sql/logs").as_path())
        );
        let out_name = a.out_log.file_name().unwrap().to_string_lossy().to_string();
        assert!(out_name.starts_with("orders.sql_"));
        Ok(())
    }
}
