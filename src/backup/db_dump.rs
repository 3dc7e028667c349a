// tablebackup/src/backup/db_dump.rs
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::config::BackupConfig;
use crate::orchestrator::CommandSpec;
use crate::utils::artifacts::LogBundle;

pub const DUMP_EXTENSION: &str = "sql";

/// `{table}_{timestamp}.sql`, placed directly in the backup directory.
pub fn dump_file_path(backup_dir: &Path, table: &str, timestamp: &str) -> PathBuf {
    backup_dir.join(format!("{}_{}.{}", table, timestamp, DUMP_EXTENSION))
}

/// Builds a consistent, single-transaction, primary-key-ordered dump of one table.
/// Progress output goes to the bundle's out/err logs; the dump itself to `dump_path`.
pub fn dump_command(
    dump_tool: &Path,
    backup_config: &BackupConfig,
    database: &str,
    table: &str,
    dump_path: &Path,
    bundle: &LogBundle,
) -> CommandSpec {
    let connection = &backup_config.connection;
    let mut command = CommandSpec::new(dump_tool, &bundle.out_log, &bundle.err_log).args([
        format!(
            "--defaults-extra-file={}",
            connection.credentials_file.display()
        ),
        "--verbose".to_string(),
        "--master-data=2".to_string(),
        "--single-transaction".to_string(),
        "--set-gtid-purged=OFF".to_string(),
        "--skip-extended-insert".to_string(),
        "--order-by-primary".to_string(),
        "--max-allowed-packet=256M".to_string(),
    ]);
    if let Some(host) = &connection.host {
        command = command.arg("-h").arg(host);
    }

    let mut result_file = OsString::from("-r");
    result_file.push(dump_path.as_os_str());

    command
        .arg(result_file)
        .arg(format!("-u{}", connection.admin_user))
        .arg(database)
        .arg(table)
}
