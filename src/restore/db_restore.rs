// tablebackup/src/restore/db_restore.rs
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use tracing::warn;

use crate::config::RestoreConfig;
use crate::orchestrator::CommandSpec;
use crate::utils::artifacts::LogBundle;

/// Feeds `sql_file` to the SQL runner on stdin against the target cluster.
/// Output is appended to the item's logs so reruns keep earlier attempts.
pub fn restore_command(
    sql_runner: &Path,
    restore_config: &RestoreConfig,
    sql_file: &Path,
    bundle: &LogBundle,
) -> CommandSpec {
    CommandSpec::new(sql_runner, &bundle.out_log, &bundle.err_log)
        .arg(format!(
            "--defaults-extra-file={}",
            restore_config.connection.credentials_file.display()
        ))
        .arg("-vv")
        .arg("-h")
        .arg(&restore_config.cluster_endpoint)
        .arg("-D")
        .arg(&restore_config.target_database)
        .arg("--max-allowed-packet=256M")
        .stdin_from(sql_file)
        .append_output()
}

/// All `.sql` files below `dir`, recursively, in sorted order. A missing
/// directory is an empty phase.
pub fn discover_sql_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    if !dir.exists() {
        warn!(dir = %dir.display(), "Restore directory does not exist; nothing to restore");
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        let is_sql = entry.path().extension().is_some_and(|ext| ext == "sql");
        if entry.file_type().is_file() && is_sql {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Path of `file` below the phase directory it was discovered in.
pub fn relative_input_path(dir: &Path, file: &Path) -> PathBuf {
    match file.strip_prefix(dir) {
        Ok(relative) if !relative.as_os_str().is_empty() => relative.to_path_buf(),
        _ => file.file_name().map(PathBuf::from).unwrap_or_else(|| file.to_path_buf()),
    }
}

/// `{phase}/{relative path}` with `/` separators, unique per input within a run.
pub fn timing_key(phase: &str, relative: &Path) -> String {
    let mut key = phase.to_string();
    for component in relative.components() {
        key.push('/');
        key.push_str(&component.as_os_str().to_string_lossy());
    }
    key
}
