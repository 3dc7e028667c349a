pub mod artifacts;
pub mod logging;
pub mod timing;

use crate::errors::{AppError, Result};
use chrono::Local;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use which::which;

/// Resolves a client tool either by name on `PATH` or as an explicit path.
pub fn find_executable(tool: &str) -> Result<PathBuf> {
    which(tool).map_err(|e| {
        AppError::Config(format!(
            "{} executable not found ({}). Please ensure MySQL client tools are installed and in your PATH.",
            tool, e
        ))
    })
}

/// Timestamp used in log bundle and dump file names.
pub fn file_timestamp() -> String {
    Local::now().format("%d-%m-%Y_%H-%M-%S-%3f").to_string()
}

pub fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Rewrites the whole document through a temp file in the same directory.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.write_all(b"\n")?;
    tmp.persist(path).map_err(|e| AppError::Io(e.error))?;
    Ok(())
}

#[cfg(all(test, unix))]
pub(crate) mod test_support {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    /// Writes an executable `/bin/sh` script standing in for a client tool.
    pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }
}
