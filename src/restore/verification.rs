// tablebackup/src/restore/verification.rs
//! Row-count report for a restored database, used to compare against the counts
//! captured before each dump.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{error, info};

use crate::backup::row_count::count_query;
use crate::config::RowCountConfig;
use crate::errors::{AppError, Result};
use crate::utils::{file_timestamp, write_json_atomic};

#[derive(Debug)]
pub struct RowCountReport {
    pub path: PathBuf,
    pub counts: BTreeMap<String, u64>,
    pub failed: Vec<String>,
}

/// Counts every catalog table and rewrites the report after each one. A table
/// whose query fails is logged and left out of the report.
pub async fn collect_row_counts(sql_runner: &Path, config: &RowCountConfig) -> Result<RowCountReport> {
    fs::create_dir_all(&config.output_dir)?;
    let host = config.connection.host.as_deref().unwrap_or("localhost");
    let path = config
        .output_dir
        .join(format!("row_counts_{}_{}.json", host, file_timestamp()));

    let mut report = RowCountReport {
        path,
        counts: BTreeMap::new(),
        failed: Vec::new(),
    };

    for table in &config.tables {
        match query_row_count(sql_runner, config, table).await {
            Ok(count) => {
                info!(database = %config.database, table = %table, count, "Row count");
                report.counts.insert(table.clone(), count);
                write_json_atomic(&report.path, &report.counts)?;
            }
            Err(e) => {
                error!(database = %config.database, table = %table, error = %e, "Row count failed; skipping table");
                report.failed.push(table.clone());
            }
        }
    }

    info!(
        path = %report.path.display(),
        counted = report.counts.len(),
        failed = report.failed.len(),
        "Row count report finished"
    );
    Ok(report)
}

async fn query_row_count(sql_runner: &Path, config: &RowCountConfig, table: &str) -> Result<u64> {
    let query = count_query(table);
    let query_error = |reason: String| AppError::QueryExecution {
        database: config.database.clone(),
        table: table.to_string(),
        query: query.clone(),
        reason,
    };

    let mut cmd = Command::new(sql_runner);
    cmd.arg(format!(
        "--defaults-extra-file={}",
        config.connection.credentials_file.display()
    ));
    if let Some(host) = &config.connection.host {
        cmd.arg("-h").arg(host);
    }
    cmd.arg("-D")
        .arg(&config.database)
        .arg(format!("-u{}", config.connection.admin_user))
        .arg("-sN")
        .arg(format!("--execute={}", query))
        .stdin(Stdio::null());

    let output = cmd
        .output()
        .await
        .map_err(|e| query_error(format!("failed to start {}: {}", sql_runner.display(), e)))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(query_error(format!("{}: {}", output.status, stderr.trim())));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .trim()
        .parse::<u64>()
        .map_err(|e| query_error(format!("unexpected output {:?}: {}", stdout.trim(), e)))
}
