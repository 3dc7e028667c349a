// tablebackup/src/backup/row_count.rs
use std::fs::File;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::config::ConnectionConfig;
use crate::errors::{AppError, Result};

pub fn count_query(table: &str) -> String {
    format!("SELECT COUNT(*) FROM {};", table)
}

/// Runs `SELECT COUNT(*)` for `table` through the SQL runner and blocks until it
/// exits, with stdout and stderr both captured in `output_path`.
pub async fn verify_row_count(
    sql_runner: &Path,
    connection: &ConnectionConfig,
    database: &str,
    table: &str,
    output_path: &Path,
) -> Result<()> {
    let query = count_query(table);
    let query_error = |reason: String| AppError::QueryExecution {
        database: database.to_string(),
        table: table.to_string(),
        query: query.clone(),
        reason,
    };

    let output = File::create(output_path)?;
    let errors = output.try_clone()?;

    let mut cmd = Command::new(sql_runner);
    cmd.arg(format!(
        "--defaults-extra-file={}",
        connection.credentials_file.display()
    ))
    .arg("--verbose");
    if let Some(host) = &connection.host {
        cmd.arg("-h").arg(host);
    }
    cmd.arg(format!("-u{}", connection.admin_user))
        .arg(database)
        .arg(format!("--execute={}", query))
        .stdin(Stdio::null())
        .stdout(Stdio::from(output))
        .stderr(Stdio::from(errors));

    info!(database, table, query = %query, "Taking row count before dump");
    let status = cmd
        .status()
        .await
        .map_err(|e| query_error(format!("failed to start {}: {}", sql_runner.display(), e)))?;

    if !status.success() {
        error!(database, table, %status, output = %output_path.display(), "Row count query failed");
        return Err(query_error(format!("{}", status)));
    }
    debug!(database, table, output = %output_path.display(), "Row count stored");
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::utils::test_support::write_script;
    use serial_test::serial;
    use std::fs;
    use std::path::PathBuf;

    fn connection(host: Option<&str>) -> ConnectionConfig {
        ConnectionConfig {
            admin_user: "root".to_string(),
            credentials_file: PathBuf::from("/root/.my.prod.cnf"),
            host: host.map(str::to_string),
            sql_runner: "mysql".to_string(),
        }
    }

    #[tokio::test]
    #[serial]
    async fn test_count_output_and_args_are_captured() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let runner = write_script(dir.path(), "mysql", r#"echo "$@"; echo 42; echo warn >&2"#);
        let output = dir.path().join("row_count.txt");

        verify_row_count(&runner, &connection(Some("db.internal")), "db1", "orders", &output).await?;

        let text = fs::read_to_string(&output)?;
        assert!(text.contains(
            "--defaults-extra-file=/root/.my.prod.cnf --verbose -h db.internal -uroot db1 --execute=SELECT COUNT(*) FROM orders;"
        ));
        assert!(text.contains("42"));
        assert!(text.contains("warn"));
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn test_non_zero_exit_is_query_execution_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let runner = write_script(dir.path(), "mysql", "echo 'ERROR 1146' >&2; exit 1");
        let output = dir.path().join("row_count.txt");

        let err = verify_row_count(&runner, &connection(None), "db1", "missing", &output)
            .await
            .unwrap_err();
        match err {
            AppError::QueryExecution { table, query, .. } => {
                assert_eq!(table, "missing");
                assert_eq!(query, "SELECT COUNT(*) FROM missing;");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(fs::read_to_string(&output)?.contains("ERROR 1146"));
        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn test_missing_runner_is_query_execution_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let output = dir.path().join("row_count.txt");
        let result = verify_row_count(
            &dir.path().join("no-mysql"),
            &connection(None),
            "db1",
            "orders",
            &output,
        )
        .await;
        assert!(matches!(result, Err(AppError::QueryExecution { .. })));
        Ok(())
    }
}
