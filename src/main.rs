//! Table-level MySQL Backup/Restore Tool
//!
//! Provides CLI interface for backup, restore and row-count operations

// tablebackup/src/main.rs
mod backup;
mod config;
mod errors;
mod orchestrator;
mod restore;
mod storage;
mod utils;

use anyhow::{Context, Result};
use config::{
    AppConfig, OperationConfig, load_backup_config_from_json, load_restore_config_from_json,
    load_row_count_config_from_json,
};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

/// Main entry point for the backup/restore tool
#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = utils::logging::init_tracing() {
        eprintln!("Failed to initialize logging: {:?}", e);
    }

    match run_app().await {
        Ok(_) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = ?e, "Operation failed");
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<()> {
    let config_path = PathBuf::from("config.json");
    let mut app_config = AppConfig::load_from_json(&config_path).context(format!(
        "Failed to load application configuration from {}",
        config_path.display()
    ))?;

    let args: Vec<String> = env::args().collect();
    let choice = if args.len() > 1 {
        args[1].trim().to_string()
    } else {
        prompt_choice()?
    };

    let s3_is_configured = app_config.s3_config.is_some();

    match choice.as_str() {
        "1" | "backup" => {
            println!("🚀 Starting Backup Process...");
            let backup_config =
                load_backup_config_from_json(&app_config.raw_json_config, s3_is_configured)
                    .context("Failed to load backup configuration from JSON")?;
            app_config.operation = Some(OperationConfig::Backup(backup_config));
            backup::run_backup_flow(&app_config)
                .await
                .context("Backup process failed")?;
        }
        "2" | "restore" => {
            println!("🔄 Starting Restore Process...");
            let restore_config =
                load_restore_config_from_json(&app_config.raw_json_config, s3_is_configured)
                    .context("Failed to load restore configuration from JSON")?;
            println!(
                "Restore target: {} (database {})",
                restore_config.cluster_endpoint, restore_config.target_database
            );
            app_config.operation = Some(OperationConfig::Restore(restore_config));
            restore::run_restore_flow(&app_config)
                .await
                .context("Restore process failed")?;
        }
        "3" | "rowcounts" => {
            println!("🔢 Collecting Row Counts...");
            let row_count_config = load_row_count_config_from_json(&app_config.raw_json_config)
                .context("Failed to load row count configuration from JSON")?;
            app_config.operation = Some(OperationConfig::RowCounts(row_count_config));
            restore::run_row_count_flow(&app_config)
                .await
                .context("Row count process failed")?;
        }
        _ => {
            println!(
                "❌ Invalid choice. Please enter '1' (backup), '2' (restore), or '3' (rowcounts)."
            );
            anyhow::bail!("Invalid operation choice");
        }
    }
    Ok(())
}

/// Prompts user to select an operation
///
/// Returns the user's choice as String
fn prompt_choice() -> Result<String> {
    use std::io::{Write, stdin, stdout};

    println!("Select an operation:");
    println!("1. Take Backup (or type 'backup')");
    println!("2. Restore Backup (or type 'restore')");
    println!("3. Row Counts of the restored database (or type 'rowcounts')");
    print!("Enter your choice: ");
    stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    stdin()
        .read_line(&mut input)
        .context("Failed to read user input")?;
    Ok(input.trim().to_string())
}
