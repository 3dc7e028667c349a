// tablebackup/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const DEFAULT_MAX_CONCURRENT_PROCESSES: usize = 8;
pub const DEFAULT_DUMP_TOOL: &str = "mysqldump";
pub const DEFAULT_SQL_RUNNER: &str = "mysql";
pub const DEFAULT_ADMIN_USER: &str = "root";

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonS3StorageConfig {
    pub bucket_name: Option<String>,
    pub key_prefix: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonRestoreOptions {
    pub schema_key_prefix: Option<String>,
    pub data_key_prefix: Option<String>,
    pub schema_dir: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub target_database: Option<String>,
    pub download_from_s3: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub database_list: Option<serde_json::Value>,
    pub tables: Option<Vec<String>>,
    pub table_names_file: Option<PathBuf>,
    pub admin_user: Option<String>,
    pub credentials_file: Option<PathBuf>,
    pub source_host: Option<String>,
    pub cluster_endpoint: Option<String>,
    pub local_backup_dir: Option<PathBuf>,
    pub max_concurrent_processes: Option<usize>,
    pub dump_tool: Option<String>,
    pub sql_runner: Option<String>,
    pub restore: Option<JsonRestoreOptions>,
    pub s3_storage: Option<JsonS3StorageConfig>,
}

// Application's internal configuration structs
#[derive(Debug, Clone)]
pub struct S3StorageConfig {
    pub bucket_name: String,
    pub key_prefix: String,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

/// How to reach a MySQL-compatible server through the external client tools.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub admin_user: String,
    pub credentials_file: PathBuf,
    pub host: Option<String>,
    pub sql_runner: String,
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub connection: ConnectionConfig,
    pub databases: Vec<String>,
    pub tables: Vec<String>,
    pub local_backup_dir: PathBuf,
    pub dump_tool: String,
    pub max_concurrent_processes: usize,
    pub upload_to_s3: bool,
}

#[derive(Debug, Clone)]
pub struct RestoreConfig {
    pub connection: ConnectionConfig,
    pub cluster_endpoint: String,
    pub target_database: String,
    pub local_backup_dir: PathBuf,
    pub schema_dir: PathBuf,
    pub data_dir: PathBuf,
    pub schema_key_prefix: Option<String>,
    pub data_key_prefix: Option<String>,
    pub max_concurrent_processes: usize,
    pub download_from_s3: bool,
}

#[derive(Debug, Clone)]
pub struct RowCountConfig {
    pub connection: ConnectionConfig,
    pub database: String,
    pub tables: Vec<String>,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub operation: Option<OperationConfig>,
    pub s3_config: Option<S3StorageConfig>,
    pub raw_json_config: RawJsonConfig,
}

#[derive(Debug, Clone)]
pub enum OperationConfig {
    Backup(BackupConfig),
    Restore(RestoreConfig),
    RowCounts(RowCountConfig),
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        Self::from_json_str(&config_content).with_context(|| {
            format!(
                "Failed to parse JSON from config file at {}",
                config_path.display()
            )
        })
    }

    pub fn from_json_str(config_content: &str) -> Result<Self> {
        let raw_json_config: RawJsonConfig = serde_json::from_str(config_content)?;
        let s3_config = raw_json_config.s3_storage.as_ref().and_then(s3_config_from_raw);

        Ok(AppConfig {
            operation: None, // To be filled by main after parsing CLI args
            s3_config,
            raw_json_config,
        })
    }
}

fn s3_config_from_raw(s3_raw: &JsonS3StorageConfig) -> Option<S3StorageConfig> {
    let non_empty = |value: &Option<String>| value.clone().filter(|s| !s.trim().is_empty());

    let Some(bucket_name) = non_empty(&s3_raw.bucket_name) else {
        warn!(
            "s3_storage is present in config.json but bucket_name is missing or empty. S3 operations will be disabled."
        );
        return None;
    };

    let access_key_id = non_empty(&s3_raw.access_key_id);
    let secret_access_key = non_empty(&s3_raw.secret_access_key);
    if access_key_id.is_some() != secret_access_key.is_some() {
        warn!(
            "Only one of access_key_id/secret_access_key is set; falling back to the default AWS credential chain."
        );
    }

    Some(S3StorageConfig {
        bucket_name,
        key_prefix: s3_raw
            .key_prefix
            .clone()
            .unwrap_or_default()
            .trim_matches('/')
            .to_string(),
        region: non_empty(&s3_raw.region),
        endpoint_url: non_empty(&s3_raw.endpoint_url),
        access_key_id,
        secret_access_key,
    })
}

pub fn load_backup_config_from_json(
    raw_config: &RawJsonConfig,
    s3_is_configured: bool,
) -> Result<BackupConfig> {
    let local_backup_dir = raw_config
        .local_backup_dir
        .as_ref()
        .context("local_backup_dir must be set in config.json for backup")?
        .clone();
    if local_backup_dir.as_os_str().is_empty() {
        anyhow::bail!("local_backup_dir cannot be empty in config.json.");
    }

    let databases: Vec<String> = parse_database_list(&raw_config.database_list)?
        .into_iter()
        .map(|(source, _)| source)
        .collect();
    if databases.is_empty() {
        anyhow::bail!("database_list must name at least one database for backup.");
    }

    let tables = load_table_catalog(raw_config)?;
    if tables.is_empty() {
        anyhow::bail!("No tables configured: set `tables` or `table_names_file` in config.json.");
    }

    Ok(BackupConfig {
        connection: connection_from_raw(raw_config, raw_config.source_host.clone())?,
        databases,
        tables,
        local_backup_dir,
        dump_tool: raw_config
            .dump_tool
            .clone()
            .unwrap_or_else(|| DEFAULT_DUMP_TOOL.to_string()),
        max_concurrent_processes: max_concurrent_from_raw(raw_config)?,
        upload_to_s3: s3_is_configured,
    })
}

pub fn load_restore_config_from_json(
    raw_config: &RawJsonConfig,
    s3_is_configured: bool,
) -> Result<RestoreConfig> {
    let cluster_endpoint = required_endpoint(raw_config, "restore")?;
    let local_backup_dir = raw_config
        .local_backup_dir
        .as_ref()
        .context("local_backup_dir must be set in config.json for restore")?
        .clone();

    let restore_opts = raw_config
        .restore
        .as_ref()
        .context("restore options must be defined in config.json for restore")?;

    let schema_dir = restore_opts
        .schema_dir
        .clone()
        .context("restore.schema_dir must be set in config.json")?;
    let data_dir = restore_opts
        .data_dir
        .clone()
        .context("restore.data_dir must be set in config.json")?;

    let download_from_s3 = restore_opts.download_from_s3.unwrap_or(s3_is_configured);
    if download_from_s3 && !s3_is_configured {
        anyhow::bail!(
            "restore.download_from_s3 is enabled, but s3_storage is not configured or is missing bucket_name."
        );
    }
    let schema_key_prefix = restore_opts.schema_key_prefix.clone().filter(|p| !p.is_empty());
    let data_key_prefix = restore_opts.data_key_prefix.clone().filter(|p| !p.is_empty());
    if download_from_s3 && (schema_key_prefix.is_none() || data_key_prefix.is_none()) {
        anyhow::bail!(
            "restore.schema_key_prefix and restore.data_key_prefix must be set when downloading from S3."
        );
    }

    Ok(RestoreConfig {
        connection: connection_from_raw(raw_config, Some(cluster_endpoint.clone()))?,
        target_database: resolve_target_database(raw_config)?,
        cluster_endpoint,
        local_backup_dir,
        schema_dir,
        data_dir,
        schema_key_prefix,
        data_key_prefix,
        max_concurrent_processes: max_concurrent_from_raw(raw_config)?,
        download_from_s3,
    })
}

pub fn load_row_count_config_from_json(raw_config: &RawJsonConfig) -> Result<RowCountConfig> {
    let cluster_endpoint = required_endpoint(raw_config, "row counts")?;
    let tables = load_table_catalog(raw_config)?;
    if tables.is_empty() {
        anyhow::bail!("No tables configured: set `tables` or `table_names_file` in config.json.");
    }

    Ok(RowCountConfig {
        connection: connection_from_raw(raw_config, Some(cluster_endpoint))?,
        database: resolve_target_database(raw_config)?,
        tables,
        output_dir: raw_config
            .local_backup_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(".")),
    })
}

fn required_endpoint(raw_config: &RawJsonConfig, operation: &str) -> Result<String> {
    raw_config
        .cluster_endpoint
        .clone()
        .filter(|e| !e.trim().is_empty())
        .with_context(|| format!("cluster_endpoint must be set in config.json for {}", operation))
}

fn connection_from_raw(raw_config: &RawJsonConfig, host: Option<String>) -> Result<ConnectionConfig> {
    let credentials_file = raw_config
        .credentials_file
        .clone()
        .context("credentials_file must be set in config.json")?;
    Ok(ConnectionConfig {
        admin_user: raw_config
            .admin_user
            .clone()
            .unwrap_or_else(|| DEFAULT_ADMIN_USER.to_string()),
        credentials_file,
        host: host.filter(|h| !h.trim().is_empty()),
        sql_runner: raw_config
            .sql_runner
            .clone()
            .unwrap_or_else(|| DEFAULT_SQL_RUNNER.to_string()),
    })
}

fn max_concurrent_from_raw(raw_config: &RawJsonConfig) -> Result<usize> {
    match raw_config.max_concurrent_processes {
        Some(0) => Err(anyhow::anyhow!("max_concurrent_processes must be at least 1")),
        Some(limit) => Ok(limit),
        None => Ok(DEFAULT_MAX_CONCURRENT_PROCESSES),
    }
}

/// Picks the database restores and reports run against: `restore.target_database`
/// when set, otherwise the target of a single-entry `database_list`.
fn resolve_target_database(raw_config: &RawJsonConfig) -> Result<String> {
    if let Some(target) = raw_config
        .restore
        .as_ref()
        .and_then(|r| r.target_database.clone())
    {
        validate_identifier("database", &target)?;
        return Ok(target);
    }
    let mapping = parse_database_list(&raw_config.database_list)?;
    match mapping.as_slice() {
        [(_, target)] => Ok(target.clone()),
        [] => Err(anyhow::anyhow!("database_list is empty; cannot pick a target database")),
        _ => Err(anyhow::anyhow!(
            "database_list names {} databases; set restore.target_database to pick one",
            mapping.len()
        )),
    }
}

/// Reads the table catalog from `tables` followed by the lines of `table_names_file`.
fn load_table_catalog(raw_config: &RawJsonConfig) -> Result<Vec<String>> {
    let mut tables: Vec<String> = raw_config.tables.clone().unwrap_or_default();

    if let Some(path) = &raw_config.table_names_file {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read table names file {}", path.display()))?;
        tables.extend(parse_table_names(&content));
    }

    let tables: Vec<String> = tables.into_iter().map(|t| t.trim().to_string()).collect();
    for table in &tables {
        validate_identifier("table", table)?;
    }
    Ok(tables)
}

fn parse_table_names(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Names end up as path segments and inside the count query, so keep them plain.
pub fn validate_identifier(kind: &str, name: &str) -> Result<()> {
    if name.is_empty()
        || name.contains(|c: char| !c.is_ascii_alphanumeric() && c != '_' && c != '-' && c != '$')
    {
        anyhow::bail!("Invalid {} name in config: {:?}", kind, name);
    }
    Ok(())
}

/// Parses `database_list` into ordered `(source, target)` pairs.
/// An array maps every database to itself; an object maps source to target.
fn parse_database_list(database_list: &Option<serde_json::Value>) -> Result<Vec<(String, String)>> {
    let pairs: Vec<(String, String)> = match database_list {
        Some(value) if value.is_array() => {
            let databases: Vec<String> = serde_json::from_value(value.clone())
                .context("Failed to parse database_list as array")?;
            databases.into_iter().map(|db| (db.clone(), db)).collect()
        }
        Some(serde_json::Value::Object(mapping)) => mapping
            .iter()
            .map(|(source, target)| {
                target
                    .as_str()
                    .map(|t| (source.clone(), t.to_string()))
                    .with_context(|| format!("database_list target for {} must be a string", source))
            })
            .collect::<Result<_>>()?,
        Some(_) => anyhow::bail!(
            "database_list must be either an array of database names or a mapping object"
        ),
        None => Vec::new(),
    };

    for (source, target) in &pairs {
        validate_identifier("database", source)?;
        validate_identifier("database", target)?;
    }
    Ok(pairs)
}
