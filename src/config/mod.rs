//! Connector configuration.
//!
//! Settings come from an optional JSON or TOML file (`--config`) and from
//! command-line flags or their environment variables. Flags override the
//! file. Everything is validated before any network I/O.

pub mod duration;

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use databricks_sync_source::{
    normalize_workspace_url, Disposition, RetryPolicy, SourceOpts, DEFAULT_BATCH_SIZE,
    DEFAULT_MAX_ATTEMPTS,
};
use serde::Deserialize;
use sync_core::TableIdentity;

pub use duration::parse_duration;

const DEFAULT_INITIAL_BACKOFF: &str = "1s";
const DEFAULT_STATEMENT_TIMEOUT: &str = "10m";
const DEFAULT_POLL_INTERVAL: &str = "1s";

/// Raw settings as written in a config file. Every field is optional here;
/// required fields are checked by [`FileConfig::resolve`].
#[derive(Clone, Default, Deserialize)]
pub struct FileConfig {
    pub workspace_url: Option<String>,
    pub personal_access_token: Option<String>,
    pub warehouse_id: Option<String>,
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub table: Option<String>,
    pub cursor_field: Option<String>,
    pub batch_size: Option<usize>,
    pub max_attempts: Option<u32>,
    pub initial_backoff: Option<String>,
    pub statement_timeout: Option<String>,
    pub poll_interval: Option<String>,
    pub disposition: Option<String>,
}

impl FileConfig {
    /// Load a config file. `.toml` files are parsed as TOML, anything else
    /// as JSON.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {path:?}"))?;
        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        if is_toml {
            Self::from_toml(&content)
                .with_context(|| format!("Failed to parse config file {path:?}"))
        } else {
            Self::from_json(&content)
                .with_context(|| format!("Failed to parse config file {path:?}"))
        }
    }

    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Validate and convert into a [`SourceConfig`]. All missing required
    /// fields are reported together.
    pub fn resolve(self) -> anyhow::Result<SourceConfig> {
        let mut missing = Vec::new();
        let mut require = |name: &'static str, value: Option<String>| -> String {
            match value {
                Some(v) if !v.trim().is_empty() => v,
                _ => {
                    missing.push(name);
                    String::new()
                }
            }
        };
        let workspace_url = require("workspace_url", self.workspace_url);
        let token = require("personal_access_token", self.personal_access_token);
        let warehouse_id = require("warehouse_id", self.warehouse_id);
        let catalog = require("catalog", self.catalog);
        let schema = require("schema", self.schema);
        let table = require("table", self.table);
        if !missing.is_empty() {
            anyhow::bail!("Missing required configuration: {}", missing.join(", "));
        }

        let table = TableIdentity::new(catalog.trim(), schema.trim(), table.trim())
            .context("Invalid table identity")?;

        let batch_size = self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        let batch_size = NonZeroUsize::new(batch_size)
            .ok_or_else(|| anyhow::anyhow!("batch_size must be greater than 0"))?;

        let disposition = match self.disposition.as_deref() {
            Some(d) => d.parse::<Disposition>().map_err(anyhow::Error::msg)?,
            None => Disposition::default(),
        };

        let initial_backoff = duration_setting(
            "initial_backoff",
            self.initial_backoff.as_deref(),
            DEFAULT_INITIAL_BACKOFF,
        )?;
        let statement_timeout = duration_setting(
            "statement_timeout",
            self.statement_timeout.as_deref(),
            DEFAULT_STATEMENT_TIMEOUT,
        )?;
        let poll_interval = duration_setting(
            "poll_interval",
            self.poll_interval.as_deref(),
            DEFAULT_POLL_INTERVAL,
        )?;
        if poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        let mut opts = SourceOpts::new(normalize_workspace_url(&workspace_url), token, warehouse_id);
        opts.disposition = disposition;
        opts.statement_timeout = statement_timeout;
        opts.poll_interval = poll_interval;

        let cursor_field = self
            .cursor_field
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty());

        Ok(SourceConfig {
            opts,
            table,
            cursor_field,
            batch_size,
            retry: RetryPolicy::new(
                self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
                initial_backoff,
            ),
        })
    }
}

fn duration_setting(name: &str, value: Option<&str>, default: &str) -> anyhow::Result<Duration> {
    parse_duration(value.unwrap_or(default)).with_context(|| format!("Invalid {name}"))
}

/// Source options accepted on the command line.
#[derive(clap::Args, Clone, Default)]
pub struct SourceArgs {
    /// JSON or TOML config file; flags override its values
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Databricks workspace URL
    #[arg(long, env = "DATABRICKS_HOST")]
    pub workspace_url: Option<String>,

    /// Databricks personal access token
    #[arg(long, env = "DATABRICKS_TOKEN", hide_env_values = true)]
    pub personal_access_token: Option<String>,

    /// SQL warehouse id
    #[arg(long, env = "DATABRICKS_WAREHOUSE_ID")]
    pub warehouse_id: Option<String>,

    /// Unity Catalog catalog, or `hive_metastore`
    #[arg(long)]
    pub catalog: Option<String>,

    /// Schema (database) containing the table
    #[arg(long)]
    pub schema: Option<String>,

    /// Table to sync
    #[arg(long)]
    pub table: Option<String>,

    /// Column used for incremental sync; omit for full refresh
    #[arg(long)]
    pub cursor_field: Option<String>,

    /// Rows per batch (default: 1000)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Attempts for transient failures, 1 to 5 (default: 4)
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Delay before the first retry, e.g. "500ms" or "1s"
    #[arg(long)]
    pub initial_backoff: Option<String>,

    /// Cancel statements still running after this long (default: "10m")
    #[arg(long)]
    pub statement_timeout: Option<String>,

    /// Interval between statement status polls (default: "1s")
    #[arg(long)]
    pub poll_interval: Option<String>,

    /// Result delivery: "inline" or "external-links"
    #[arg(long)]
    pub disposition: Option<String>,
}

impl SourceArgs {
    /// Read the config file, if any, overlay the flags and validate.
    pub fn load(&self) -> anyhow::Result<SourceConfig> {
        let file = match &self.config {
            Some(path) => FileConfig::from_file(path)?,
            None => FileConfig::default(),
        };
        self.overlay(file).resolve()
    }

    /// Flags win over file values.
    pub fn overlay(&self, file: FileConfig) -> FileConfig {
        let args = self.clone();
        FileConfig {
            workspace_url: args.workspace_url.or(file.workspace_url),
            personal_access_token: args.personal_access_token.or(file.personal_access_token),
            warehouse_id: args.warehouse_id.or(file.warehouse_id),
            catalog: args.catalog.or(file.catalog),
            schema: args.schema.or(file.schema),
            table: args.table.or(file.table),
            cursor_field: args.cursor_field.or(file.cursor_field),
            batch_size: args.batch_size.or(file.batch_size),
            max_attempts: args.max_attempts.or(file.max_attempts),
            initial_backoff: args.initial_backoff.or(file.initial_backoff),
            statement_timeout: args.statement_timeout.or(file.statement_timeout),
            poll_interval: args.poll_interval.or(file.poll_interval),
            disposition: args.disposition.or(file.disposition),
        }
    }
}

/// Validated connector configuration.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub opts: SourceOpts,
    pub table: TableIdentity,
    pub cursor_field: Option<String>,
    pub batch_size: NonZeroUsize,
    pub retry: RetryPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> FileConfig {
        FileConfig {
            workspace_url: Some("adb-123.azuredatabricks.net/".to_string()),
            personal_access_token: Some("dapi-token".to_string()),
            warehouse_id: Some("wh1".to_string()),
            catalog: Some("main".to_string()),
            schema: Some("sales".to_string()),
            table: Some("orders".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_defaults() {
        let config = complete().resolve().unwrap();
        assert_eq!(config.opts.workspace_url, "https://adb-123.azuredatabricks.net");
        assert_eq!(config.table.stream_name(), "main_sales_orders");
        assert_eq!(config.cursor_field, None);
        assert_eq!(config.batch_size.get(), 1000);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.initial_delay, Duration::from_secs(1));
        assert_eq!(config.opts.statement_timeout, Duration::from_secs(600));
        assert_eq!(config.opts.poll_interval, Duration::from_secs(1));
        assert_eq!(config.opts.disposition, Disposition::Inline);
    }

    #[test]
    fn test_resolve_reports_every_missing_field() {
        let config = FileConfig {
            workspace_url: Some("https://example.cloud.databricks.com".to_string()),
            catalog: Some("  ".to_string()),
            ..Default::default()
        };
        let err = config.resolve().unwrap_err().to_string();
        assert_eq!(
            err,
            "Missing required configuration: personal_access_token, warehouse_id, catalog, schema, table"
        );
    }

    #[test]
    fn test_resolve_rejects_zero_batch_size() {
        let config = FileConfig {
            batch_size: Some(0),
            ..complete()
        };
        let err = config.resolve().unwrap_err().to_string();
        assert!(err.contains("batch_size"), "{err}");
    }

    #[test]
    fn test_resolve_tuning() {
        let config = FileConfig {
            cursor_field: Some(" updated_at ".to_string()),
            batch_size: Some(2),
            max_attempts: Some(9),
            initial_backoff: Some("250ms".to_string()),
            statement_timeout: Some("1h".to_string()),
            poll_interval: Some("500ms".to_string()),
            disposition: Some("EXTERNAL_LINKS".to_string()),
            ..complete()
        }
        .resolve()
        .unwrap();
        assert_eq!(config.cursor_field.as_deref(), Some("updated_at"));
        assert_eq!(config.batch_size.get(), 2);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(config.opts.statement_timeout, Duration::from_secs(3600));
        assert_eq!(config.opts.poll_interval, Duration::from_millis(500));
        assert_eq!(config.opts.disposition, Disposition::ExternalLinks);
    }

    #[test]
    fn test_resolve_rejects_bad_values() {
        let bad_duration = FileConfig {
            statement_timeout: Some("soon".to_string()),
            ..complete()
        };
        assert!(bad_duration.resolve().is_err());

        let bad_disposition = FileConfig {
            disposition: Some("s3".to_string()),
            ..complete()
        };
        assert!(bad_disposition.resolve().is_err());

        let overflowing = FileConfig {
            statement_timeout: Some("18446744073709551615h".to_string()),
            ..complete()
        };
        let err = format!("{:#}", overflowing.resolve().unwrap_err());
        assert!(err.contains("statement_timeout"), "{err}");
    }

    #[test]
    fn test_empty_cursor_field_means_full_refresh() {
        let config = FileConfig {
            cursor_field: Some(String::new()),
            ..complete()
        }
        .resolve()
        .unwrap();
        assert_eq!(config.cursor_field, None);
    }

    #[test]
    fn test_from_json_and_toml() {
        let json = r#"{
            "workspace_url": "https://example.cloud.databricks.com",
            "personal_access_token": "dapi-token",
            "warehouse_id": "wh1",
            "catalog": "main",
            "schema": "sales",
            "table": "orders",
            "cursor_field": "updated_at",
            "batch_size": 500
        }"#;
        let from_json = FileConfig::from_json(json).unwrap();
        assert_eq!(from_json.cursor_field.as_deref(), Some("updated_at"));
        assert_eq!(from_json.batch_size, Some(500));

        let toml = r#"
            workspace_url = "https://example.cloud.databricks.com"
            personal_access_token = "dapi-token"
            warehouse_id = "wh1"
            catalog = "main"
            schema = "sales"
            table = "orders"
            poll_interval = "2s"
        "#;
        let from_toml = FileConfig::from_toml(toml).unwrap();
        assert_eq!(from_toml.table.as_deref(), Some("orders"));
        assert_eq!(from_toml.poll_interval.as_deref(), Some("2s"));
    }

    #[test]
    fn test_from_file_by_extension() {
        let dir = tempfile::TempDir::new().unwrap();

        let toml_path = dir.path().join("source.toml");
        std::fs::write(&toml_path, "catalog = \"main\"\nbatch_size = 10\n").unwrap();
        let config = FileConfig::from_file(&toml_path).unwrap();
        assert_eq!(config.catalog.as_deref(), Some("main"));
        assert_eq!(config.batch_size, Some(10));

        let json_path = dir.path().join("source.json");
        std::fs::write(&json_path, r#"{"catalog": "dev"}"#).unwrap();
        let config = FileConfig::from_file(&json_path).unwrap();
        assert_eq!(config.catalog.as_deref(), Some("dev"));

        assert!(FileConfig::from_file(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_flags_override_file() {
        let args = SourceArgs {
            table: Some("returns".to_string()),
            batch_size: Some(5),
            ..Default::default()
        };
        let merged = args.overlay(complete());
        assert_eq!(merged.table.as_deref(), Some("returns"));
        assert_eq!(merged.catalog.as_deref(), Some("main"));
        assert_eq!(merged.batch_size, Some(5));
    }
}
