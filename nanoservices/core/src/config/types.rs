use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// One pipeline file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub pipeline: String,
    pub description: Option<String>,
    pub trigger: TriggerConfig,
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    /// Retries after a failed attempt; defaults to 1
    pub retries: Option<u32>,
    /// e.g. "3m"; defaults to 3 minutes
    pub retry_delay: Option<String>,
    /// Run history database; in-memory when absent
    pub store: Option<PathBuf>,
    /// Address for the Prometheus exporter, e.g. "127.0.0.1:9187"
    pub metrics_addr: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TriggerConfig {
    /// `interval`, `cron` or `manual`
    #[serde(rename = "type")]
    pub trigger_type: String,
    /// For interval triggers: e.g. "60s", "5m"
    pub every: Option<String>,
    /// For cron triggers: e.g. "30 6 * * SAT"
    pub expr: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub url: String,
    /// Query parameters appended to `url`
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Environment variable holding a bearer token
    pub token_env: Option<String>,
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarehouseKind {
    Sqlite,
    /// Also used for Redshift
    Postgres,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DestinationConfig {
    pub warehouse: WarehouseKind,
    /// postgres: environment variable holding the connection string
    pub dsn_env: Option<String>,
    /// sqlite: database file
    pub path: Option<PathBuf>,
    /// sqlite: extra database files keyed by schema name
    #[serde(default)]
    pub attach: BTreeMap<String, PathBuf>,
    pub schema: Option<String>,
    pub table: String,
}

impl DestinationConfig {
    /// Schema name to load into, falling back to the backend's default.
    pub fn schema_or_default(&self) -> &str {
        match (&self.schema, self.warehouse) {
            (Some(schema), _) => schema,
            (None, WarehouseKind::Sqlite) => "main",
            (None, WarehouseKind::Postgres) => "public",
        }
    }
}
