use std::path::{Path, PathBuf};
use std::time::Duration;

use snapflow_utils::error::{ExtractionError, LoadError};

use crate::builder::BuildError;
use crate::config::types::PipelineConfig;
use crate::events::cron::CronError;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("{}: {source}", path.display())]
    File { path: PathBuf, source: Box<ConfigError> },
    #[error("invalid duration '{0}': expected a number followed by ms, s, m, h or d")]
    InvalidDuration(String),
    #[error("invalid cron expression: {0}")]
    Cron(#[from] CronError),
    #[error("unknown trigger type '{0}': expected interval, cron or manual")]
    UnknownTrigger(String),
    #[error("{section} needs '{field}'")]
    MissingField { section: &'static str, field: &'static str },
    #[error("environment variable {0} is not set")]
    MissingEnv(String),
    #[error("invalid source: {0}")]
    Source(#[from] ExtractionError),
    #[error("invalid destination: {0}")]
    Destination(#[from] LoadError),
    #[error(transparent)]
    Build(#[from] BuildError),
}

/// Load a pipeline config from a YAML file.
pub fn load_pipeline(path: impl AsRef<Path>) -> Result<PipelineConfig, ConfigError> {
    let path = path.as_ref();
    std::fs::read_to_string(path)
        .map_err(ConfigError::from)
        .and_then(|content| parse_pipeline(&content))
        .map_err(|e| ConfigError::File { path: path.to_path_buf(), source: Box::new(e) })
}

/// Parse a pipeline config from a YAML string.
pub fn parse_pipeline(yaml: &str) -> Result<PipelineConfig, ConfigError> {
    let config: PipelineConfig = serde_yaml::from_str(yaml)?;
    Ok(config)
}

/// Load all `*.yaml`/`*.yml` pipeline configs in a directory, in file name order.
pub fn load_pipelines_dir(dir: impl AsRef<Path>) -> Result<Vec<PipelineConfig>, ConfigError> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if matches!(path.extension().and_then(|e| e.to_str()), Some("yaml" | "yml")) {
            paths.push(path);
        }
    }
    paths.sort();
    paths.into_iter().map(load_pipeline).collect()
}

/// Load a single file, or every pipeline file when `path` is a directory.
pub fn load_pipelines(path: impl AsRef<Path>) -> Result<Vec<PipelineConfig>, ConfigError> {
    let path = path.as_ref();
    if path.is_dir() {
        load_pipelines_dir(path)
    } else {
        Ok(vec![load_pipeline(path)?])
    }
}

/// Parse durations like `250ms`, `30s`, `3m`, `1h` or `7d`.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration(s.to_string());
    let trimmed = s.trim();
    let split = trimmed.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
    let (digits, unit) = trimmed.split_at(split);
    let n: u64 = digits.parse().map_err(|_| invalid())?;
    let secs = match unit {
        "ms" => return Ok(Duration::from_millis(n)),
        "s" => Some(n),
        "m" => n.checked_mul(60),
        "h" => n.checked_mul(60 * 60),
        "d" => n.checked_mul(24 * 60 * 60),
        _ => None,
    };
    secs.map(Duration::from_secs).ok_or_else(invalid)
}
