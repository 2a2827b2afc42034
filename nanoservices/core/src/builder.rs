use std::sync::Arc;

use crate::config::loader::{parse_duration, ConfigError};
use crate::config::types::{PipelineConfig, WarehouseKind};
use crate::destinations::{Destination, FullRefreshLoader, PostgresWarehouse, SqliteWarehouse, TableRef};
use crate::events::cron::CronSchedule;
use crate::events::trigger::Trigger;
use crate::pipeline::Pipeline;
use crate::scheduler::retry::RetryPolicy;
use crate::scheduler::runner::PipelineDef;
use crate::sources::{HttpSourceBuilder, Source};
use crate::transforms::{CountryProjection, Transform};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("pipeline name is required")]
    NoName,
    #[error("trigger is required")]
    NoTrigger,
    #[error("a source is required")]
    NoSource,
    #[error("a transform is required")]
    NoTransform,
    #[error("a destination is required")]
    NoDestination,
}

pub struct PipelineBuilder {
    name: String,
    trigger: Option<Trigger>,
    source: Option<Arc<dyn Source>>,
    transform: Option<Arc<dyn Transform>>,
    destination: Option<Arc<dyn Destination>>,
    retry: RetryPolicy,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            trigger: None,
            source: None,
            transform: None,
            destination: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn source(mut self, source: impl Source + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn transform(mut self, transform: impl Transform + 'static) -> Self {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn destination(mut self, destination: impl Destination + 'static) -> Self {
        self.destination = Some(Arc::new(destination));
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn build(self) -> Result<(Trigger, PipelineDef), BuildError> {
        if self.name.trim().is_empty() {
            return Err(BuildError::NoName);
        }
        let trigger = self.trigger.ok_or(BuildError::NoTrigger)?;
        let source = self.source.ok_or(BuildError::NoSource)?;
        let transform = self.transform.ok_or(BuildError::NoTransform)?;
        let destination = self.destination.ok_or(BuildError::NoDestination)?;

        let pipeline = Pipeline::new(self.name.clone(), source, transform, destination);
        Ok((trigger, PipelineDef { name: self.name, pipeline, retry: self.retry }))
    }
}

/// Build a pipeline from its YAML config, reading secrets from the process
/// environment.
pub fn from_config(config: &PipelineConfig) -> Result<(Trigger, PipelineDef), ConfigError> {
    from_config_with_env(config, |key| std::env::var(key).ok())
}

/// Like [`from_config`] with an explicit environment lookup.
pub fn from_config_with_env<E>(config: &PipelineConfig, env: E) -> Result<(Trigger, PipelineDef), ConfigError>
where
    E: Fn(&str) -> Option<String>,
{
    let trigger = trigger_from_config(config)?;

    let src = &config.source;
    let token = match &src.token_env {
        Some(var) => Some(env(var).ok_or_else(|| ConfigError::MissingEnv(var.clone()))?),
        None => None,
    };
    let mut source = HttpSourceBuilder::new(&src.url)
        .name(format!("{}.extract", config.pipeline))
        .params(src.params.iter().map(|(k, v)| (k.clone(), v.clone())))
        .token(token);
    if let Some(timeout) = &src.timeout {
        source = source.timeout(parse_duration(timeout)?);
    }
    let source = source.build()?;

    let dest = &config.destination;
    let target = TableRef::new(dest.schema_or_default(), &dest.table)?;
    let load_name = format!("{}.load", config.pipeline);
    let builder = PipelineBuilder::new(&config.pipeline)
        .trigger(trigger)
        .source(source)
        .transform(CountryProjection::named(format!("{}.transform", config.pipeline)))
        .retry(retry_from_config(config)?);

    let builder = match dest.warehouse {
        WarehouseKind::Sqlite => {
            let path = dest
                .path
                .as_ref()
                .ok_or(ConfigError::MissingField { section: "sqlite destination", field: "path" })?;
            let mut warehouse = SqliteWarehouse::new(path);
            for (schema, file) in &dest.attach {
                warehouse = warehouse.attach(schema, file)?;
            }
            builder.destination(FullRefreshLoader::new(warehouse, target).named(load_name))
        }
        WarehouseKind::Postgres => {
            let var = dest
                .dsn_env
                .as_ref()
                .ok_or(ConfigError::MissingField { section: "postgres destination", field: "dsn_env" })?;
            let dsn = env(var).ok_or_else(|| ConfigError::MissingEnv(var.clone()))?;
            builder.destination(FullRefreshLoader::new(PostgresWarehouse::new(dsn), target).named(load_name))
        }
    };

    Ok(builder.build()?)
}

fn trigger_from_config(config: &PipelineConfig) -> Result<Trigger, ConfigError> {
    let t = &config.trigger;
    match t.trigger_type.as_str() {
        "interval" => {
            let every = t.every.as_deref().ok_or(ConfigError::MissingField { section: "interval trigger", field: "every" })?;
            let every = parse_duration(every)?;
            if every.is_zero() {
                return Err(ConfigError::InvalidDuration("0".to_string()));
            }
            Ok(Trigger::Interval(every))
        }
        "cron" => {
            let expr = t.expr.as_deref().ok_or(ConfigError::MissingField { section: "cron trigger", field: "expr" })?;
            Ok(Trigger::Cron(CronSchedule::parse(expr)?))
        }
        "manual" => Ok(Trigger::Manual),
        other => Err(ConfigError::UnknownTrigger(other.to_string())),
    }
}

fn retry_from_config(config: &PipelineConfig) -> Result<RetryPolicy, ConfigError> {
    let delay = match &config.retry_delay {
        Some(delay) => parse_duration(delay)?,
        None => RetryPolicy::DEFAULT_DELAY,
    };
    Ok(RetryPolicy::new(config.retries.unwrap_or(RetryPolicy::DEFAULT_RETRIES), delay))
}
