//! snapflow: run scheduled full-refresh pipelines from YAML files
//!
//! Usage:
//!   # Run every pipeline in a directory on its schedule until Ctrl-C
//!   snapflow run --config ./pipelines
//!
//!   # Run one pipeline now (with retries), exit non-zero on failure
//!   snapflow once --config ./pipelines/rest_countries.yaml
//!
//!   # Check configs and secrets without running anything
//!   snapflow validate --config ./pipelines

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use snapflow_core::builder::from_config;
use snapflow_core::config::{load_pipelines, PipelineConfig};
use snapflow_core::engine::{run_once, Snapflow};
use snapflow_core::logging;
use snapflow_core::scheduler::RunStatus;

#[derive(Parser, Debug)]
#[command(name = "snapflow")]
#[command(about = "Scheduled full-refresh snapshot pipelines", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Run history database (overrides `store` in the config)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Prometheus exporter address (overrides `metrics_addr` in the config)
    #[arg(long, global = true)]
    metrics_addr: Option<String>,

    /// Default log level when RUST_LOG is unset (overrides `log_level`)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run pipelines on their triggers until Ctrl-C
    Run {
        /// Pipeline file or directory of pipeline files
        #[arg(long, short = 'c')]
        config: PathBuf,
    },
    /// Run a single pipeline once
    Once {
        #[arg(long, short = 'c')]
        config: PathBuf,
        /// Which pipeline to run when `config` holds several
        #[arg(long, short = 'p')]
        pipeline: Option<String>,
    },
    /// Parse and build pipelines without running them
    Validate {
        #[arg(long, short = 'c')]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.command {
        Command::Run { config } | Command::Once { config, .. } | Command::Validate { config } => config,
    };
    let configs = load_pipelines(config)?;
    if configs.is_empty() {
        bail!("no pipeline files found in {}", config.display());
    }

    let level = args
        .log_level
        .clone()
        .or_else(|| configs.iter().find_map(|c| c.log_level.clone()))
        .unwrap_or_else(|| "info".to_string());
    logging::init_with(&level);

    let store = args.store.clone().or_else(|| configs.iter().find_map(|c| c.store.clone()));

    match args.command {
        Command::Validate { .. } => {
            for cfg in &configs {
                let (trigger, def) = from_config(cfg).with_context(|| format!("pipeline '{}'", cfg.pipeline))?;
                println!("{}: ok ({trigger}, {} attempt(s))", def.name, def.retry.max_attempts());
            }
            Ok(())
        }
        Command::Once { pipeline, .. } => {
            let cfg = pick(&configs, pipeline.as_deref())?;
            let (_, def) = from_config(cfg).with_context(|| format!("pipeline '{}'", cfg.pipeline))?;
            let state = run_once(&def, store.as_deref()).await?;
            match state.status {
                RunStatus::Completed => {
                    tracing::info!(run = %state.id, rows = state.rows, attempts = state.attempt, "run completed");
                    Ok(())
                }
                _ => bail!(
                    "run {} failed after {} attempt(s): {}",
                    state.id,
                    state.attempt,
                    state.last_error.unwrap_or_default()
                ),
            }
        }
        Command::Run { .. } => {
            let mut engine = Snapflow::new();
            if let Some(path) = store {
                engine = engine.db_path(path);
            }
            if let Some(addr) = args.metrics_addr.or_else(|| configs.iter().find_map(|c| c.metrics_addr.clone())) {
                engine = engine.metrics_addr(addr);
            }
            for cfg in &configs {
                let (trigger, def) = from_config(cfg).with_context(|| format!("pipeline '{}'", cfg.pipeline))?;
                engine = engine.add_pipeline(trigger, def);
            }
            engine.run().await?;
            Ok(())
        }
    }
}

fn pick<'a>(configs: &'a [PipelineConfig], name: Option<&str>) -> Result<&'a PipelineConfig> {
    match (name, configs) {
        (Some(name), _) => configs
            .iter()
            .find(|c| c.pipeline == name)
            .with_context(|| format!("no pipeline named '{name}'")),
        (None, [only]) => Ok(only),
        (None, _) => bail!("{} pipelines found, choose one with --pipeline", configs.len()),
    }
}
