//! snapflow_core: scheduled full-refresh snapshot pipelines.
//!
//! A pipeline extracts one JSON document over HTTP, projects it into
//! `(country, population, area)` records and replaces a warehouse table with
//! them inside a single transaction. The scheduler fires pipelines on an
//! interval or a cron calendar, retries failed attempts and keeps a run
//! history in SQLite.
//!
//! ```no_run
//! use snapflow_core::builder::PipelineBuilder;
//! use snapflow_core::destinations::{FullRefreshLoader, SqliteWarehouse, TableRef};
//! use snapflow_core::engine::Snapflow;
//! use snapflow_core::events::{CronSchedule, Trigger};
//! use snapflow_core::sources::HttpSourceBuilder;
//! use snapflow_core::transforms::CountryProjection;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let source = HttpSourceBuilder::new("https://restcountries.com/v3.1/all")
//!     .param("fields", "name,population,area")
//!     .build()?;
//! let target = TableRef::new("main", "rest_countries")?;
//! let (trigger, def) = PipelineBuilder::new("rest_countries")
//!     .trigger(Trigger::Cron(CronSchedule::parse("30 6 * * SAT")?))
//!     .source(source)
//!     .transform(CountryProjection::new())
//!     .destination(FullRefreshLoader::new(SqliteWarehouse::new("warehouse.db"), target))
//!     .build()?;
//!
//! Snapflow::new().db_path("snapflow.db").add_pipeline(trigger, def).run().await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod config;
pub mod destinations;
pub mod engine;
pub mod events;
pub mod pipeline;
pub mod scheduler;
pub mod sources;
pub mod store;
pub mod transforms;

pub mod logging;

pub mod metrics;
