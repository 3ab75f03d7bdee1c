//! csvpg Pipeline Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Loads three CSV files into PostgreSQL tables and, once every load has
//! succeeded, runs the external dbt transformation.
//!
//! # Overview
//!
//! - **Reading**: [`reader`] turns a CSV file into positional [`reader::Record`]s
//! - **Schemas**: [`schema`] declares the `customers`, `orders` and `orderitems` tables
//! - **Loading**: [`loader`] inserts every record of a file in one transaction
//! - **Jobs**: [`job`] binds a source file, a table and a connection
//! - **Transform**: [`transform`] runs `dbt run --profile <profile>`
//! - **Graph**: [`dag`] executes tasks with dependencies, [`pipeline`] declares `csv_to_postgres`
//!
//! # Example
//!
//! ```no_run
//! use csvpg_pipeline::config::PipelineConfig;
//! use csvpg_pipeline::connection::{ConnectionRef, ConnectionRegistry};
//! use csvpg_pipeline::pipeline::build_dag;
//! use std::sync::Arc;
//!
//! # async fn example() -> csvpg_pipeline::Result<()> {
//! let config = PipelineConfig::load()?;
//! let registry = ConnectionRegistry::from_config(
//!     ConnectionRef::new(config.ingest.conn_id.clone()),
//!     &config.database,
//! )?;
//! let report = build_dag(&config, Arc::new(registry))?.run().await;
//! assert!(report.is_success());
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod connection;
pub mod dag;
pub mod error;
pub mod job;
pub mod loader;
pub mod pipeline;
pub mod reader;
pub mod schema;
pub mod transform;

// Re-export commonly used types
pub use cli::{Cli, Commands, TableName};
pub use config::PipelineConfig;
pub use dag::{Dag, DagRunReport, Task, TaskOutcome, TaskState};
pub use error::{IngestError, Result};
pub use loader::{LoadResult, RowErrorPolicy, TableLoader};
pub use schema::TableSchema;
