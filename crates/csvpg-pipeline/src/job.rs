//! Ingestion jobs
//!
//! One job moves one source file into one destination table. It is fully
//! described by an [`IngestionSpec`] and shares nothing with other jobs
//! except the connection registry, so the three loads are independent.

use crate::connection::{ConnectionRef, ConnectionRegistry};
use crate::dag::{Task, TaskOutcome};
use crate::error::{IngestError, Result};
use crate::loader::{LoadResult, RowErrorPolicy, TableLoader};
use crate::reader::{DelimitedReader, Record};
use crate::schema::{InsertTemplate, TableSchema};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, info_span, Instrument};

/// Source, destination and connection of one ingestion job
#[derive(Debug, Clone)]
pub struct IngestionSpec {
    pub source: PathBuf,
    pub schema: TableSchema,
    pub insert: InsertTemplate,
    pub connection: ConnectionRef,
    pub on_row_error: RowErrorPolicy,
}

impl IngestionSpec {
    /// Spec whose insert template is derived from `schema`
    pub fn new(source: impl Into<PathBuf>, schema: TableSchema, connection: ConnectionRef) -> Self {
        Self {
            source: source.into(),
            insert: schema.insert_template(),
            schema,
            connection,
            on_row_error: RowErrorPolicy::default(),
        }
    }

    pub fn with_row_error_policy(mut self, policy: RowErrorPolicy) -> Self {
        self.on_row_error = policy;
        self
    }
}

pub struct IngestionJob {
    task_id: String,
    spec: IngestionSpec,
    connections: Arc<ConnectionRegistry>,
}

impl IngestionJob {
    pub fn new(
        task_id: impl Into<String>,
        spec: IngestionSpec,
        connections: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            spec,
            connections,
        }
    }

    pub fn spec(&self) -> &IngestionSpec {
        &self.spec
    }

    /// Read the whole source file, then load it in one transaction
    pub async fn run(&self) -> Result<LoadResult> {
        let spec = &self.spec;
        info!(source = %spec.source.display(), conn_id = %spec.connection, "Starting ingestion");

        let records = read_source(spec.source.clone(), spec.schema).await?;
        debug!(rows = records.len(), "Source file read");

        let pool = self.connections.resolve(&spec.connection)?;
        let loader = TableLoader::new(spec.schema).with_policy(spec.on_row_error);

        let mut result = loader.load_all(&records, &spec.insert, &pool).await?;
        result.source = Some(spec.source.clone());

        info!(
            rows_loaded = result.rows_loaded,
            rows_skipped = result.rows_skipped,
            duration_secs = result.duration_secs,
            "Ingestion finished"
        );
        Ok(result)
    }
}

#[async_trait]
impl Task for IngestionJob {
    fn id(&self) -> &str {
        &self.task_id
    }

    async fn execute(&self) -> Result<TaskOutcome> {
        let span = info_span!("ingest", task = %self.task_id, table = self.spec.schema.name);
        self.run().instrument(span).await.map(TaskOutcome::Loaded)
    }
}

/// Parse the file off the async runtime and check its header
async fn read_source(source: PathBuf, schema: TableSchema) -> Result<Vec<Record>> {
    tokio::task::spawn_blocking(move || {
        let reader = DelimitedReader::open(&source)?;
        if !schema.matches_header(reader.columns()) {
            return Err(IngestError::parse(
                &source,
                1,
                format!(
                    "header [{}] does not match columns of '{}' [{}]",
                    reader.columns().join(", "),
                    schema.name,
                    schema.column_names().collect::<Vec<_>>().join(", ")
                ),
            ));
        }
        reader.read_all()
    })
    .await
    .map_err(|e| IngestError::config(format!("reader task failed: {}", e)))?
}
