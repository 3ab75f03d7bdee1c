//! Table loader
//!
//! Appends the records of one source file to one destination table inside a
//! single transaction:
//!
//! 1. `BEGIN` (acquires the job's one pooled connection)
//! 2. `CREATE TABLE IF NOT EXISTS`, then verify the live column layout
//! 3. one parameterized `INSERT` per record
//! 4. `COMMIT` once
//!
//! Under the default [`RowErrorPolicy::Abort`] any failed insert rolls the
//! whole transaction back, so a failed load leaves no rows behind and the job
//! can be re-run from scratch.

use crate::error::{IngestError, Result};
use crate::reader::Record;
use crate::schema::{InsertTemplate, TableSchema};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// What to do when the store rejects a single row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowErrorPolicy {
    /// Roll back the whole load and fail the job
    #[default]
    Abort,
    /// Roll back only the failed row (savepoint), log it, keep going
    Skip,
}

impl std::str::FromStr for RowErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "abort" => Ok(RowErrorPolicy::Abort),
            "skip" => Ok(RowErrorPolicy::Skip),
            other => Err(format!("expected 'abort' or 'skip', got '{}'", other)),
        }
    }
}

/// Outcome of one successful load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadResult {
    pub table: String,
    pub source: Option<PathBuf>,
    pub rows_read: usize,
    pub rows_loaded: u64,
    /// Only non-zero under [`RowErrorPolicy::Skip`]
    pub rows_skipped: u64,
    pub duration_secs: f64,
}

const COLUMN_LAYOUT_SQL: &str = r#"
    SELECT column_name::text, data_type::text
    FROM information_schema.columns
    WHERE table_schema = current_schema()
      AND table_name = $1
    ORDER BY ordinal_position
"#;

const PRIMARY_KEY_SQL: &str = r#"
    SELECT kcu.column_name::text
    FROM information_schema.table_constraints tc
    JOIN information_schema.key_column_usage kcu
      ON kcu.constraint_schema = tc.constraint_schema
     AND kcu.constraint_name = tc.constraint_name
     AND kcu.table_name = tc.table_name
    WHERE tc.table_schema = current_schema()
      AND tc.table_name = $1
      AND tc.constraint_type = 'PRIMARY KEY'
    ORDER BY kcu.ordinal_position
"#;

/// Loads records into one destination table
#[derive(Debug, Clone)]
pub struct TableLoader {
    schema: TableSchema,
    policy: RowErrorPolicy,
}

impl TableLoader {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            policy: RowErrorPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RowErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Create the table if missing and check that an existing one matches
    pub async fn ensure_schema(&self, conn: &mut PgConnection) -> Result<()> {
        let table = self.schema.name;
        self.schema
            .validate()
            .map_err(|msg| IngestError::schema_conflict(table, msg))?;

        sqlx::query(&self.schema.create_table_sql())
            .execute(&mut *conn)
            .await
            .map_err(|e| IngestError::load(table, "create table failed", e))?;

        let live: Vec<(String, String)> = sqlx::query_as(COLUMN_LAYOUT_SQL)
            .bind(table)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| IngestError::load(table, "reading column layout failed", e))?;

        self.check_layout(&live)?;

        let primary_key: Vec<String> = sqlx::query_scalar(PRIMARY_KEY_SQL)
            .bind(table)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| IngestError::load(table, "reading primary key failed", e))?;

        self.check_primary_key(&primary_key)?;
        debug!(table, columns = live.len(), "Schema ensured");
        Ok(())
    }

    fn check_layout(&self, live: &[(String, String)]) -> Result<()> {
        let table = self.schema.name;
        let expected = self.schema.columns;

        if live.len() != expected.len() {
            return Err(IngestError::schema_conflict(
                table,
                format!(
                    "existing table has columns [{}], expected [{}]",
                    live.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>().join(", "),
                    self.schema.column_names().collect::<Vec<_>>().join(", ")
                ),
            ));
        }

        for (column, (name, data_type)) in expected.iter().zip(live) {
            if column.name != name {
                return Err(IngestError::schema_conflict(
                    table,
                    format!("expected column '{}', found '{}'", column.name, name),
                ));
            }
            if !column.ty.accepts_data_type(data_type) {
                return Err(IngestError::schema_conflict(
                    table,
                    format!(
                        "column '{}' is {}, expected {}",
                        column.name, data_type, column.ty
                    ),
                ));
            }
        }

        Ok(())
    }

    /// Without the declared key a re-run would duplicate rows instead of colliding
    fn check_primary_key(&self, live: &[String]) -> Result<()> {
        let expected: Vec<&str> = self.schema.primary_key().map(|c| c.name).into_iter().collect();
        if live.iter().map(String::as_str).eq(expected.iter().copied()) {
            return Ok(());
        }

        let describe = |cols: Vec<&str>| {
            if cols.is_empty() {
                "none".to_string()
            } else {
                format!("({})", cols.join(", "))
            }
        };
        Err(IngestError::schema_conflict(
            self.schema.name,
            format!(
                "existing table has primary key {}, expected {}",
                describe(live.iter().map(String::as_str).collect()),
                describe(expected)
            ),
        ))
    }

    /// Load all records in one transaction and return the row counts
    pub async fn load_all(
        &self,
        records: &[Record],
        template: &InsertTemplate,
        pool: &PgPool,
    ) -> Result<LoadResult> {
        let started = Instant::now();
        let table = self.schema.name;

        if template.table() != table {
            return Err(IngestError::config(format!(
                "insert template targets '{}' but loader targets '{}'",
                template.table(),
                table
            )));
        }

        if let Some(record) = records.iter().find(|r| r.len() != template.placeholders()) {
            return Err(IngestError::config(format!(
                "record at line {} has {} fields, insert into '{}' expects {}",
                record.line(),
                record.len(),
                table,
                template.placeholders()
            )));
        }

        let mut tx = pool
            .begin()
            .await
            .map_err(|e| IngestError::load(table, "failed to begin transaction", e))?;

        if let Err(e) = self.ensure_schema(&mut tx).await {
            return Err(rollback(tx, table, e).await);
        }

        let mut loaded = 0u64;
        let mut skipped = 0u64;

        for record in records {
            match self.policy {
                RowErrorPolicy::Abort => {
                    if let Err(e) = insert(&mut tx, template, record).await {
                        let err = IngestError::from_insert(table, record.line(), e);
                        error!(table, line = record.line(), error = %err, "Insert failed, rolling back load");
                        return Err(rollback(tx, table, err).await);
                    }
                    loaded += 1;
                },
                RowErrorPolicy::Skip => match self.insert_isolated(&mut tx, template, record).await {
                    Ok(true) => loaded += 1,
                    Ok(false) => skipped += 1,
                    Err(e) => return Err(rollback(tx, table, e).await),
                },
            }
        }

        tx.commit()
            .await
            .map_err(|e| IngestError::load(table, "commit failed", e))?;

        let result = LoadResult {
            table: table.to_string(),
            source: None,
            rows_read: records.len(),
            rows_loaded: loaded,
            rows_skipped: skipped,
            duration_secs: started.elapsed().as_secs_f64(),
        };

        if skipped > 0 {
            warn!(table, loaded, skipped, "Load committed with skipped rows");
        } else {
            info!(table, loaded, "Load committed");
        }

        Ok(result)
    }

    /// Insert one row under a savepoint; `Ok(false)` means the row was skipped
    async fn insert_isolated(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        template: &InsertTemplate,
        record: &Record,
    ) -> Result<bool> {
        let table = self.schema.name;

        sqlx::query("SAVEPOINT csvpg_row")
            .execute(&mut **tx)
            .await
            .map_err(|e| IngestError::load(table, "failed to create savepoint", e))?;

        match insert(tx, template, record).await {
            Ok(()) => {
                sqlx::query("RELEASE SAVEPOINT csvpg_row")
                    .execute(&mut **tx)
                    .await
                    .map_err(|e| IngestError::load(table, "failed to release savepoint", e))?;
                Ok(true)
            },
            Err(e) => {
                let err = IngestError::from_insert(table, record.line(), e);
                if let IngestError::SchemaConflict { .. } = err {
                    return Err(err);
                }
                error!(table, line = record.line(), error = %err, "Skipping rejected row");
                sqlx::query("ROLLBACK TO SAVEPOINT csvpg_row")
                    .execute(&mut **tx)
                    .await
                    .map_err(|e| IngestError::load(table, "failed to roll back savepoint", e))?;
                Ok(false)
            },
        }
    }
}

/// Bind each field positionally; blank fields become NULL
async fn insert(
    conn: &mut PgConnection,
    template: &InsertTemplate,
    record: &Record,
) -> std::result::Result<(), sqlx::Error> {
    let mut query = sqlx::query(template.sql());
    for field in record.fields() {
        let value = if field.is_empty() {
            None
        } else {
            Some(field.as_str())
        };
        query = query.bind(value);
    }
    query.execute(conn).await?;
    Ok(())
}

async fn rollback(tx: Transaction<'static, Postgres>, table: &str, err: IngestError) -> IngestError {
    if let Err(rollback_err) = tx.rollback().await {
        error!(table, error = %rollback_err, "Rollback failed");
    }
    err
}
