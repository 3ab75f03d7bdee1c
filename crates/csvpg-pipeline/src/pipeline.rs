//! The `csv_to_postgres` graph
//!
//! Three independent loads (`customers`, `orders`, `orderitems`) followed by
//! one transform that waits for all of them.

use crate::config::PipelineConfig;
use crate::connection::{ConnectionRef, ConnectionRegistry};
use crate::dag::{Dag, RetryPolicy};
use crate::error::Result;
use crate::job::{IngestionJob, IngestionSpec};
use crate::schema::{TableSchema, CUSTOMERS, ORDERS, ORDER_ITEMS};
use crate::transform::{TransformCommand, TransformTrigger};
use std::path::PathBuf;
use std::sync::Arc;

pub const DAG_ID: &str = "csv_to_postgres";
pub const DAG_DESCRIPTION: &str = "data ingestion and transformation on postgres";
pub const DAG_OWNER: &str = "csvpg";
pub const DAG_TAGS: [&str; 3] = ["csv", "postgres", "dbt"];

pub const LOAD_CUSTOMERS_TASK: &str = "load_customer_data";
pub const LOAD_ORDERS_TASK: &str = "load_orders";
pub const LOAD_ORDER_ITEMS_TASK: &str = "load_order_items";
pub const TRANSFORM_TASK: &str = "run_dbt_model";

/// Task ids of the loads, in declaration order
pub const LOAD_TASKS: [&str; 3] = [LOAD_CUSTOMERS_TASK, LOAD_ORDERS_TASK, LOAD_ORDER_ITEMS_TASK];

/// Ingestion specs for the three loads
pub fn ingestion_specs(config: &PipelineConfig) -> [(&'static str, IngestionSpec); 3] {
    let conn = ConnectionRef::new(config.ingest.conn_id.clone());
    let policy = config.ingest.on_row_error;
    let spec = |source: &PathBuf, schema: TableSchema| {
        IngestionSpec::new(source.clone(), schema, conn.clone()).with_row_error_policy(policy)
    };

    [
        (LOAD_CUSTOMERS_TASK, spec(&config.ingest.customers_file, CUSTOMERS)),
        (LOAD_ORDERS_TASK, spec(&config.ingest.orders_file, ORDERS)),
        (LOAD_ORDER_ITEMS_TASK, spec(&config.ingest.order_items_file, ORDER_ITEMS)),
    ]
}

/// Declare the full graph with the configured retry policy
pub fn build_dag(config: &PipelineConfig, connections: Arc<ConnectionRegistry>) -> Result<Dag> {
    let mut dag = Dag::new(DAG_ID)
        .with_description(DAG_DESCRIPTION)
        .with_owner(DAG_OWNER)
        .with_tags(DAG_TAGS)
        .with_default_retry(RetryPolicy::new(config.dag.retries, config.dag.retry_delay()));

    for (task_id, spec) in ingestion_specs(config) {
        dag.add_task(Arc::new(IngestionJob::new(task_id, spec, Arc::clone(&connections))))?;
    }

    dag.add_task(Arc::new(TransformTrigger::new(
        TRANSFORM_TASK,
        TransformCommand::dbt_run(&config.transform),
    )))?;
    dag.set_upstream(TRANSFORM_TASK, &LOAD_TASKS)?;

    connections.check_capacity(LOAD_TASKS.len());
    Ok(dag)
}
