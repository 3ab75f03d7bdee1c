//! Command-line interface definitions

use crate::pipeline;
use crate::schema::{TableSchema, CUSTOMERS, ORDERS, ORDER_ITEMS};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// csvpg - load CSV files into PostgreSQL and run the dbt transform
#[derive(Parser, Debug)]
#[command(name = "csvpg")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the whole csv_to_postgres graph
    Run {
        /// Write the JSON run report to this file
        #[arg(short, long)]
        report: Option<PathBuf>,
    },

    /// Load a single table, ignoring dependencies and retries
    Load {
        /// Destination table
        #[arg(value_enum)]
        table: TableName,
    },

    /// Run only the transform command
    Transform,

    /// Print the task graph
    Graph,

    /// Print the CREATE TABLE statement of one or all tables
    Schema {
        /// Destination table (all tables if omitted)
        #[arg(value_enum)]
        table: Option<TableName>,
    },
}

/// Destination tables
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableName {
    Customers,
    Orders,
    Orderitems,
}

impl TableName {
    pub fn schema(self) -> TableSchema {
        match self {
            TableName::Customers => CUSTOMERS,
            TableName::Orders => ORDERS,
            TableName::Orderitems => ORDER_ITEMS,
        }
    }

    pub fn task_id(self) -> &'static str {
        match self {
            TableName::Customers => pipeline::LOAD_CUSTOMERS_TASK,
            TableName::Orders => pipeline::LOAD_ORDERS_TASK,
            TableName::Orderitems => pipeline::LOAD_ORDER_ITEMS_TASK,
        }
    }
}
