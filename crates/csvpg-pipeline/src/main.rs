//! csvpg - main entry point

use anyhow::Context;
use clap::Parser;
use csvpg_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use csvpg_pipeline::connection::{ConnectionRef, ConnectionRegistry};
use csvpg_pipeline::dag::{DagRunReport, TaskOutcome, TaskState};
use csvpg_pipeline::pipeline::{self, build_dag};
use csvpg_pipeline::schema::ALL_TABLES;
use csvpg_pipeline::{Cli, Commands, Dag, PipelineConfig};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .output(LogOutput::Console)
        .log_file_prefix("csvpg")
        .filter_directives("sqlx=warn")
        .build();

    // LOG_* variables take precedence over the flags
    let _guard = match log_config.merge_env().and_then(|c| init_logging(&c)) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {:#}", e);
            None
        },
    };

    // Returning instead of exiting lets the guard flush the file writer
    match execute_command(&cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        },
    }
}

/// Execute the CLI command; `Ok(false)` means the work ran and failed
async fn execute_command(cli: &Cli) -> anyhow::Result<bool> {
    match &cli.command {
        Commands::Schema { table } => {
            let tables = match table {
                Some(table) => vec![table.schema()],
                None => ALL_TABLES.to_vec(),
            };
            for schema in tables {
                println!("{};\n", schema.create_table_sql());
            }
            Ok(true)
        },

        Commands::Graph => {
            let dag = load_dag()?;
            print!("{}", dag.render());
            Ok(true)
        },

        Commands::Run { report } => {
            let dag = load_dag()?;
            let run = dag.run().await;
            print_report(&run);
            if let Some(path) = report {
                write_report(&run, path)?;
            }
            Ok(run.is_success())
        },

        Commands::Load { table } => {
            let dag = load_dag()?;
            run_single(&dag, table.task_id()).await
        },

        Commands::Transform => {
            let dag = load_dag()?;
            run_single(&dag, pipeline::TRANSFORM_TASK).await
        },
    }
}

fn load_dag() -> anyhow::Result<Dag> {
    let config = PipelineConfig::load().context("Failed to load configuration")?;
    info!(config = ?config, "Configuration loaded");

    let registry = ConnectionRegistry::from_config(
        ConnectionRef::new(config.ingest.conn_id.clone()),
        &config.database,
    )?;
    Ok(build_dag(&config, Arc::new(registry))?)
}

async fn run_single(dag: &Dag, task_id: &str) -> anyhow::Result<bool> {
    match dag.run_task(task_id).await {
        Ok(outcome) => {
            println!("{}: {}", task_id, describe(&outcome));
            Ok(true)
        },
        Err(e) => {
            error!(task = task_id, error = %e, "Task failed");
            eprintln!("{}: failed: {}", task_id, e);
            Ok(false)
        },
    }
}

fn describe(outcome: &TaskOutcome) -> String {
    match outcome {
        TaskOutcome::Loaded(load) if load.rows_skipped > 0 => format!(
            "loaded {} of {} rows into {} ({} skipped) in {:.2}s",
            load.rows_loaded, load.rows_read, load.table, load.rows_skipped, load.duration_secs
        ),
        TaskOutcome::Loaded(load) => format!(
            "loaded {} rows into {} in {:.2}s",
            load.rows_loaded, load.table, load.duration_secs
        ),
        TaskOutcome::Transformed(t) => {
            format!("'{}' exited with {} in {:.2}s", t.command, t.exit_code, t.duration_secs)
        },
        TaskOutcome::Done => "done".to_string(),
    }
}

fn print_report(report: &DagRunReport) {
    println!("DAG {} run {}", report.dag_id, report.run_id);
    for task in &report.tasks {
        let detail = match (task.state, &task.outcome, &task.error) {
            (TaskState::Success, Some(outcome), _) => describe(outcome),
            (TaskState::Failed, _, Some(err)) => err.clone(),
            _ => String::new(),
        };
        println!(
            "  {:<20} {:<16} attempts={} {}",
            task.task_id,
            task.state.as_str(),
            task.attempts,
            detail
        );
    }
    println!(
        "{}",
        if report.is_success() {
            "Run succeeded"
        } else {
            "Run failed"
        }
    );
}

fn write_report(report: &DagRunReport, path: &Path) -> anyhow::Result<()> {
    let json = report.to_json().context("Failed to serialize run report")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write run report to {}", path.display()))?;
    info!(path = %path.display(), "Run report written");
    Ok(())
}
