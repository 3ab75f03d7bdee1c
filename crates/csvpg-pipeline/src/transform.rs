//! Transform trigger
//!
//! Runs the external transformation tool (by default `dbt run --profile
//! customers`) in a fixed project directory once every load has succeeded.
//! The program is spawned directly with its argument list, never through a
//! shell, and only a zero exit status counts as success.

use crate::config::TransformSettings;
use crate::dag::{Task, TaskOutcome};
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{info, info_span, warn, Instrument};

/// Lines of stderr quoted in a failure message
const STDERR_TAIL_LINES: usize = 20;

/// Program, arguments and working directory of the external command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl TransformCommand {
    pub fn new(program: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// `<program> run --profile <profile>`
    pub fn dbt_run(settings: &TransformSettings) -> Self {
        Self::new(settings.program.clone(), settings.project_dir.clone())
            .arg("run")
            .arg("--profile")
            .arg(settings.profile.clone())
    }

    /// Command line for logs
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of a successful transform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformOutcome {
    pub command: String,
    pub exit_code: i32,
    pub duration_secs: f64,
}

/// Task that runs the transformation command
pub struct TransformTrigger {
    task_id: String,
    command: TransformCommand,
}

impl TransformTrigger {
    pub fn new(task_id: impl Into<String>, command: TransformCommand) -> Self {
        Self {
            task_id: task_id.into(),
            command,
        }
    }

    pub fn command(&self) -> &TransformCommand {
        &self.command
    }

    pub async fn run(&self) -> Result<TransformOutcome> {
        let command = &self.command;
        let started = Instant::now();

        ensure_dir(&command.working_dir)?;
        info!(
            command = %command.display(),
            working_dir = %command.working_dir.display(),
            "Starting transform"
        );

        let output = Command::new(&command.program)
            .args(&command.args)
            .current_dir(&command.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                IngestError::transform(format!("failed to start '{}': {}", command.program, e), None)
            })?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            info!(target: "csvpg::transform::stdout", "{}", line);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines() {
            warn!(target: "csvpg::transform::stderr", "{}", line);
        }

        if !output.status.success() {
            return Err(IngestError::transform(
                format!(
                    "'{}' exited with {}{}",
                    command.display(),
                    output.status,
                    tail(&stderr)
                ),
                output.status.code(),
            ));
        }

        let outcome = TransformOutcome {
            command: command.display(),
            exit_code: output.status.code().unwrap_or_default(),
            duration_secs: started.elapsed().as_secs_f64(),
        };
        info!(duration_secs = outcome.duration_secs, "Transform finished");
        Ok(outcome)
    }
}

#[async_trait]
impl Task for TransformTrigger {
    fn id(&self) -> &str {
        &self.task_id
    }

    async fn execute(&self) -> Result<TaskOutcome> {
        let span = info_span!("transform", task = %self.task_id);
        self.run()
            .instrument(span)
            .await
            .map(TaskOutcome::Transformed)
    }
}

fn ensure_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(IngestError::transform(
            format!("working directory '{}' does not exist", dir.display()),
            None,
        ))
    }
}

fn tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return String::new();
    }
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    format!(": {}", lines[start..].join(" | "))
}
