//! Task graph declaration and execution
//!
//! A [`Dag`] holds tasks and the upstream edges between them. Edges are
//! validated when they are declared (unknown ids, self edges and cycles are
//! rejected), so a graph that was built successfully can always be run.
//!
//! [`Dag::run`] executes the graph in-process:
//!
//! - every task whose upstream tasks have all succeeded is started at once on
//!   its own tokio task, so independent tasks run concurrently
//! - a task starts only after *all* of its upstream tasks succeeded
//! - when a task fails (after its declared retries), everything downstream of
//!   it is marked `upstream_failed` and never runs
//!
//! Retries follow the declared [`RetryPolicy`]; there is no backoff beyond the
//! fixed delay.

use crate::error::{IngestError, Result};
use crate::loader::LoadResult;
use crate::transform::TransformOutcome;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

/// A unit of work in the graph
#[async_trait]
pub trait Task: Send + Sync {
    fn id(&self) -> &str;

    async fn execute(&self) -> Result<TaskOutcome>;
}

/// What a successful task produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskOutcome {
    Loaded(LoadResult),
    Transformed(TransformOutcome),
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Success,
    Failed,
    /// Skipped because an upstream task failed
    UpstreamFailed,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Success => "success",
            TaskState::Failed => "failed",
            TaskState::UpstreamFailed => "upstream_failed",
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(
            self,
            TaskState::Success | TaskState::Failed | TaskState::UpstreamFailed
        )
    }
}

/// Declared retry behavior of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure
    pub retries: u32,
    pub retry_delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, retry_delay: Duration) -> Self {
        Self {
            retries,
            retry_delay,
        }
    }

    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

struct Node {
    task: Arc<dyn Task>,
    upstream: BTreeSet<usize>,
    retry: Option<RetryPolicy>,
}

/// A directed acyclic graph of tasks
pub struct Dag {
    id: String,
    description: Option<String>,
    owner: Option<String>,
    tags: Vec<String>,
    default_retry: RetryPolicy,
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
}

impl Dag {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
            owner: None,
            tags: Vec::new(),
            default_retry: RetryPolicy::none(),
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Retry policy for tasks added without their own
    pub fn with_default_retry(mut self, policy: RetryPolicy) -> Self {
        self.default_retry = policy;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn add_task(&mut self, task: Arc<dyn Task>) -> Result<()> {
        self.insert_node(task, None)
    }

    pub fn add_task_with_retry(&mut self, task: Arc<dyn Task>, retry: RetryPolicy) -> Result<()> {
        self.insert_node(task, Some(retry))
    }

    fn insert_node(&mut self, task: Arc<dyn Task>, retry: Option<RetryPolicy>) -> Result<()> {
        let id = task.id().to_string();
        if id.is_empty() {
            return Err(IngestError::graph("task id cannot be empty"));
        }
        if self.index.contains_key(&id) {
            return Err(IngestError::graph(format!("duplicate task id '{}'", id)));
        }
        self.index.insert(id, self.nodes.len());
        self.nodes.push(Node {
            task,
            upstream: BTreeSet::new(),
            retry,
        });
        Ok(())
    }

    /// Declare that `task` runs only after every task in `upstream` succeeded
    pub fn set_upstream(&mut self, task: &str, upstream: &[&str]) -> Result<()> {
        let target = self.position(task)?;
        let sources = upstream
            .iter()
            .map(|id| self.position(id))
            .collect::<Result<Vec<_>>>()?;

        if sources.contains(&target) {
            return Err(IngestError::graph(format!("task '{}' cannot depend on itself", task)));
        }

        let previous = self.nodes[target].upstream.clone();
        self.nodes[target].upstream.extend(sources);

        if self.topological_order().is_none() {
            self.nodes[target].upstream = previous;
            return Err(IngestError::graph(format!(
                "dependency of '{}' on [{}] would create a cycle",
                task,
                upstream.join(", ")
            )));
        }

        Ok(())
    }

    pub fn task_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.task.id())
    }

    pub fn upstream_of(&self, task: &str) -> Result<Vec<&str>> {
        let idx = self.position(task)?;
        Ok(self.nodes[idx]
            .upstream
            .iter()
            .map(|&u| self.nodes[u].task.id())
            .collect())
    }

    pub fn downstream_of(&self, task: &str) -> Result<Vec<&str>> {
        let idx = self.position(task)?;
        Ok(self
            .nodes
            .iter()
            .filter(|n| n.upstream.contains(&idx))
            .map(|n| n.task.id())
            .collect())
    }

    fn position(&self, task: &str) -> Result<usize> {
        self.index
            .get(task)
            .copied()
            .ok_or_else(|| IngestError::graph(format!("unknown task '{}'", task)))
    }

    fn retry_for(&self, idx: usize) -> RetryPolicy {
        self.nodes[idx].retry.unwrap_or(self.default_retry)
    }

    /// Kahn's algorithm; `None` if the edges contain a cycle
    fn topological_order(&self) -> Option<Vec<usize>> {
        let mut in_degree: Vec<usize> = self.nodes.iter().map(|n| n.upstream.len()).collect();
        let mut queue: VecDeque<usize> = (0..self.nodes.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(idx) = queue.pop_front() {
            order.push(idx);
            for (next, node) in self.nodes.iter().enumerate() {
                if node.upstream.contains(&idx) {
                    in_degree[next] -= 1;
                    if in_degree[next] == 0 {
                        queue.push_back(next);
                    }
                }
            }
        }

        (order.len() == self.nodes.len()).then_some(order)
    }

    /// Text listing of tasks in execution order with their upstream edges
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "DAG {}", self.id);
        if let Some(ref description) = self.description {
            let _ = writeln!(out, "  description: {}", description);
        }
        if let Some(ref owner) = self.owner {
            let _ = writeln!(out, "  owner: {}", owner);
        }
        if !self.tags.is_empty() {
            let _ = writeln!(out, "  tags: {}", self.tags.join(", "));
        }

        for idx in self.topological_order().unwrap_or_default() {
            let node = &self.nodes[idx];
            let retry = self.retry_for(idx);
            let _ = write!(
                out,
                "  {} (retries: {}, delay: {}s)",
                node.task.id(),
                retry.retries,
                retry.retry_delay.as_secs()
            );
            if !node.upstream.is_empty() {
                let upstream = node
                    .upstream
                    .iter()
                    .map(|&u| self.nodes[u].task.id())
                    .collect::<Vec<_>>()
                    .join(", ");
                let _ = write!(out, " <- [{}]", upstream);
            }
            out.push('\n');
        }
        out
    }

    /// Execute one task once, ignoring its dependencies and retry policy
    pub async fn run_task(&self, task: &str) -> Result<TaskOutcome> {
        let idx = self.position(task)?;
        let node_task = Arc::clone(&self.nodes[idx].task);
        info!(dag = %self.id, task, "Running single task");
        run_attempt(node_task).await
    }

    /// Execute the whole graph and report the final state of every task
    pub async fn run(&self) -> DagRunReport {
        let run_id = Uuid::new_v4();
        let span = info_span!("dag_run", dag = %self.id, run_id = %run_id);
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid) -> DagRunReport {
        let started_at = Utc::now();
        let mut records: Vec<TaskRecord> = self
            .nodes
            .iter()
            .map(|n| TaskRecord::pending(n.task.id()))
            .collect();
        let mut running: JoinSet<(usize, u32, DateTime<Utc>, Result<TaskOutcome>)> = JoinSet::new();

        info!(tasks = self.nodes.len(), "DAG run started");

        loop {
            self.schedule_ready(&mut records, &mut running);

            let Some(joined) = running.join_next().await else {
                break;
            };

            // Attempt futures catch task panics themselves, so a join error
            // here means the run itself is being torn down. The record stays
            // `Running` and is settled as failed below.
            let (idx, attempts, task_started, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!(error = %e, "Task runner aborted");
                    continue;
                },
            };

            let record = &mut records[idx];
            record.attempts = attempts;
            record.started_at = Some(task_started);
            record.finished_at = Some(Utc::now());

            match result {
                Ok(outcome) => {
                    info!(task = %record.task_id, attempts, "Task succeeded");
                    record.state = TaskState::Success;
                    record.outcome = Some(outcome);
                },
                Err(e) => {
                    error!(task = %record.task_id, attempts, error = %e, "Task failed");
                    record.state = TaskState::Failed;
                    record.error_kind = Some(e.kind().to_string());
                    record.error = Some(e.to_string());
                },
            }
        }

        settle_unfinished(&mut records);

        let report = DagRunReport {
            dag_id: self.id.clone(),
            run_id,
            started_at,
            finished_at: Utc::now(),
            tasks: records,
        };

        if report.is_success() {
            info!("DAG run succeeded");
        } else {
            error!(failed = ?report.failed_tasks(), "DAG run failed");
        }

        report
    }

    /// Mark unreachable tasks and start every task whose upstreams succeeded
    fn schedule_ready(
        &self,
        records: &mut [TaskRecord],
        running: &mut JoinSet<(usize, u32, DateTime<Utc>, Result<TaskOutcome>)>,
    ) {
        let mut changed = true;
        while changed {
            changed = false;
            for idx in 0..self.nodes.len() {
                if records[idx].state != TaskState::Pending {
                    continue;
                }
                let upstream = &self.nodes[idx].upstream;

                if upstream.iter().any(|&u| {
                    matches!(records[u].state, TaskState::Failed | TaskState::UpstreamFailed)
                }) {
                    warn!(task = %records[idx].task_id, "Skipping task, upstream failed");
                    records[idx].state = TaskState::UpstreamFailed;
                    changed = true;
                } else if upstream.iter().all(|&u| records[u].state == TaskState::Success) {
                    records[idx].state = TaskState::Running;
                    let task = Arc::clone(&self.nodes[idx].task);
                    let retry = self.retry_for(idx);
                    let span = info_span!(parent: Span::current(), "task", task = %task.id());
                    running.spawn(
                        async move {
                            let started = Utc::now();
                            let (attempts, result) = run_with_retries(task, retry).await;
                            (idx, attempts, started, result)
                        }
                        .instrument(span),
                    );
                }
            }
        }
    }
}

async fn run_with_retries(task: Arc<dyn Task>, retry: RetryPolicy) -> (u32, Result<TaskOutcome>) {
    let max_attempts = retry.retries.saturating_add(1);
    let mut attempt = 1;
    loop {
        match run_attempt(Arc::clone(&task)).await {
            Ok(outcome) => return (attempt, Ok(outcome)),
            Err(e) if attempt < max_attempts => {
                warn!(
                    attempt,
                    max_attempts,
                    delay_secs = retry.retry_delay.as_secs_f64(),
                    error = %e,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(retry.retry_delay).await;
                attempt += 1;
            },
            Err(e) => return (attempt, Err(e)),
        }
    }
}

/// Run one attempt on its own tokio task so a panic becomes a task failure
async fn run_attempt(task: Arc<dyn Task>) -> Result<TaskOutcome> {
    let handle = tokio::spawn(async move { task.execute().await }.instrument(Span::current()));
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(IngestError::graph(format!("task aborted: {}", e))),
    }
}

/// Close out records the join loop never finished
///
/// A task still `Running` lost its runner and counts as failed. Anything
/// still `Pending` could not be reached.
fn settle_unfinished(records: &mut [TaskRecord]) {
    let now = Utc::now();
    for record in records.iter_mut() {
        match record.state {
            TaskState::Running => {
                record.state = TaskState::Failed;
                record.finished_at = Some(now);
                record.error_kind = Some("graph".to_string());
                record.error = Some("task runner aborted".to_string());
            },
            TaskState::Pending => record.state = TaskState::UpstreamFailed,
            _ => {},
        }
    }
}

/// Final state of one task in a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub state: TaskState,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Option<TaskOutcome>,
    pub error_kind: Option<String>,
    pub error: Option<String>,
}

impl TaskRecord {
    fn pending(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            state: TaskState::Pending,
            attempts: 0,
            started_at: None,
            finished_at: None,
            outcome: None,
            error_kind: None,
            error: None,
        }
    }
}

/// Result of one DAG run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagRunReport {
    pub dag_id: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tasks: Vec<TaskRecord>,
}

impl DagRunReport {
    pub fn is_success(&self) -> bool {
        self.tasks.iter().all(|t| t.state == TaskState::Success)
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskRecord> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    pub fn state_of(&self, task_id: &str) -> Option<TaskState> {
        self.task(task_id).map(|t| t.state)
    }

    /// Ids of tasks that failed themselves (not those skipped downstream)
    pub fn failed_tasks(&self) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|t| t.state == TaskState::Failed)
            .map(|t| t.task_id.as_str())
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
