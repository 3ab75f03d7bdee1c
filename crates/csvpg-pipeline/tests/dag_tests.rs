//! Graph execution tests with in-memory tasks
//!
//! No database or external program is needed here; the tasks only record
//! that they ran.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use csvpg_pipeline::dag::{Dag, RetryPolicy, Task, TaskOutcome, TaskState};
use csvpg_pipeline::error::{IngestError, Result};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

/// Fails the first `failures` attempts, then succeeds
struct Flaky {
    id: &'static str,
    failures: u32,
    calls: AtomicU32,
}

impl Flaky {
    fn new(id: &'static str, failures: u32) -> Arc<Self> {
        Arc::new(Self {
            id,
            failures,
            calls: AtomicU32::new(0),
        })
    }

    fn ok(id: &'static str) -> Arc<Self> {
        Self::new(id, 0)
    }

    fn always_failing(id: &'static str) -> Arc<Self> {
        Self::new(id, u32::MAX)
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Task for Flaky {
    fn id(&self) -> &str {
        self.id
    }

    async fn execute(&self) -> Result<TaskOutcome> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(IngestError::config(format!("{} failed on call {}", self.id, call + 1)))
        } else {
            Ok(TaskOutcome::Done)
        }
    }
}

/// Waits until every other `Rendezvous` task has started
struct Rendezvous {
    id: &'static str,
    barrier: Arc<Barrier>,
}

#[async_trait]
impl Task for Rendezvous {
    fn id(&self) -> &str {
        self.id
    }

    async fn execute(&self) -> Result<TaskOutcome> {
        self.barrier.wait().await;
        Ok(TaskOutcome::Done)
    }
}

struct Panics;

#[async_trait]
impl Task for Panics {
    fn id(&self) -> &str {
        "panics"
    }

    async fn execute(&self) -> Result<TaskOutcome> {
        panic!("task blew up");
    }
}

/// Three loads feeding one transform, like `csv_to_postgres`
fn fan_in(loads: [Arc<Flaky>; 3], transform: Arc<Flaky>) -> Dag {
    let mut dag = Dag::new("fan_in");
    let ids: Vec<&'static str> = loads.iter().map(|l| l.id).collect();
    for load in loads {
        dag.add_task(load).unwrap();
    }
    dag.add_task(transform.clone()).unwrap();
    dag.set_upstream(transform.id, &ids).unwrap();
    dag
}

#[tokio::test]
async fn test_transform_runs_after_all_loads_succeed() {
    let loads = [Flaky::ok("a"), Flaky::ok("b"), Flaky::ok("c")];
    let transform = Flaky::ok("transform");
    let report = fan_in(loads.clone(), transform.clone()).run().await;

    assert!(report.is_success());
    assert_eq!(transform.calls(), 1);
    for load in &loads {
        assert_eq!(load.calls(), 1);
    }

    let transform_started = report.task("transform").unwrap().started_at.unwrap();
    for id in ["a", "b", "c"] {
        assert!(report.task(id).unwrap().finished_at.unwrap() <= transform_started);
    }
}

#[tokio::test]
async fn test_barrier_skips_transform_when_one_load_fails() {
    let loads = [Flaky::ok("a"), Flaky::always_failing("b"), Flaky::ok("c")];
    let transform = Flaky::ok("transform");
    let report = fan_in(loads.clone(), transform.clone()).run().await;

    assert!(!report.is_success());
    assert_eq!(transform.calls(), 0, "transform must never execute");
    assert_eq!(report.state_of("a"), Some(TaskState::Success));
    assert_eq!(report.state_of("b"), Some(TaskState::Failed));
    assert_eq!(report.state_of("c"), Some(TaskState::Success));
    assert_eq!(report.state_of("transform"), Some(TaskState::UpstreamFailed));
    assert_eq!(report.failed_tasks(), vec!["b"]);
    assert_eq!(report.task("b").unwrap().error_kind.as_deref(), Some("config"));
}

#[tokio::test]
async fn test_independent_tasks_run_concurrently() {
    let barrier = Arc::new(Barrier::new(3));
    let mut dag = Dag::new("concurrent");
    for id in ["a", "b", "c"] {
        dag.add_task(Arc::new(Rendezvous {
            id,
            barrier: Arc::clone(&barrier),
        }))
        .unwrap();
    }

    // Sequential execution would never get past the barrier
    let report = tokio::time::timeout(Duration::from_secs(5), dag.run())
        .await
        .expect("tasks did not run concurrently");
    assert!(report.is_success());
}

#[tokio::test]
async fn test_declared_retries_are_honored() {
    let task = Flaky::new("flaky", 2);
    let mut dag = Dag::new("retry")
        .with_default_retry(RetryPolicy::new(2, Duration::from_millis(5)));
    dag.add_task(task.clone()).unwrap();

    let report = dag.run().await;
    assert!(report.is_success());
    assert_eq!(task.calls(), 3);
    assert_eq!(report.task("flaky").unwrap().attempts, 3);
}

#[tokio::test]
async fn test_retries_exhausted_fails_task() {
    let task = Flaky::new("flaky", 5);
    let mut dag = Dag::new("retry");
    dag.add_task_with_retry(task.clone(), RetryPolicy::new(1, Duration::ZERO))
        .unwrap();

    let report = dag.run().await;
    assert_eq!(report.state_of("flaky"), Some(TaskState::Failed));
    assert_eq!(task.calls(), 2);
}

#[tokio::test]
async fn test_failure_cascades_through_chain() {
    let first = Flaky::always_failing("first");
    let second = Flaky::ok("second");
    let third = Flaky::ok("third");
    let mut dag = Dag::new("chain");
    dag.add_task(first).unwrap();
    dag.add_task(second.clone()).unwrap();
    dag.add_task(third.clone()).unwrap();
    dag.set_upstream("second", &["first"]).unwrap();
    dag.set_upstream("third", &["second"]).unwrap();

    let report = dag.run().await;
    assert_eq!(report.state_of("second"), Some(TaskState::UpstreamFailed));
    assert_eq!(report.state_of("third"), Some(TaskState::UpstreamFailed));
    assert_eq!(second.calls() + third.calls(), 0);
    assert_eq!(report.task("third").unwrap().attempts, 0);
}

#[tokio::test]
async fn test_panicking_task_is_reported_as_failed() {
    let downstream = Flaky::ok("downstream");
    let mut dag = Dag::new("panic");
    dag.add_task(Arc::new(Panics)).unwrap();
    dag.add_task(Flaky::ok("sibling")).unwrap();
    dag.add_task(downstream.clone()).unwrap();
    dag.set_upstream("downstream", &["panics"]).unwrap();

    let report = dag.run().await;
    assert_eq!(report.state_of("panics"), Some(TaskState::Failed));
    assert_eq!(report.state_of("sibling"), Some(TaskState::Success));
    assert_eq!(report.state_of("downstream"), Some(TaskState::UpstreamFailed));
    assert_eq!(downstream.calls(), 0);
}

#[tokio::test]
async fn test_run_task_ignores_dependencies() {
    let transform = Flaky::ok("transform");
    let dag = fan_in(
        [Flaky::always_failing("a"), Flaky::ok("b"), Flaky::ok("c")],
        transform.clone(),
    );

    let outcome = dag.run_task("transform").await.unwrap();
    assert_eq!(outcome, TaskOutcome::Done);
    assert_eq!(transform.calls(), 1);
}

#[tokio::test]
async fn test_report_json_names_states() {
    let report = fan_in(
        [Flaky::ok("a"), Flaky::always_failing("b"), Flaky::ok("c")],
        Flaky::ok("transform"),
    )
    .run()
    .await;

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["dag_id"], "fan_in");
    let states: Vec<&str> = json["tasks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["state"].as_str().unwrap())
        .collect();
    assert_eq!(states, vec!["success", "failed", "success", "upstream_failed"]);
}
