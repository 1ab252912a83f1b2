//! Execution scheduler (v0.1)
//!
//! Turns a validated graph plus a per-task executor table into a
//! dependency-ordered, once-each asynchronous execution. Each task
//! moves Pending -> Running -> Completed|Failed exactly once per run;
//! the memo map of shared futures guarantees terminal states are never
//! re-entered, no matter how many downstream paths lead to a task.
//!
//! Iterate tasks are special-cased at the port-routing level: the
//! subgraph behind their `output` port runs once per array element in
//! a fresh sub-run (its own memo, seeded with the projected element),
//! strictly sequentially, and the `return` port fires exactly once
//! afterwards with an aggregate summary. Return targets always fire,
//! even when the input was not an array.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::executor::{ExecutorTable, IterateConfig};
use crate::graph::{Graph, Port, Task, TaskKind};
use crate::result_log::{ExecutionResult, Outcome, ResultLog};
use crate::validate;

type SharedResult = Shared<BoxFuture<'static, ExecutionResult>>;

/// Cooperative cancellation, checked before each invocation and
/// between iteration elements. Cancelled tasks record an error outcome
/// without invoking their executor.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One successful element execution in an iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationDetail {
    pub element: Value,
    pub result: Value,
}

/// Aggregate input handed to every return-port target after fan-out
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationSummary {
    /// Number of successful element results
    pub count: usize,
    /// Successful results, in input order
    pub details: Vec<IterationDetail>,
    /// Error descriptions, in occurrence order
    pub errors: Vec<String>,
}

/// Memoized dependency resolver for one run (or one iteration element)
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    graph: Arc<Graph>,
    executors: Arc<ExecutorTable>,
    log: ResultLog,
    cancel: CancelToken,
    /// task_id -> in-flight or settled result; at-most-once execution
    memo: Mutex<HashMap<Arc<str>, SharedResult>>,
}

impl Scheduler {
    pub fn new(
        graph: Arc<Graph>,
        executors: Arc<ExecutorTable>,
        log: ResultLog,
        cancel: CancelToken,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                graph,
                executors,
                log,
                cancel,
                memo: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Resolve a task to its result, executing it at most once. The
    /// returned future is shared: later callers get the same promise.
    pub fn resolve(&self, task_id: Arc<str>) -> SharedResult {
        let mut memo = self.inner.memo.lock();
        if let Some(existing) = memo.get(&task_id) {
            return existing.clone();
        }

        let this = self.clone();
        let id = Arc::clone(&task_id);
        let fut = async move { this.run_task(id).await }.boxed().shared();
        memo.insert(task_id, fut.clone());
        fut
    }

    async fn run_task(self, task_id: Arc<str>) -> ExecutionResult {
        let task = match self.inner.graph.task(&task_id) {
            Some(t) => Arc::clone(t),
            // graph construction guarantees connection endpoints exist
            None => {
                let result = ExecutionResult {
                    task_id: Arc::clone(&task_id),
                    kind: TaskKind::Fetch,
                    outcome: Outcome::Error(format!("unknown task '{}'", task_id)),
                };
                self.inner.log.record(result.clone());
                return result;
            }
        };

        // Predecessor values, in connection declaration order
        let sources: Vec<Arc<str>> = self
            .inner
            .graph
            .incoming(&task_id, Some(Port::Input))
            .iter()
            .map(|c| Arc::clone(&c.source))
            .collect();

        let mut values = Vec::with_capacity(sources.len());
        for source in sources {
            let upstream = self.resolve(source).await;
            values.push(upstream.outcome.as_input());
        }
        let input = assemble_input(values);

        debug!(task_id = %task_id, kind = %task.kind, "Running task");
        let outcome = if self.inner.cancel.is_cancelled() {
            Outcome::Error("run cancelled".to_string())
        } else {
            match task.kind {
                TaskKind::Iterate => self.run_iteration(&task, input).await,
                TaskKind::Fetch => self.run_via_table(&task_id, input).await,
            }
        };

        let result = ExecutionResult {
            task_id,
            kind: task.kind,
            outcome,
        };
        self.inner.log.record(result.clone());
        result
    }

    async fn run_via_table(&self, task_id: &Arc<str>, input: Value) -> Outcome {
        match self.inner.executors.get(task_id) {
            Some(runner) => match runner.run(input).await {
                Ok(value) => Outcome::Value(value),
                Err(e) => Outcome::Error(e.to_string()),
            },
            None => Outcome::Error(format!("no executor for task '{}'", task_id)),
        }
    }

    /// Fan-out/fan-in for one iterate task
    async fn run_iteration(&self, task: &Task, input: Value) -> Outcome {
        let config: IterateConfig =
            serde_json::from_value(task.config.clone()).unwrap_or_default();

        let output_targets: Vec<Arc<str>> = self
            .inner
            .graph
            .outgoing(&task.id, Some(Port::Output))
            .iter()
            .map(|c| Arc::clone(&c.target))
            .collect();
        let return_targets: Vec<Arc<str>> = self
            .inner
            .graph
            .outgoing(&task.id, Some(Port::Return))
            .iter()
            .map(|c| Arc::clone(&c.target))
            .collect();

        let mut details: Vec<IterationDetail> = Vec::new();
        let mut errors: Vec<String> = Vec::new();

        match input.as_array() {
            None => {
                errors.push(
                    EngineError::InvalidArrayInput {
                        task_id: task.id.to_string(),
                    }
                    .to_string(),
                );
            }
            Some(elements) => {
                // Strictly sequential: one element's subgraph fully
                // completes before the next element starts
                for (index, element) in elements.iter().enumerate() {
                    if self.inner.cancel.is_cancelled() {
                        break;
                    }

                    let item = match project_element(element, config.property.as_deref()) {
                        Some(item) => item,
                        None => {
                            errors.push(
                                EngineError::MissingProperty {
                                    property: config.property.clone().unwrap_or_default(),
                                    index,
                                }
                                .to_string(),
                            );
                            continue;
                        }
                    };

                    // Fresh memo per element: the body re-runs once
                    // per element, never shared with the outer run
                    let sub = self.element_run(&task.id, item.clone());
                    for target in &output_targets {
                        let result = sub.resolve(Arc::clone(target)).await;
                        match result.outcome {
                            Outcome::Value(v) => details.push(IterationDetail {
                                element: item.clone(),
                                result: v,
                            }),
                            Outcome::Error(e) => {
                                errors.push(format!("element {index} -> {target}: {e}"))
                            }
                        }
                        // the whole subgraph behind the body target
                        // belongs to this element's execution
                        sub.drive_reachable(target).await;
                    }
                }
            }
        }

        let summary = IterationSummary {
            count: details.len(),
            details,
            errors,
        };
        let summary_value = serde_json::to_value(&summary).unwrap_or(Value::Null);

        // Return targets always fire, exactly once each, even when
        // fan-out was skipped entirely
        for target in &return_targets {
            let sub = self.element_run(&task.id, summary_value.clone());
            let result = sub.resolve(Arc::clone(target)).await;
            if result.outcome.is_error() {
                warn!(iterate = %task.id, target = %target, "return target failed");
            }
            sub.drive_reachable(target).await;
        }

        Outcome::Value(summary_value)
    }

    /// Resolve every task reachable from `from`, so subgraphs hanging
    /// off a fan-out or fan-in target execute within this run's memo
    async fn drive_reachable(&self, from: &Arc<str>) {
        let order = self.inner.graph.reachable_in_run_order(from);
        let pending: Vec<SharedResult> = order
            .iter()
            .map(|id| self.resolve(Arc::clone(id)))
            .collect();
        futures::future::join_all(pending).await;
    }

    /// Sub-run whose memo is seeded so the iterate task resolves to
    /// `seed` instead of re-executing
    fn element_run(&self, iterate_id: &Arc<str>, seed: Value) -> Scheduler {
        let sub = Scheduler::new(
            Arc::clone(&self.inner.graph),
            Arc::clone(&self.inner.executors),
            self.inner.log.clone(),
            self.inner.cancel.clone(),
        );
        let seeded = ExecutionResult {
            task_id: Arc::clone(iterate_id),
            kind: TaskKind::Iterate,
            outcome: Outcome::Value(seed),
        };
        sub.inner
            .memo
            .lock()
            .insert(Arc::clone(iterate_id), futures::future::ready(seeded).boxed().shared());
        sub
    }
}

/// One inbound connection feeds the value itself; zero or many feed an
/// ordered array
fn assemble_input(mut values: Vec<Value>) -> Value {
    if values.len() == 1 {
        values.remove(0)
    } else {
        Value::Array(values)
    }
}

/// Projected per-element value: `element[property]` when a property is
/// configured, the element itself otherwise. Falsy projections count
/// as missing.
fn project_element(element: &Value, property: Option<&str>) -> Option<Value> {
    let item = match property {
        Some(p) if !p.is_empty() => element.get(p)?.clone(),
        _ => element.clone(),
    };
    if is_falsy(&item) {
        None
    } else {
        Some(item)
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f == 0.0),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Summary of one completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub results: Vec<ExecutionResult>,
    pub duration_ms: u64,
}

/// One run of one graph: clears the result log, validates the whole
/// graph, drives the scheduler, and flips `is_running` around the run
/// (including on fatal failure).
pub struct WorkflowRun {
    graph: Arc<Graph>,
    executors: Arc<ExecutorTable>,
    log: ResultLog,
    running: Arc<AtomicBool>,
    cancel: CancelToken,
}

impl WorkflowRun {
    pub fn new(graph: Graph, executors: ExecutorTable) -> Self {
        Self {
            graph: Arc::new(graph),
            executors: Arc::new(executors),
            log: ResultLog::new(),
            running: Arc::new(AtomicBool::new(false)),
            cancel: CancelToken::new(),
        }
    }

    /// Shared handle for live display while the run is in progress
    pub fn log(&self) -> ResultLog {
        self.log.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Extension point: cancelling abandons the run without issuing
    /// further executor calls
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub async fn run(&self) -> Result<RunReport, EngineError> {
        self.log.clear();
        self.running.store(true, Ordering::SeqCst);
        let started = Instant::now();
        let outcome = self.run_inner().await;
        self.running.store(false, Ordering::SeqCst);

        outcome.map(|results| RunReport {
            results,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn run_inner(&self) -> Result<Vec<ExecutionResult>, EngineError> {
        // Whole-graph legality pass: configuration errors are fatal
        // and produce no partial results
        validate::validate_graph(&self.graph)?;

        let entry = Arc::clone(&self.graph.entry_task()?.id);
        let order = self.graph.reachable_in_run_order(&entry);
        debug!(entry = %entry, reachable = order.len(), "Starting run");

        let scheduler = Scheduler::new(
            Arc::clone(&self.graph),
            Arc::clone(&self.executors),
            self.log.clone(),
            self.cancel.clone(),
        );

        // Siblings are initiated together; dependency order is
        // enforced by each resolver awaiting its predecessors
        let pending: Vec<SharedResult> = order
            .iter()
            .map(|id| scheduler.resolve(Arc::clone(id)))
            .collect();
        futures::future::join_all(pending).await;

        Ok(self.log.results())
    }
}
