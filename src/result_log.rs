//! Result sink for workflow execution (v0.1)
//!
//! Append-only ordered log of per-task outcomes, cleared at the start
//! of each run and exposed read-only to the UI while a run is live.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::graph::TaskKind;

/// Outcome of one task invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Value(Value),
    Error(String),
}

impl Outcome {
    /// The value handed to dependents. Errors propagate as an
    /// error-shaped value; interpreting it is the dependent's business.
    pub fn as_input(&self) -> Value {
        match self {
            Outcome::Value(v) => v.clone(),
            Outcome::Error(e) => json!({ "error": e }),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error(_))
    }
}

/// Recorded outcome of one task invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub task_id: Arc<str>,
    pub kind: TaskKind,
    pub outcome: Outcome,
}

/// Thread-safe, append-only result log
#[derive(Clone)]
pub struct ResultLog {
    results: Arc<RwLock<Vec<ExecutionResult>>>,
    next_seq: Arc<AtomicU64>,
}

impl ResultLog {
    pub fn new() -> Self {
        Self {
            results: Arc::new(RwLock::new(Vec::new())),
            next_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Append a result in completion order (returns sequence number)
    pub fn record(&self, result: ExecutionResult) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.results.write().push(result);
        seq
    }

    /// Clear at run start; the previous run's results are dropped
    pub fn clear(&self) {
        self.results.write().clear();
    }

    /// Snapshot of all results (cloned)
    pub fn results(&self) -> Vec<ExecutionResult> {
        self.results.read().clone()
    }

    /// Results for one task, in completion order
    pub fn for_task(&self, task_id: &str) -> Vec<ExecutionResult> {
        self.results()
            .into_iter()
            .filter(|r| r.task_id.as_ref() == task_id)
            .collect()
    }

    /// Serialize to JSON for the UI collaborator
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self.results()).unwrap_or(Value::Null)
    }

    pub fn len(&self) -> usize {
        self.results.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResultLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResultLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultLog").field("len", &self.len()).finish()
    }
}
