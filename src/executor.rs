//! Task-kind executors (v0.1)
//!
//! The scheduler's only contract with a task kind is [`TaskRunner`]:
//! take an input value, return a value or reject. The table is built
//! once per run from immutable task config, so no executor reaches
//! back into live editor state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::EngineError;
use crate::graph::{Graph, TaskKind};

/// Default timeout for HTTP requests (30 seconds)
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// One asynchronous unit of work. Non-fatal failures reject with an
/// error instead of returning a sentinel value.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, input: Value) -> Result<Value, EngineError>;
}

/// Per-run table: task_id -> executor, built from immutable config
#[derive(Default)]
pub struct ExecutorTable {
    runners: HashMap<Arc<str>, Arc<dyn TaskRunner>>,
}

impl ExecutorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the table for a run. Iterate tasks get no entry: their
    /// fan-out is routed by the scheduler, not by a generic executor.
    pub fn from_graph(graph: &Graph, client: reqwest::Client) -> Result<Self, EngineError> {
        let mut table = Self::new();
        for task in graph.tasks() {
            match task.kind {
                TaskKind::Fetch => {
                    let config: FetchConfig = serde_json::from_value(task.config.clone())
                        .map_err(|e| EngineError::InvalidConfig {
                            task_id: task.id.to_string(),
                            details: e.to_string(),
                        })?;
                    table.insert(
                        Arc::clone(&task.id),
                        Arc::new(FetchRunner::new(config, client.clone())),
                    );
                }
                TaskKind::Iterate => {}
            }
        }
        Ok(table)
    }

    pub fn insert(&mut self, task_id: Arc<str>, runner: Arc<dyn TaskRunner>) {
        self.runners.insert(task_id, runner);
    }

    pub fn get(&self, task_id: &str) -> Option<Arc<dyn TaskRunner>> {
        self.runners.get(task_id).map(Arc::clone)
    }

    pub fn len(&self) -> usize {
        self.runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }
}

// trait objects have no Debug, so render the table by size
impl std::fmt::Debug for ExecutorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorTable")
            .field("len", &self.len())
            .finish()
    }
}

/// Shared HTTP client for all fetch tasks in a run (connection pooling)
pub fn default_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .connect_timeout(Duration::from_secs(10))
        .redirect(reqwest::redirect::Policy::limited(5))
        .user_agent("weave/0.1")
        .build()
        .expect("Failed to build HTTP client")
}

/// Config for a fetch task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub url: String,
    pub method: String,
    pub query_string: String,
    pub body: Option<String>,
    pub headers: Vec<HeaderEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeaderEntry {
    pub key: String,
    pub value: String,
}

/// Config for an iterate task: the property projected from each element
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IterateConfig {
    pub property: Option<String>,
}

/// HTTP request executor for fetch tasks
pub struct FetchRunner {
    config: FetchConfig,
    client: reqwest::Client,
}

impl FetchRunner {
    pub fn new(config: FetchConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    /// Base URL with the configured query string appended
    fn full_url(&self) -> Result<url::Url, EngineError> {
        let mut parsed = url::Url::parse(&self.config.url)
            .map_err(|e| EngineError::Execution(format!("Invalid URL '{}': {}", self.config.url, e)))?;
        if !self.config.query_string.is_empty() {
            parsed.set_query(Some(&self.config.query_string));
        }
        Ok(parsed)
    }
}

#[async_trait]
impl TaskRunner for FetchRunner {
    #[instrument(skip(self, _input), fields(url = %self.config.url, method = %self.config.method))]
    async fn run(&self, _input: Value) -> Result<Value, EngineError> {
        debug!("Executing fetch task");
        let url = self.full_url()?;
        let method = self.config.method.as_str();

        let mut request = if method.eq_ignore_ascii_case("POST") {
            self.client.post(url)
        } else if method.eq_ignore_ascii_case("PUT") {
            self.client.put(url)
        } else if method.eq_ignore_ascii_case("DELETE") {
            self.client.delete(url)
        } else {
            self.client.get(url) // Default to GET
        };

        for header in &self.config.headers {
            if header.key.is_empty() {
                continue;
            }
            request = request.header(&header.key, &header.value);
        }

        if let Some(body) = &self.config.body {
            if method.eq_ignore_ascii_case("POST") || method.eq_ignore_ascii_case("PUT") {
                request = request.body(body.clone());
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::Execution(format!("HTTP request failed: {}", e)))?;

        response
            .json::<Value>()
            .await
            .map_err(|e| EngineError::Execution(format!("Failed to parse response JSON: {}", e)))
    }
}

/// Mock runner for tests: canned responses plus recorded calls
pub struct MockRunner {
    /// Queue of responses to return (FIFO)
    responses: Mutex<Vec<Result<Value, String>>>,
    /// Default response when the queue is empty
    default_response: Value,
    /// Inputs received, in invocation order (for assertions)
    calls: Mutex<Vec<Value>>,
}

impl MockRunner {
    pub fn new(default_response: Value) -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            default_response,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue of responses consumed front-first
    pub fn with_responses(responses: Vec<Result<Value, String>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            default_response: Value::Null,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl TaskRunner for MockRunner {
    async fn run(&self, input: Value) -> Result<Value, EngineError> {
        self.calls.lock().push(input);
        let next = {
            let mut queue = self.responses.lock();
            if queue.is_empty() {
                None
            } else {
                Some(queue.remove(0))
            }
        };
        match next {
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => Err(EngineError::Execution(message)),
            None => Ok(self.default_response.clone()),
        }
    }
}
