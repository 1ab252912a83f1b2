//! Editor session (v0.1)
//!
//! Mutable draft of a workflow between runs. Every proposed edge goes
//! through [`validate::is_legal`] before it is admitted; `finalize`
//! hands the scheduler an immutable [`Graph`] snapshot.
//!
//! The copy/paste clipboard is a plain value owned by the session, not
//! process-wide state: dropping the session drops the clipboard.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::EngineError;
use crate::graph::{Connection, Graph, Task, TaskKind};
use crate::validate;

/// Clipboard payload: everything about a task except its identity
#[derive(Debug, Clone)]
pub struct CopiedTask {
    pub kind: TaskKind,
    pub config: Value,
}

/// One editing session over one workflow draft
#[derive(Debug, Default)]
pub struct EditorSession {
    tasks: Vec<Task>,
    connections: Vec<Connection>,
    clipboard: Option<CopiedTask>,
    /// Monotonic suffix for pasted task ids
    next_paste_id: u64,
}

impl EditorSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing graph (e.g. a loaded document)
    pub fn from_graph(graph: &Graph) -> Self {
        Self {
            tasks: graph.tasks().map(|t| (**t).clone()).collect(),
            connections: graph.connections().to_vec(),
            clipboard: None,
            next_paste_id: 0,
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn add_task(&mut self, task: Task) -> Result<(), EngineError> {
        if self.tasks.iter().any(|t| t.id == task.id) {
            return Err(EngineError::DuplicateTaskId {
                id: task.id.to_string(),
            });
        }
        debug!(task_id = %task.id, kind = %task.kind, "Adding task");
        self.tasks.push(task);
        Ok(())
    }

    /// Remove a task and every connection attached to it
    pub fn remove_task(&mut self, task_id: &str) -> Result<(), EngineError> {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.id.as_ref() != task_id);
        if self.tasks.len() == before {
            return Err(EngineError::UnknownTask {
                id: task_id.to_string(),
            });
        }
        self.connections
            .retain(|c| c.source.as_ref() != task_id && c.target.as_ref() != task_id);
        Ok(())
    }

    /// Whole-value config replacement; the engine never patches config
    pub fn replace_config(&mut self, task_id: &str, config: Value) -> Result<(), EngineError> {
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id.as_ref() == task_id)
            .ok_or_else(|| EngineError::UnknownTask {
                id: task_id.to_string(),
            })?;
        task.config = config;
        Ok(())
    }

    /// Admit an edge into the draft. Structural violations surface with
    /// their construction error; a return edge that does not close an
    /// iteration loop is rejected as illegal.
    pub fn connect(&mut self, candidate: Connection) -> Result<(), EngineError> {
        // Trial build catches unknown endpoints, self-loops, invalid
        // ports and occupied target ports with precise codes
        let mut trial = self.connections.clone();
        trial.push(candidate.clone());
        Graph::new(self.tasks.clone(), trial)?;

        let current = Graph::new(self.tasks.clone(), self.connections.clone())?;
        if !validate::is_legal(&candidate, &current) {
            return Err(EngineError::IllegalReturnConnection {
                task_id: candidate.target.to_string(),
                from: candidate.source.to_string(),
            });
        }

        debug!(
            source = %candidate.source, source_port = %candidate.source_port,
            target = %candidate.target, target_port = %candidate.target_port,
            "Connecting"
        );
        self.connections.push(candidate);
        Ok(())
    }

    /// Remove a connection; returns whether one was removed
    pub fn disconnect(&mut self, connection: &Connection) -> bool {
        let before = self.connections.len();
        self.connections.retain(|c| c != connection);
        self.connections.len() != before
    }

    /// Copy a task's kind and config to the session clipboard
    pub fn copy_task(&mut self, task_id: &str) -> Result<(), EngineError> {
        let task = self
            .tasks
            .iter()
            .find(|t| t.id.as_ref() == task_id)
            .ok_or_else(|| EngineError::UnknownTask {
                id: task_id.to_string(),
            })?;
        self.clipboard = Some(CopiedTask {
            kind: task.kind,
            config: task.config.clone(),
        });
        Ok(())
    }

    pub fn clipboard(&self) -> Option<&CopiedTask> {
        self.clipboard.as_ref()
    }

    /// Paste the clipboard as a new task with a fresh id. Pasting does
    /// not consume the clipboard; `None` when nothing was copied.
    pub fn paste_task(&mut self) -> Option<Arc<str>> {
        let copied = self.clipboard.clone()?;
        let id = self.fresh_id(copied.kind);
        self.tasks.push(Task::new(
            Arc::clone(&id),
            copied.kind,
            copied.config,
        ));
        Some(id)
    }

    fn fresh_id(&mut self, kind: TaskKind) -> Arc<str> {
        loop {
            self.next_paste_id += 1;
            let candidate = format!("{}-{}", kind, self.next_paste_id);
            if !self.tasks.iter().any(|t| t.id.as_ref() == candidate) {
                return Arc::from(candidate);
            }
        }
    }

    /// Immutable snapshot handed to a run
    pub fn finalize(&self) -> Result<Graph, EngineError> {
        Graph::new(self.tasks.clone(), self.connections.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Port;
    use serde_json::json;

    fn fetch(id: &str) -> Task {
        Task::new(id, TaskKind::Fetch, json!({"url": "https://example.com"}))
    }

    fn iterate(id: &str) -> Task {
        Task::new(id, TaskKind::Iterate, json!({"property": "k"}))
    }

    #[test]
    fn add_rejects_duplicate_id() {
        let mut session = EditorSession::new();
        session.add_task(fetch("a")).unwrap();
        assert!(matches!(
            session.add_task(fetch("a")),
            Err(EngineError::DuplicateTaskId { .. })
        ));
    }

    #[test]
    fn remove_task_drops_attached_connections() {
        let mut session = EditorSession::new();
        session.add_task(fetch("a")).unwrap();
        session.add_task(fetch("b")).unwrap();
        session.add_task(fetch("c")).unwrap();
        session.connect(Connection::new("a", "b")).unwrap();
        session.connect(Connection::new("b", "c")).unwrap();

        session.remove_task("b").unwrap();
        assert!(session.connections().is_empty());
        assert_eq!(session.tasks().len(), 2);
    }

    #[test]
    fn connect_rejects_occupied_port_and_self_loop() {
        let mut session = EditorSession::new();
        session.add_task(fetch("a")).unwrap();
        session.add_task(fetch("b")).unwrap();
        session.add_task(fetch("c")).unwrap();
        session.connect(Connection::new("a", "b")).unwrap();

        assert!(matches!(
            session.connect(Connection::new("c", "b")),
            Err(EngineError::PortOccupied { .. })
        ));
        assert!(matches!(
            session.connect(Connection::new("c", "c")),
            Err(EngineError::SelfLoop { .. })
        ));
    }

    #[test]
    fn connect_gates_return_edges() {
        let mut session = EditorSession::new();
        session.add_task(fetch("a")).unwrap();
        session.add_task(iterate("it")).unwrap();
        session.add_task(fetch("x")).unwrap();
        session.connect(Connection::new("a", "it")).unwrap();

        // no output edge yet: the return edge would bypass the body
        let back = Connection::new("x", "it").with_ports(Port::Output, Port::Return);
        assert!(matches!(
            session.connect(back.clone()),
            Err(EngineError::IllegalReturnConnection { .. })
        ));

        session
            .connect(Connection::new("it", "x").with_ports(Port::Output, Port::Input))
            .unwrap();
        session.connect(back).unwrap();
    }

    #[test]
    fn disconnect_removes_one_edge() {
        let mut session = EditorSession::new();
        session.add_task(fetch("a")).unwrap();
        session.add_task(fetch("b")).unwrap();
        let edge = Connection::new("a", "b");
        session.connect(edge.clone()).unwrap();

        assert!(session.disconnect(&edge));
        assert!(!session.disconnect(&edge));
        assert!(session.connections().is_empty());
    }

    #[test]
    fn stale_return_edge_is_caught_at_finalize_run_validation() {
        // Admitted legally, then the output edge is deleted: the draft
        // still builds, but the run-start pass must reject it.
        let mut session = EditorSession::new();
        session.add_task(fetch("a")).unwrap();
        session.add_task(iterate("it")).unwrap();
        session.add_task(fetch("x")).unwrap();
        session.connect(Connection::new("a", "it")).unwrap();
        let body = Connection::new("it", "x").with_ports(Port::Output, Port::Input);
        session.connect(body.clone()).unwrap();
        session
            .connect(Connection::new("x", "it").with_ports(Port::Output, Port::Return))
            .unwrap();

        assert!(session.disconnect(&body));
        // keep x reachable so the entry stays unique
        session.connect(Connection::new("a", "x")).unwrap();

        let graph = session.finalize().unwrap();
        assert!(matches!(
            validate::validate_graph(&graph),
            Err(EngineError::IllegalReturnConnection { .. })
        ));
    }

    #[test]
    fn clipboard_is_owned_by_the_session() {
        let mut session = EditorSession::new();
        session.add_task(fetch("a")).unwrap();
        session.copy_task("a").unwrap();

        let other = EditorSession::new();
        assert!(other.clipboard().is_none());
        assert!(session.clipboard().is_some());
    }

    #[test]
    fn paste_assigns_fresh_ids_and_keeps_clipboard() {
        let mut session = EditorSession::new();
        session.add_task(fetch("a")).unwrap();
        session.copy_task("a").unwrap();

        let first = session.paste_task().unwrap();
        let second = session.paste_task().unwrap();
        assert_ne!(first, second);
        assert_eq!(session.tasks().len(), 3);

        let pasted = session
            .tasks()
            .iter()
            .find(|t| t.id == first)
            .unwrap();
        assert_eq!(pasted.kind, TaskKind::Fetch);
        assert_eq!(pasted.config["url"], "https://example.com");
    }

    #[test]
    fn paste_with_empty_clipboard_is_a_no_op() {
        let mut session = EditorSession::new();
        assert!(session.paste_task().is_none());
        assert!(session.tasks().is_empty());
    }

    #[test]
    fn finalize_builds_a_runnable_graph() {
        let mut session = EditorSession::new();
        session.add_task(fetch("a")).unwrap();
        session.add_task(fetch("b")).unwrap();
        session.connect(Connection::new("a", "b")).unwrap();

        let graph = session.finalize().unwrap();
        assert_eq!(graph.task_count(), 2);
        assert!(validate::validate_graph(&graph).is_ok());
    }
}
