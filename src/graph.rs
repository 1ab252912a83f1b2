//! Graph model: tasks, ports, typed connections (Arc<str> optimized)
//!
//! Immutable-per-run representation handed to the validator and the
//! scheduler. Edges are indexed by source and by (target, port) at
//! construction time so the scheduler's repeated queries stay O(degree).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;

/// Closed set of task kinds known to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// HTTP request task (one unnamed input port, one unnamed output port)
    Fetch,
    /// Array iteration task (ports: input, output fan-out, return fan-in)
    Iterate,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Fetch => write!(f, "fetch"),
            TaskKind::Iterate => write!(f, "iterate"),
        }
    }
}

/// Named attachment point on a task.
///
/// `Input` is the single target port of every kind; `Output` is the
/// default source port. `Return` exists only on iterate tasks and fires
/// once after fan-out completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Port {
    Input,
    Output,
    Return,
}

impl Port {
    fn default_source() -> Port {
        Port::Output
    }

    fn default_target() -> Port {
        Port::Input
    }
}

impl std::fmt::Display for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Port::Input => write!(f, "input"),
            Port::Output => write!(f, "output"),
            Port::Return => write!(f, "return"),
        }
    }
}

/// A node in the workflow graph. The engine never mutates a task;
/// config changes are whole-value replacement in the editor session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Arc<str>,
    pub kind: TaskKind,
    /// Kind-specific config, opaque to the engine
    #[serde(default)]
    pub config: Value,
}

impl Task {
    pub fn new(id: impl Into<Arc<str>>, kind: TaskKind, config: Value) -> Self {
        Self {
            id: id.into(),
            kind,
            config,
        }
    }
}

/// Directed, port-to-port edge between two tasks
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub source: Arc<str>,
    #[serde(default = "Port::default_source")]
    pub source_port: Port,
    pub target: Arc<str>,
    #[serde(default = "Port::default_target")]
    pub target_port: Port,
}

impl Connection {
    pub fn new(source: impl Into<Arc<str>>, target: impl Into<Arc<str>>) -> Self {
        Self {
            source: source.into(),
            source_port: Port::Output,
            target: target.into(),
            target_port: Port::Input,
        }
    }

    pub fn with_ports(mut self, source_port: Port, target_port: Port) -> Self {
        self.source_port = source_port;
        self.target_port = target_port;
        self
    }

    /// Ordinary edges touch no return port on either end. Acyclicity
    /// and rule-3 reachability are computed over ordinary edges only.
    pub fn is_ordinary(&self) -> bool {
        self.source_port != Port::Return && self.target_port != Port::Return
    }
}

/// Persisted form consumed/produced by save/load collaborators
#[derive(Debug, Serialize, Deserialize)]
struct GraphDoc {
    tasks: Vec<Task>,
    connections: Vec<Connection>,
}

/// Immutable graph of tasks and connections with edge indexes
#[derive(Debug)]
pub struct Graph {
    tasks: HashMap<Arc<str>, Arc<Task>>,
    /// Insertion order, for deterministic iteration and serialization
    order: Vec<Arc<str>>,
    connections: Vec<Connection>,
    /// task_id -> indexes into `connections` with that source
    by_source: HashMap<Arc<str>, Vec<usize>>,
    /// task_id -> indexes into `connections` with that target (declaration order)
    by_target: HashMap<Arc<str>, Vec<usize>>,
}

impl Graph {
    /// Build a graph, rejecting structural violations: duplicate ids,
    /// unknown endpoints, self-loops, invalid ports for a kind, and a
    /// second inbound connection on the same (target, port).
    pub fn new(tasks: Vec<Task>, connections: Vec<Connection>) -> Result<Self, EngineError> {
        let mut task_map: HashMap<Arc<str>, Arc<Task>> = HashMap::with_capacity(tasks.len());
        let mut order: Vec<Arc<str>> = Vec::with_capacity(tasks.len());

        for task in tasks {
            let id = Arc::clone(&task.id);
            if task_map.insert(Arc::clone(&id), Arc::new(task)).is_some() {
                return Err(EngineError::DuplicateTaskId { id: id.to_string() });
            }
            order.push(id);
        }

        let mut by_source: HashMap<Arc<str>, Vec<usize>> = HashMap::new();
        let mut by_target: HashMap<Arc<str>, Vec<usize>> = HashMap::new();
        // Single-writer enforcement at construction time
        let mut seen_target_ports: HashSet<(Arc<str>, Port)> = HashSet::new();

        for (idx, conn) in connections.iter().enumerate() {
            let source = task_map
                .get_key_value(conn.source.as_ref())
                .map(|(id, task)| (Arc::clone(id), Arc::clone(task)))
                .ok_or_else(|| EngineError::UnknownTask {
                    id: conn.source.to_string(),
                })?;
            let target = task_map
                .get_key_value(conn.target.as_ref())
                .map(|(id, task)| (Arc::clone(id), Arc::clone(task)))
                .ok_or_else(|| EngineError::UnknownTask {
                    id: conn.target.to_string(),
                })?;

            if conn.source == conn.target {
                return Err(EngineError::SelfLoop {
                    id: conn.source.to_string(),
                });
            }

            check_port(&source.1, conn.source_port, PortRole::Source)?;
            check_port(&target.1, conn.target_port, PortRole::Target)?;

            if !seen_target_ports.insert((Arc::clone(&target.0), conn.target_port)) {
                return Err(EngineError::PortOccupied {
                    task_id: conn.target.to_string(),
                    port: conn.target_port.to_string(),
                });
            }

            by_source.entry(source.0).or_default().push(idx);
            by_target.entry(target.0).or_default().push(idx);
        }

        Ok(Self {
            tasks: task_map,
            order,
            connections,
            by_source,
            by_target,
        })
    }

    /// O(1) lookup by id
    #[inline]
    pub fn task(&self, task_id: &str) -> Option<&Arc<Task>> {
        self.tasks.get(task_id)
    }

    /// Tasks in insertion order
    pub fn tasks(&self) -> impl Iterator<Item = &Arc<Task>> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    pub fn task_count(&self) -> usize {
        self.order.len()
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Outgoing connections of a task, optionally restricted to one port
    pub fn outgoing(&self, task_id: &str, port: Option<Port>) -> Vec<&Connection> {
        self.by_source
            .get(task_id)
            .map(|indexes| {
                indexes
                    .iter()
                    .map(|&i| &self.connections[i])
                    .filter(|c| port.map_or(true, |p| c.source_port == p))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Inbound connections of a task in declaration order, optionally
    /// restricted to one port
    pub fn incoming(&self, task_id: &str, port: Option<Port>) -> Vec<&Connection> {
        self.by_target
            .get(task_id)
            .map(|indexes| {
                indexes
                    .iter()
                    .map(|&i| &self.connections[i])
                    .filter(|c| port.map_or(true, |p| c.target_port == p))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether (task, port) already has an inbound connection
    #[inline]
    pub fn target_port_occupied(&self, task_id: &str, port: Port) -> bool {
        self.by_target
            .get(task_id)
            .is_some_and(|indexes| indexes.iter().any(|&i| self.connections[i].target_port == port))
    }

    /// The unique task with no inbound connection on any port
    pub fn entry_task(&self) -> Result<&Arc<Task>, EngineError> {
        let mut candidates = self
            .order
            .iter()
            .filter(|id| !self.by_target.contains_key(id.as_ref()));

        let first = candidates.next().ok_or(EngineError::NoEntryTask)?;
        let rest: Vec<String> = candidates.map(|id| id.to_string()).collect();
        if !rest.is_empty() {
            let mut all = vec![first.to_string()];
            all.extend(rest);
            return Err(EngineError::AmbiguousEntryTask { candidates: all });
        }

        self.tasks.get(first.as_ref()).ok_or(EngineError::NoEntryTask)
    }

    /// Whether `to` is reachable from `from` over ordinary (non-return)
    /// edges. Reflexive: a task reaches itself. BFS with a visited set
    /// so cycles cannot hang the search.
    pub fn has_forward_path(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        visited.insert(from);
        queue.push_back(from);

        while let Some(current) = queue.pop_front() {
            for conn in self.outgoing(current, None) {
                if !conn.is_ordinary() {
                    continue;
                }
                if conn.target.as_ref() == to {
                    return true;
                }
                if visited.insert(conn.target.as_ref()) {
                    queue.push_back(conn.target.as_ref());
                }
            }
        }

        false
    }

    /// Successors followed by the outer run. Edges leaving an iterate's
    /// output/return ports belong to the fan-out machinery, and edges
    /// into a return port only close loops; neither is followed here.
    pub fn run_successors(&self, task_id: &str) -> Vec<Arc<str>> {
        let is_iterate = self
            .task(task_id)
            .is_some_and(|t| t.kind == TaskKind::Iterate);

        self.outgoing(task_id, None)
            .into_iter()
            .filter(|c| {
                if is_iterate && matches!(c.source_port, Port::Output | Port::Return) {
                    return false;
                }
                c.target_port != Port::Return
            })
            .map(|c| Arc::clone(&c.target))
            .collect()
    }

    /// Breadth-first order of every task the outer run schedules,
    /// starting from `entry`
    pub fn reachable_in_run_order(&self, entry: &Arc<str>) -> Vec<Arc<str>> {
        let mut seen: HashSet<Arc<str>> = HashSet::new();
        let mut order: Vec<Arc<str>> = Vec::new();
        let mut queue: VecDeque<Arc<str>> = VecDeque::new();

        seen.insert(Arc::clone(entry));
        queue.push_back(Arc::clone(entry));

        while let Some(current) = queue.pop_front() {
            order.push(Arc::clone(&current));
            for next in self.run_successors(&current) {
                if seen.insert(Arc::clone(&next)) {
                    queue.push_back(next);
                }
            }
        }

        order
    }
}

#[derive(Clone, Copy)]
enum PortRole {
    Source,
    Target,
}

/// Port legality per kind: sources are output (all kinds) or return
/// (iterate only); targets are input (all kinds) or return (iterate only).
fn check_port(task: &Task, port: Port, role: PortRole) -> Result<(), EngineError> {
    let valid = match (role, port) {
        (PortRole::Source, Port::Output) => true,
        (PortRole::Source, Port::Return) => task.kind == TaskKind::Iterate,
        (PortRole::Target, Port::Input) => true,
        (PortRole::Target, Port::Return) => task.kind == TaskKind::Iterate,
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(EngineError::InvalidPort {
            task_id: task.id.to_string(),
            port: port.to_string(),
            kind: task.kind.to_string(),
        })
    }
}

impl Serialize for Graph {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let doc = GraphDoc {
            tasks: self.tasks().map(|t| (**t).clone()).collect(),
            connections: self.connections.clone(),
        };
        doc.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Graph {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let doc = GraphDoc::deserialize(deserializer)?;
        Graph::new(doc.tasks, doc.connections).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fetch(id: &str) -> Task {
        Task::new(id, TaskKind::Fetch, json!({"url": "https://example.com"}))
    }

    fn iterate(id: &str) -> Task {
        Task::new(id, TaskKind::Iterate, json!({"property": "k"}))
    }

    #[test]
    fn builds_indexes() {
        let graph = Graph::new(
            vec![fetch("a"), iterate("b"), fetch("c")],
            vec![
                Connection::new("a", "b"),
                Connection::new("b", "c").with_ports(Port::Output, Port::Input),
            ],
        )
        .unwrap();

        assert_eq!(graph.task_count(), 3);
        assert_eq!(graph.outgoing("a", None).len(), 1);
        assert_eq!(graph.outgoing("b", Some(Port::Output)).len(), 1);
        assert_eq!(graph.outgoing("b", Some(Port::Return)).len(), 0);
        assert_eq!(graph.incoming("c", None).len(), 1);
        assert!(graph.target_port_occupied("b", Port::Input));
        assert!(!graph.target_port_occupied("b", Port::Return));
    }

    #[test]
    fn rejects_duplicate_task_id() {
        let err = Graph::new(vec![fetch("a"), fetch("a")], vec![]).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateTaskId { .. }));
    }

    #[test]
    fn rejects_unknown_endpoint() {
        let err = Graph::new(vec![fetch("a")], vec![Connection::new("a", "ghost")]).unwrap_err();
        assert!(matches!(err, EngineError::UnknownTask { .. }));
    }

    #[test]
    fn rejects_self_loop() {
        let err = Graph::new(vec![fetch("a")], vec![Connection::new("a", "a")]).unwrap_err();
        assert!(matches!(err, EngineError::SelfLoop { .. }));
    }

    #[test]
    fn rejects_second_inbound_on_same_port() {
        let err = Graph::new(
            vec![fetch("a"), fetch("b"), fetch("c")],
            vec![Connection::new("a", "c"), Connection::new("b", "c")],
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::PortOccupied { .. }));
    }

    #[test]
    fn rejects_return_port_on_fetch() {
        let err = Graph::new(
            vec![fetch("a"), fetch("b")],
            vec![Connection::new("a", "b").with_ports(Port::Return, Port::Input)],
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidPort { .. }));
    }

    #[test]
    fn entry_task_is_unique_no_inbound() {
        let graph = Graph::new(
            vec![fetch("a"), fetch("b")],
            vec![Connection::new("a", "b")],
        )
        .unwrap();
        assert_eq!(graph.entry_task().unwrap().id.as_ref(), "a");
    }

    #[test]
    fn entry_task_errors() {
        let empty = Graph::new(vec![], vec![]).unwrap();
        assert!(matches!(empty.entry_task(), Err(EngineError::NoEntryTask)));

        let two = Graph::new(vec![fetch("a"), fetch("b")], vec![]).unwrap();
        match two.entry_task() {
            Err(EngineError::AmbiguousEntryTask { candidates }) => {
                assert_eq!(candidates, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected AmbiguousEntryTask, got {other:?}"),
        }
    }

    #[test]
    fn forward_path_is_reflexive_and_skips_return_edges() {
        let graph = Graph::new(
            vec![fetch("a"), iterate("b"), fetch("c"), fetch("d")],
            vec![
                Connection::new("a", "b"),
                Connection::new("b", "c").with_ports(Port::Output, Port::Input),
                Connection::new("b", "d").with_ports(Port::Return, Port::Input),
            ],
        )
        .unwrap();

        assert!(graph.has_forward_path("a", "a"));
        assert!(graph.has_forward_path("a", "c"));
        // d is only reachable through the return edge
        assert!(!graph.has_forward_path("a", "d"));
    }

    #[test]
    fn forward_path_survives_loop_closure() {
        // c closes the loop back into b's return port; the visited set
        // must terminate the search
        let graph = Graph::new(
            vec![fetch("a"), iterate("b"), fetch("c")],
            vec![
                Connection::new("a", "b"),
                Connection::new("b", "c").with_ports(Port::Output, Port::Input),
                Connection::new("c", "b").with_ports(Port::Output, Port::Return),
            ],
        )
        .unwrap();

        assert!(graph.has_forward_path("a", "c"));
        assert!(!graph.has_forward_path("c", "a"));
    }

    #[test]
    fn run_successors_skip_fan_out_ports() {
        let graph = Graph::new(
            vec![fetch("a"), iterate("b"), fetch("c"), fetch("d")],
            vec![
                Connection::new("a", "b"),
                Connection::new("b", "c").with_ports(Port::Output, Port::Input),
                Connection::new("b", "d").with_ports(Port::Return, Port::Input),
            ],
        )
        .unwrap();

        assert_eq!(graph.run_successors("a"), vec![Arc::<str>::from("b")]);
        assert!(graph.run_successors("b").is_empty());

        let order = graph.reachable_in_run_order(&Arc::from("a"));
        assert_eq!(order, vec![Arc::<str>::from("a"), Arc::<str>::from("b")]);
    }

    #[test]
    fn document_round_trip_preserves_tasks_and_connections() {
        let graph = Graph::new(
            vec![fetch("a"), iterate("b"), fetch("c")],
            vec![
                Connection::new("a", "b"),
                Connection::new("b", "c").with_ports(Port::Output, Port::Input),
            ],
        )
        .unwrap();

        let doc = serde_json::to_string(&graph).unwrap();
        let reloaded: Graph = serde_json::from_str(&doc).unwrap();

        let ids: HashSet<Arc<str>> = graph.tasks().map(|t| Arc::clone(&t.id)).collect();
        let reloaded_ids: HashSet<Arc<str>> =
            reloaded.tasks().map(|t| Arc::clone(&t.id)).collect();
        assert_eq!(ids, reloaded_ids);

        let edges: HashSet<Connection> = graph.connections().iter().cloned().collect();
        let reloaded_edges: HashSet<Connection> =
            reloaded.connections().iter().cloned().collect();
        assert_eq!(edges, reloaded_edges);
    }

    #[test]
    fn document_load_rejects_structural_violations() {
        let doc = json!({
            "tasks": [
                {"id": "a", "kind": "fetch", "config": {}},
                {"id": "b", "kind": "fetch", "config": {}}
            ],
            "connections": [
                {"source": "a", "target": "b"},
                {"source": "a", "target": "b"}
            ]
        });
        let err = serde_json::from_value::<Graph>(doc).unwrap_err();
        assert!(err.to_string().contains("WEAVE-013"));
    }

    #[test]
    fn connection_ports_default_in_documents() {
        let conn: Connection =
            serde_json::from_value(json!({"source": "a", "target": "b"})).unwrap();
        assert_eq!(conn.source_port, Port::Output);
        assert_eq!(conn.target_port, Port::Input);
    }
}
