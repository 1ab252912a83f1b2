//! Connection validation (v0.1)
//!
//! Two layers:
//! - `is_legal`: the per-edge predicate the editor calls before
//!   admitting a candidate connection
//! - `validate_graph`: the whole-graph pass run immediately before each
//!   execution, catching graphs that went illegal through later edits

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::error::EngineError;
use crate::graph::{Connection, Graph, Port, TaskKind};

/// Per-edge legality predicate. Rules in order, short-circuiting:
/// 1. the target port must be free (ports are single-writer)
/// 2. no self-loops
/// 3. an edge into an iterate's return port must close a loop that the
///    iterate's output port opened: the iterate needs at least one
///    outgoing output connection, and the candidate's source must be
///    reachable over forward (non-return) edges from some output
///    successor
pub fn is_legal(candidate: &Connection, graph: &Graph) -> bool {
    if graph.target_port_occupied(&candidate.target, candidate.target_port) {
        return false;
    }

    if candidate.source == candidate.target {
        return false;
    }

    let target_is_iterate = graph
        .task(&candidate.target)
        .is_some_and(|t| t.kind == TaskKind::Iterate);

    if target_is_iterate && candidate.target_port == Port::Return {
        return closes_iteration_loop(candidate, graph);
    }

    true
}

/// Rule 3: the return edge may not bypass the iteration body
fn closes_iteration_loop(candidate: &Connection, graph: &Graph) -> bool {
    let output_edges = graph.outgoing(&candidate.target, Some(Port::Output));
    if output_edges.is_empty() {
        return false;
    }

    output_edges
        .iter()
        .any(|edge| graph.has_forward_path(&edge.target, &candidate.source))
}

/// Whole-graph legality pass, run at the start of every execution.
///
/// Checks what incremental edge validation cannot guarantee after
/// editing: a unique entry task, acyclicity over ordinary edges, and
/// that every accepted return edge still closes a loop (an output edge
/// may have been deleted since the return edge was admitted).
pub fn validate_graph(graph: &Graph) -> Result<(), EngineError> {
    graph.entry_task()?;
    check_acyclic(graph)?;

    for conn in graph.connections() {
        if conn.target_port != Port::Return {
            continue;
        }
        if !closes_iteration_loop(conn, graph) {
            return Err(EngineError::IllegalReturnConnection {
                task_id: conn.target.to_string(),
                from: conn.source.to_string(),
            });
        }
    }

    Ok(())
}

/// Kahn's algorithm over ordinary edges; leftover tasks form a cycle
fn check_acyclic(graph: &Graph) -> Result<(), EngineError> {
    let mut in_degree: HashMap<Arc<str>, usize> = graph
        .tasks()
        .map(|t| (Arc::clone(&t.id), 0))
        .collect();

    for conn in graph.connections().iter().filter(|c| c.is_ordinary()) {
        if let Some(d) = in_degree.get_mut(conn.target.as_ref()) {
            *d += 1;
        }
    }

    let mut queue: VecDeque<Arc<str>> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| Arc::clone(id))
        .collect();

    let mut settled = 0usize;
    while let Some(current) = queue.pop_front() {
        settled += 1;
        for conn in graph.outgoing(&current, None) {
            if !conn.is_ordinary() {
                continue;
            }
            if let Some(d) = in_degree.get_mut(conn.target.as_ref()) {
                *d -= 1;
                if *d == 0 {
                    queue.push_back(Arc::clone(&conn.target));
                }
            }
        }
    }

    if settled == graph.task_count() {
        Ok(())
    } else {
        let mut stuck: Vec<String> = in_degree
            .into_iter()
            .filter(|(_, d)| *d > 0)
            .map(|(id, _)| id.to_string())
            .collect();
        stuck.sort();
        Err(EngineError::CycleDetected {
            path: stuck.join(" -> "),
        })
    }
}
