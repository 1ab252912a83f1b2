//! Error types with fix suggestions (v0.1)
//!
//! Two classes: configuration errors (fatal to a whole run) and
//! task-level errors (local to one task or one loop element).

use thiserror::Error;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

#[derive(Error, Debug)]
pub enum EngineError {
    // ─────────────────────────────────────────────────────────────
    // Structural errors (WEAVE-010 to WEAVE-014), rejected at
    // graph construction / document load
    // ─────────────────────────────────────────────────────────────
    #[error("WEAVE-010: Duplicate task id '{id}'")]
    DuplicateTaskId { id: String },

    #[error("WEAVE-011: Connection references unknown task '{id}'")]
    UnknownTask { id: String },

    #[error("WEAVE-012: Self-loop: task '{id}' connects to itself")]
    SelfLoop { id: String },

    #[error("WEAVE-013: Port '{port}' on task '{task_id}' already has an inbound connection")]
    PortOccupied { task_id: String, port: String },

    #[error("WEAVE-014: Port '{port}' is not valid for task '{task_id}' ({kind})")]
    InvalidPort {
        task_id: String,
        port: String,
        kind: String,
    },

    // ─────────────────────────────────────────────────────────────
    // Run configuration errors (WEAVE-020 to WEAVE-023), raised by
    // the whole-graph pass at run start; no partial results
    // ─────────────────────────────────────────────────────────────
    #[error("WEAVE-020: No entry task: every task has an inbound connection")]
    NoEntryTask,

    #[error("WEAVE-021: Ambiguous entry task: {candidates:?} all have no inbound connection")]
    AmbiguousEntryTask { candidates: Vec<String> },

    #[error("WEAVE-022: Cycle detected in ordinary edges: {path}")]
    CycleDetected { path: String },

    // field is named `from`, not `source`: thiserror reserves `source`
    // for the error cause chain
    #[error("WEAVE-023: Return connection from '{from}' into '{task_id}' no longer closes a loop opened by its output port")]
    IllegalReturnConnection { task_id: String, from: String },

    // ─────────────────────────────────────────────────────────────
    // Task-level errors (WEAVE-030 to WEAVE-033), local to one
    // task or one loop element
    // ─────────────────────────────────────────────────────────────
    #[error("WEAVE-030: Invalid config for task '{task_id}': {details}")]
    InvalidConfig { task_id: String, details: String },

    #[error("WEAVE-031: Execution error: {0}")]
    Execution(String),

    #[error("WEAVE-032: Input to iterate task '{task_id}' is not an array")]
    InvalidArrayInput { task_id: String },

    #[error("WEAVE-033: Missing property '{property}' in array element at index {index}")]
    MissingProperty { property: String, index: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Configuration errors abort a run before any result is produced
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            EngineError::NoEntryTask
                | EngineError::AmbiguousEntryTask { .. }
                | EngineError::CycleDetected { .. }
                | EngineError::IllegalReturnConnection { .. }
        )
    }
}

impl FixSuggestion for EngineError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            EngineError::DuplicateTaskId { .. } => Some("Use unique task ids"),
            EngineError::UnknownTask { .. } => {
                Some("Verify both connection endpoints exist in the task list")
            }
            EngineError::SelfLoop { .. } => Some("Remove the connection - tasks cannot connect to themselves"),
            EngineError::PortOccupied { .. } => {
                Some("Ports are single-writer: disconnect the existing inbound connection first")
            }
            EngineError::InvalidPort { .. } => {
                Some("Only iterate tasks expose output/return source ports")
            }
            EngineError::NoEntryTask => {
                Some("Add a task with no inbound connection to act as the starting point")
            }
            EngineError::AmbiguousEntryTask { .. } => {
                Some("Connect the extra start candidates so only one task has no inbound connection")
            }
            EngineError::CycleDetected { .. } => Some("Break the cycle - ordinary edges must form a DAG"),
            EngineError::IllegalReturnConnection { .. } => {
                Some("Reconnect the iterate output port so the return edge closes a real loop")
            }
            EngineError::InvalidConfig { .. } => Some("Check the task config fields for this kind"),
            EngineError::Execution(_) => Some("Check the task's URL/command is valid"),
            EngineError::InvalidArrayInput { .. } => {
                Some("Feed the iterate task an upstream output that is a JSON array")
            }
            EngineError::MissingProperty { .. } => {
                Some("Check the configured property exists and is non-empty on every element")
            }
            EngineError::Json(_) => Some("Check the document is valid JSON"),
            EngineError::Io(_) => Some("Check file path and permissions"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_flagged() {
        assert!(EngineError::NoEntryTask.is_configuration());
        assert!(EngineError::AmbiguousEntryTask {
            candidates: vec!["a".into(), "b".into()]
        }
        .is_configuration());
        assert!(!EngineError::Execution("boom".into()).is_configuration());
        assert!(!EngineError::MissingProperty {
            property: "k".into(),
            index: 2
        }
        .is_configuration());
    }

    #[test]
    fn messages_carry_codes() {
        let err = EngineError::PortOccupied {
            task_id: "b".into(),
            port: "input".into(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("WEAVE-013"));
        assert!(msg.contains("'input'"));
        assert!(msg.contains("'b'"));
    }

    #[test]
    fn illegal_return_names_both_endpoints_and_has_no_cause() {
        let err = EngineError::IllegalReturnConnection {
            task_id: "each".into(),
            from: "x".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("WEAVE-023"));
        assert!(msg.contains("'x'") && msg.contains("'each'"));
        // the offending edge is message data, not an error cause
        assert!(std::error::Error::source(&err).is_none());
    }

    #[test]
    fn every_variant_has_a_suggestion() {
        let samples = vec![
            EngineError::NoEntryTask,
            EngineError::SelfLoop { id: "x".into() },
            EngineError::InvalidArrayInput { task_id: "it".into() },
        ];
        for err in samples {
            assert!(err.fix_suggestion().is_some(), "no suggestion for {err}");
        }
    }
}
