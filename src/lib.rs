//! Weave - workflow graph execution engine with fan-out iteration

pub mod error;
pub mod executor;
pub mod graph;
pub mod result_log;
pub mod scheduler;
pub mod session;
pub mod validate;

pub use error::{EngineError, FixSuggestion};
pub use executor::{ExecutorTable, FetchConfig, FetchRunner, IterateConfig, MockRunner, TaskRunner};
pub use graph::{Connection, Graph, Port, Task, TaskKind};
pub use result_log::{ExecutionResult, Outcome, ResultLog};
pub use scheduler::{
    CancelToken, IterationDetail, IterationSummary, RunReport, Scheduler, WorkflowRun,
};
pub use session::{CopiedTask, EditorSession};
pub use validate::{is_legal, validate_graph};
