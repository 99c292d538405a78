pub mod error;
pub mod graph;
pub mod report;
pub mod runtime;
pub mod scheduler;
pub mod stack;
pub mod unit;

pub use error::{Error, Result, UnitFailure, MAX_RESOLUTION_DEPTH};
pub use graph::{Direction, NodeOutcome, NodeStatus, RunGraph, RunNode, MAX_GRAPH_DEPTH};
pub use report::{EndOption, Report, Run, RunReason, RunResult, Summary};
pub use runtime::backend::{BackendFuture, BackendInvocation, BackendOutput, BackendRunner};
pub use runtime::hooks::{
    AssumeAllApplied, ConfigParser, ConfirmFn, CredentialSource, ExternalConfirmation,
    NoCredentials,
};
pub use runtime::options::{RunOptions, RunOptionsBuilder, UnitOptions, COMMAND_DESTROY};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use scheduler::OutputSink;
pub use stack::Stack;
pub use unit::{ErrorPolicy, ExcludeSpec, Exclusion, Unit, UnitConfig, UnitSet};
