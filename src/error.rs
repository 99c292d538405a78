//! Stable error kinds crossing the crate boundary.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Result type alias for orchestration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Hard ceiling on external-dependency recursion depth.
pub const MAX_RESOLUTION_DEPTH: usize = 1000;

/// Errors surfaced by resolution, scheduling, and reporting.
#[derive(Debug, Error)]
pub enum Error {
    /// A report run was identified by a relative path.
    #[error("report run path must be absolute: {}", .path.display())]
    PathMustBeAbsolute { path: PathBuf },

    /// A run with the same name is already present in the report.
    #[error("run already exists: {name}")]
    RunAlreadyExists { name: String },

    /// No run with the given name is present in the report.
    #[error("run not found in report: {name}")]
    RunNotFound { name: String },

    /// The resolver was handed an empty list of configuration paths.
    #[error("could not find any units in the configured working directory")]
    NoUnitsFound,

    /// A unit could not be read or parsed during resolution.
    #[error("error processing unit at {} ({found}): {source}", .path.display())]
    ProcessingUnit {
        path: PathBuf,
        /// How the resolver came across this unit.
        found: String,
        #[source]
        source: anyhow::Error,
    },

    /// The resolved dependency references form a cycle.
    #[error("dependency cycle detected: {}", render_chain(.chain))]
    DependencyCycle { chain: Vec<PathBuf> },

    /// External-dependency resolution exceeded [`MAX_RESOLUTION_DEPTH`].
    #[error("exceeded maximum dependency resolution depth of {depth}")]
    InfiniteRecursion { depth: usize },

    /// The run was cancelled before every unit finished.
    #[error("run cancelled")]
    Cancelled,

    /// One or more units finished as failures; early exits and exclusions are
    /// not part of the aggregate.
    #[error("{}", render_failures(.failures))]
    RunFailures { failures: Vec<UnitFailure> },
}

impl Error {
    pub(crate) fn processing(
        path: impl Into<PathBuf>,
        found: impl Into<String>,
        source: anyhow::Error,
    ) -> Self {
        Self::ProcessingUnit {
            path: path.into(),
            found: found.into(),
            source,
        }
    }
}

/// A single unit failure retained inside [`Error::RunFailures`], in completion
/// order. The error is shared with the node's recorded outcome.
#[derive(Debug, Clone)]
pub struct UnitFailure {
    pub path: PathBuf,
    pub error: Arc<anyhow::Error>,
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.error)
    }
}

fn render_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn render_failures(failures: &[UnitFailure]) -> String {
    let mut out = format!("{} unit(s) failed:", failures.len());
    for failure in failures {
        out.push_str("\n  ");
        out.push_str(&failure.to_string());
    }
    out
}
