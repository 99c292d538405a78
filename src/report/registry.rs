//! Thread-safe registry of per-unit run records.
//!
//! The report holds an outer read/write lock over the run list and each run
//! guards its own fields, so ending one run does not block report-wide
//! iteration longer than necessary.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::report::summary::Summary;

/// Outcome classification of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunResult {
    Succeeded,
    Failed,
    EarlyExit,
    Excluded,
}

impl RunResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::EarlyExit => "early exit",
            Self::Excluded => "excluded",
        }
    }
}

impl std::fmt::Display for RunResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enumerated reason attached to a run's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunReason {
    RetrySucceeded,
    ErrorIgnored,
    RunError,
    ExcludeDir,
    ExcludeBlock,
    EarlyExit,
}

impl RunReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetrySucceeded => "retry succeeded",
            Self::ErrorIgnored => "error ignored",
            Self::RunError => "run error",
            Self::ExcludeDir => "--exclude-dir",
            Self::ExcludeBlock => "exclude block",
            Self::EarlyExit => "early exit",
        }
    }
}

impl std::fmt::Display for RunReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional configurations applied when ending a run.
///
/// The cause variants exist so call sites always pair a cause with the kind of
/// event that produced it.
#[derive(Debug, Clone)]
pub enum EndOption {
    Result(RunResult),
    Reason(RunReason),
    /// Cause is the name of the retry block that recovered the run.
    RetryBlock(String),
    /// Cause is the name of the ignore block that suppressed the failure.
    IgnoreBlock(String),
    /// Cause is the name of the exclude block that filtered the unit.
    ExcludeBlock(String),
    /// Cause is the path of the ancestor whose failure exited this run.
    AncestorExit(String),
    /// Cause is whatever aborted the run itself (e.g. `cancelled`).
    RunError(String),
}

#[derive(Debug, Clone)]
struct RunState {
    started: DateTime<Utc>,
    ended: Option<DateTime<Utc>>,
    result: Option<RunResult>,
    reason: Option<RunReason>,
    cause: Option<String>,
}

/// Record of one unit's execution attempt.
#[derive(Debug)]
pub struct Run {
    name: PathBuf,
    state: RwLock<RunState>,
}

impl Run {
    /// Creates a new run with `started` set to now. The path must be absolute
    /// so the run can be uniquely identified.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.is_absolute() {
            return Err(Error::PathMustBeAbsolute { path });
        }

        Ok(Self {
            name: path,
            state: RwLock::new(RunState {
                started: Utc::now(),
                ended: None,
                result: None,
                reason: None,
                cause: None,
            }),
        })
    }

    pub fn name(&self) -> &Path {
        &self.name
    }

    pub fn started(&self) -> DateTime<Utc> {
        self.state.read().expect("run lock poisoned").started
    }

    pub fn ended(&self) -> Option<DateTime<Utc>> {
        self.state.read().expect("run lock poisoned").ended
    }

    pub fn result(&self) -> Option<RunResult> {
        self.state.read().expect("run lock poisoned").result
    }

    pub fn reason(&self) -> Option<RunReason> {
        self.state.read().expect("run lock poisoned").reason
    }

    pub fn cause(&self) -> Option<String> {
        self.state.read().expect("run lock poisoned").cause.clone()
    }

    fn end(&self, options: impl IntoIterator<Item = EndOption>) {
        let mut state = self.state.write().expect("run lock poisoned");
        state.ended = Some(Utc::now());
        state.result = Some(RunResult::Succeeded);

        for option in options {
            match option {
                EndOption::Result(result) => state.result = Some(result),
                EndOption::Reason(reason) => state.reason = Some(reason),
                EndOption::RetryBlock(cause)
                | EndOption::IgnoreBlock(cause)
                | EndOption::ExcludeBlock(cause)
                | EndOption::AncestorExit(cause)
                | EndOption::RunError(cause) => state.cause = Some(cause),
            }
        }
    }

    pub(crate) fn snapshot(&self) -> RunSnapshot {
        let state = self.state.read().expect("run lock poisoned");
        RunSnapshot {
            name: self.name.clone(),
            started: state.started,
            ended: state.ended,
            result: state.result,
            reason: state.reason,
            cause: state.cause.clone(),
        }
    }
}

/// Lock-free copy of a run used by summary and tabular rendering.
#[derive(Debug, Clone)]
pub(crate) struct RunSnapshot {
    pub name: PathBuf,
    pub started: DateTime<Utc>,
    pub ended: Option<DateTime<Utc>>,
    pub result: Option<RunResult>,
    pub reason: Option<RunReason>,
    pub cause: Option<String>,
}

/// Ordered collection of runs; every operation is internally serialized.
#[derive(Debug)]
pub struct Report {
    runs: RwLock<Vec<Arc<Run>>>,
    should_color: bool,
}

impl Default for Report {
    fn default() -> Self {
        Self::new()
    }
}

impl Report {
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(Vec::new()),
            should_color: true,
        }
    }

    /// Disables ANSI color in the rendered summary.
    pub fn with_disable_color(mut self) -> Self {
        self.should_color = false;
        self
    }

    /// Adds a run to the report. A run with the same name may be added at
    /// most once.
    pub fn add_run(&self, run: Run) -> Result<()> {
        let mut runs = self.runs.write().expect("report lock poisoned");

        if runs.iter().any(|existing| existing.name == run.name) {
            return Err(Error::RunAlreadyExists {
                name: run.name.display().to_string(),
            });
        }

        runs.push(Arc::new(run));
        Ok(())
    }

    /// Returns the run with the given absolute path.
    pub fn get_run(&self, path: &Path) -> Result<Arc<Run>> {
        if !path.is_absolute() {
            return Err(Error::PathMustBeAbsolute {
                path: path.to_path_buf(),
            });
        }

        let runs = self.runs.read().expect("report lock poisoned");
        runs.iter()
            .find(|run| run.name == path)
            .cloned()
            .ok_or_else(|| Error::RunNotFound {
                name: path.display().to_string(),
            })
    }

    /// Ends a run, setting `ended` to now. The run is assumed to have
    /// succeeded unless an [`EndOption::Result`] says otherwise.
    pub fn end_run(
        &self,
        path: &Path,
        options: impl IntoIterator<Item = EndOption>,
    ) -> Result<()> {
        let run = self.get_run(path)?;
        run.end(options);
        Ok(())
    }

    /// Stable sort of the runs by start time, ascending.
    pub fn sort_runs(&self) {
        let mut runs = self.runs.write().expect("report lock poisoned");
        runs.sort_by(|a, b| a.started().cmp(&b.started()));
    }

    pub fn len(&self) -> usize {
        self.runs.read().expect("report lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn snapshots(&self) -> Vec<RunSnapshot> {
        let runs = self.runs.read().expect("report lock poisoned");
        runs.iter().map(|run| run.snapshot()).collect()
    }

    /// Derives a summary of the report. Pure; does not mutate.
    pub fn summarize(&self) -> Summary {
        Summary::from_snapshots(self.snapshots(), self.should_color)
    }
}
