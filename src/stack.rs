//! Stack façade: resolves units from configuration paths, runs them in
//! dependency order, and arranges for the run report to be emitted.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::graph::{Direction, RunGraph, MAX_GRAPH_DEPTH};
use crate::report::Report;
use crate::runtime::backend::BackendRunner;
use crate::runtime::hooks::{
    AssumeAllApplied, ConfigParser, CredentialSource, ExternalConfirmation, NoCredentials,
};
use crate::runtime::options::RunOptions;
use crate::runtime::telemetry::{spawn_metrics_reporter, Telemetry};
use crate::scheduler::{self, ExecParams, OutputSink};
use crate::unit::{Unit, UnitConfig, UnitSet};

pub(crate) mod cycles;
pub(crate) mod external;
pub(crate) mod filters;
pub(crate) mod paths;
pub(crate) mod resolver;

use resolver::Resolver;

/// A stack of interdependent units that can be brought up or torn down in a
/// single run.
pub struct Stack {
    options: Arc<RunOptions>,
    parser: Arc<dyn ConfigParser>,
    backend: Arc<dyn BackendRunner>,
    credentials: Arc<dyn CredentialSource>,
    confirm: Arc<dyn ExternalConfirmation>,
    report: Arc<Report>,
    telemetry: Arc<Telemetry>,
    output: OutputSink,
    child_config: Option<UnitConfig>,
    units: UnitSet,
}

impl Stack {
    pub fn new(
        options: RunOptions,
        parser: Arc<dyn ConfigParser>,
        backend: Arc<dyn BackendRunner>,
    ) -> Self {
        let report = if options.disable_color() {
            Report::new().with_disable_color()
        } else {
            Report::new()
        };

        Self {
            options: Arc::new(options),
            parser,
            backend,
            credentials: Arc::new(NoCredentials),
            confirm: Arc::new(AssumeAllApplied),
            report: Arc::new(report),
            telemetry: Arc::new(Telemetry::default()),
            output: OutputSink::stdio(),
            child_config: None,
            units: UnitSet::new(),
        }
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialSource>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_confirmation(mut self, confirm: Arc<dyn ExternalConfirmation>) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn with_report(mut self, report: Arc<Report>) -> Self {
        self.report = report;
        self
    }

    pub fn with_output(mut self, output: OutputSink) -> Self {
        self.output = output;
        self
    }

    /// Binds the child config the run was started from, so include-relative
    /// resolution works for its parents.
    pub fn with_child_config(mut self, config: UnitConfig) -> Self {
        self.child_config = Some(config);
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn report(&self) -> &Arc<Report> {
        &self.report
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    pub fn units(&self) -> &UnitSet {
        &self.units
    }

    pub fn find_unit(&self, path: &Path) -> Option<&Unit> {
        self.units.get(path)
    }

    /// Resolves the given configuration paths into the stack's unit set,
    /// applying filters and failing on cycles. Must run before [`Stack::run`].
    pub fn resolve(&mut self, config_paths: &[PathBuf]) -> Result<()> {
        let child_includes = self
            .child_config
            .as_ref()
            .map(|config| config.includes.as_slice())
            .unwrap_or(&[]);

        let mut resolver = Resolver::new(
            &self.options,
            self.parser.as_ref(),
            self.credentials.as_ref(),
            self.confirm.as_ref(),
            child_includes,
        )?;

        let units = resolver.resolve(config_paths)?;
        self.telemetry.record_units_resolved(units.len() as u64);
        self.units = units;
        Ok(())
    }

    fn direction(&self) -> Direction {
        if self.options.is_destroy() {
            Direction::Reverse
        } else {
            Direction::Normal
        }
    }

    /// Builds a fresh run graph over the resolved units for this run's
    /// traversal direction.
    pub fn graph(&self) -> RunGraph {
        RunGraph::build(&self.units, self.direction())
    }

    /// Topological groups in execution order; members of a group may run
    /// concurrently.
    pub fn run_order(&self) -> Vec<Vec<Arc<Unit>>> {
        self.graph().groups(MAX_GRAPH_DEPTH)
    }

    /// Human-readable deploy order listing.
    pub fn run_order_display(&self) -> String {
        let mut out = format!(
            "The stack at {} will be processed in the following order for command {}:\n",
            self.options.working_dir().display(),
            self.options.command()
        );

        for (i, group) in self.run_order().iter().enumerate() {
            out.push_str(&format!("Group {}\n", i + 1));
            for unit in group {
                out.push_str(&format!("- Unit {}\n", unit.path.display()));
            }
            out.push('\n');
        }

        out
    }

    /// Logs the deploy order before execution.
    pub fn log_run_order(&self) {
        tracing::info!("{}", self.run_order_display());
    }

    /// Deploy order as JSON: `"Group N"` mapped to the group's unit paths.
    pub fn run_order_json(&self) -> serde_json::Result<String> {
        let mut groups = BTreeMap::new();
        for (i, group) in self.run_order().iter().enumerate() {
            let members: Vec<String> = group
                .iter()
                .map(|unit| unit.path.display().to_string())
                .collect();
            groups.insert(format!("Group {}", i + 1), members);
        }

        serde_json::to_string_pretty(&groups)
    }

    /// Transitive dependents of every unit: which units have to be torn down
    /// before it can be.
    pub fn dependent_units(&self) -> BTreeMap<PathBuf, Vec<PathBuf>> {
        let mut dependents: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();

        for unit in self.units.iter() {
            for dependency in &unit.dependencies {
                let entry = dependents.entry(dependency.clone()).or_default();
                if !entry.contains(&unit.path) {
                    entry.push(unit.path.clone());
                }
            }
        }

        // Merge dependent lists until the closure stops growing.
        loop {
            let mut changed = false;
            let keys: Vec<PathBuf> = dependents.keys().cloned().collect();

            for key in &keys {
                let direct = dependents.get(key).cloned().unwrap_or_default();
                let mut merged = direct.clone();

                for dependent in &direct {
                    if let Some(transitive) = dependents.get(dependent) {
                        for path in transitive {
                            if path != key && !merged.contains(path) {
                                merged.push(path.clone());
                            }
                        }
                    }
                }

                if merged.len() != direct.len() {
                    dependents.insert(key.clone(), merged);
                    changed = true;
                }
            }

            if !changed {
                break;
            }
        }

        dependents
    }

    /// Executes the resolved stack under the configured parallelism, then
    /// sorts the report, emits the summary, and writes the tabular artifact
    /// if a destination is configured. The execution error, if any, is
    /// returned after the report is emitted.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let run_token = cancel.child_token();

        let reporter = self
            .options
            .metrics_interval()
            .map(|interval| {
                spawn_metrics_reporter(self.telemetry.clone(), run_token.clone(), interval)
            });

        let result = scheduler::run(ExecParams {
            graph: self.graph(),
            options: self.options.clone(),
            parser: self.parser.clone(),
            backend: self.backend.clone(),
            report: self.report.clone(),
            telemetry: self.telemetry.clone(),
            cancel,
            output: self.output.clone(),
        })
        .await;

        run_token.cancel();
        if let Some(handle) = reporter {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "metrics reporter task panicked");
            }
        }

        self.report.sort_runs();
        self.emit_report().await;

        result
    }

    async fn emit_report(&self) {
        let mut rendered = Vec::new();
        if let Err(err) = self.report.write_summary(&mut rendered) {
            tracing::warn!(error = %err, "failed to render run summary");
        } else {
            self.output.write_stderr(&rendered).await;
        }

        if let Some(path) = self.options.report_path() {
            if let Err(err) = self.report.write_to_file(path) {
                tracing::error!(
                    path = %path.display(),
                    error = %err,
                    "failed to write report file"
                );
            }
        }
    }
}

impl fmt::Display for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Stack at {}:", self.options.working_dir().display())?;
        for unit in self.units.iter() {
            writeln!(f, "  => {unit}")?;
        }
        Ok(())
    }
}
