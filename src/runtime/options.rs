//! Global run options and the per-unit clones handed to each unit.
//!
//! All instances must be constructed via [`RunOptions::builder`] so invariants
//! are validated before any consumer observes the values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Command that flips graph traversal to teardown order.
pub const COMMAND_DESTROY: &str = "destroy";

const DEFAULT_PARALLELISM: usize = 4;
const DEFAULT_CONFIG_FILENAME: &str = "unit.hcl";
const DEFAULT_BACKEND_FILE_EXTENSION: &str = "tf";
const DEFAULT_CACHE_DIR: &str = ".runstack-cache";

/// Global options for one orchestrated run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    working_dir: PathBuf,
    command: String,
    backend_args: Vec<String>,
    parallelism: usize,
    ignore_dependency_order: bool,
    ignore_external_dependencies: bool,
    exclude_dirs: Vec<PathBuf>,
    include_dirs: Vec<PathBuf>,
    source: Option<String>,
    download_dir: PathBuf,
    resolve_symlinks: bool,
    config_filename: String,
    backend_file_extension: String,
    report_path: Option<PathBuf>,
    disable_color: bool,
    metrics_interval: Option<Duration>,
}

impl RunOptions {
    /// Returns a builder to incrementally construct and validate options.
    pub fn builder() -> RunOptionsBuilder {
        RunOptionsBuilder::default()
    }

    /// Working directory the run was launched from (canonical form is the
    /// resolver's concern).
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Backend command for this run (`apply`, `destroy`, ...).
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Extra arguments forwarded to every backend invocation.
    pub fn backend_args(&self) -> &[String] {
        &self.backend_args
    }

    /// Maximum number of units running concurrently.
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Treat every unit as immediately runnable.
    pub fn ignore_dependency_order(&self) -> bool {
        self.ignore_dependency_order
    }

    /// Include external dependencies without confirmation.
    pub fn ignore_external_dependencies(&self) -> bool {
        self.ignore_external_dependencies
    }

    pub fn exclude_dirs(&self) -> &[PathBuf] {
        &self.exclude_dirs
    }

    pub fn include_dirs(&self) -> &[PathBuf] {
        &self.include_dirs
    }

    /// Source override applied to every unit.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Global download directory.
    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Resolve symlinks during path canonicalization.
    pub fn resolve_symlinks(&self) -> bool {
        self.resolve_symlinks
    }

    /// File name of a unit's configuration within its directory.
    pub fn config_filename(&self) -> &str {
        &self.config_filename
    }

    /// Extension of backend source files used to detect bare units.
    pub fn backend_file_extension(&self) -> &str {
        &self.backend_file_extension
    }

    /// Destination for the tabular report artifact, if any.
    pub fn report_path(&self) -> Option<&Path> {
        self.report_path.as_deref()
    }

    pub fn disable_color(&self) -> bool {
        self.disable_color
    }

    /// Interval for the periodic telemetry reporter; disabled when `None`.
    pub fn metrics_interval(&self) -> Option<Duration> {
        self.metrics_interval
    }

    /// Whether this run tears the stack down (reverse traversal).
    pub fn is_destroy(&self) -> bool {
        self.command == COMMAND_DESTROY
    }

    /// Default config file path for a unit directory.
    pub fn default_config_path(&self, unit_dir: &Path) -> PathBuf {
        unit_dir.join(&self.config_filename)
    }

    fn is_default_download_dir(&self) -> bool {
        self.download_dir == default_download_dir(&self.working_dir)
    }

    /// Clones the globals into per-unit options with the config path
    /// overridden. When the global download dir is the default, the unit gets
    /// its own default beside its config; an explicit global choice is kept.
    pub fn unit_options(&self, config_path: &Path) -> UnitOptions {
        let unit_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.working_dir.clone());

        let download_dir = if self.is_default_download_dir() {
            default_download_dir(&unit_dir)
        } else {
            self.download_dir.clone()
        };

        UnitOptions {
            config_path: config_path.to_path_buf(),
            original_config_path: config_path.to_path_buf(),
            unit_dir,
            download_dir,
            source: self.source.clone(),
            backend_args: self.backend_args.clone(),
            include_parent: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.working_dir.as_os_str().is_empty() {
            bail!("working_dir cannot be empty");
        }

        if self.command.trim().is_empty() {
            bail!("command cannot be empty");
        }

        if self.parallelism == 0 {
            bail!("parallelism must be greater than 0");
        }

        if self.config_filename.trim().is_empty() {
            bail!("config_filename cannot be empty");
        }

        if self.backend_file_extension.trim().is_empty() {
            bail!("backend_file_extension cannot be empty");
        }

        if let Some(interval) = self.metrics_interval {
            if interval.is_zero() {
                bail!("metrics_interval must be greater than 0");
            }
        }

        Ok(())
    }
}

/// Per-unit effective options: a clone of the globals with unit-local paths.
/// Immutable after construction; never shared mutably across nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOptions {
    /// Config path the unit is executed against.
    pub config_path: PathBuf,
    /// The config path this unit was originally discovered at.
    pub original_config_path: PathBuf,
    /// Directory the unit lives in.
    pub unit_dir: PathBuf,
    /// Download/scratch directory for this unit.
    pub download_dir: PathBuf,
    /// Source override, if any.
    pub source: Option<String>,
    /// Arguments forwarded to the backend invocation.
    pub backend_args: Vec<String>,
    /// Parent config this unit is included from, when resolved as a processed
    /// include of the child config.
    pub include_parent: Option<PathBuf>,
}

fn default_download_dir(dir: &Path) -> PathBuf {
    dir.join(DEFAULT_CACHE_DIR)
}

/// Builder for [`RunOptions`].
#[derive(Debug, Default, Clone)]
pub struct RunOptionsBuilder {
    working_dir: Option<PathBuf>,
    command: Option<String>,
    backend_args: Vec<String>,
    parallelism: Option<usize>,
    ignore_dependency_order: bool,
    ignore_external_dependencies: bool,
    exclude_dirs: Vec<PathBuf>,
    include_dirs: Vec<PathBuf>,
    source: Option<String>,
    download_dir: Option<PathBuf>,
    resolve_symlinks: bool,
    config_filename: Option<String>,
    backend_file_extension: Option<String>,
    report_path: Option<PathBuf>,
    disable_color: bool,
    metrics_interval: Option<Duration>,
}

impl RunOptionsBuilder {
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn backend_args(mut self, args: Vec<String>) -> Self {
        self.backend_args = args;
        self
    }

    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = Some(parallelism);
        self
    }

    pub fn ignore_dependency_order(mut self, ignore: bool) -> Self {
        self.ignore_dependency_order = ignore;
        self
    }

    pub fn ignore_external_dependencies(mut self, ignore: bool) -> Self {
        self.ignore_external_dependencies = ignore;
        self
    }

    pub fn exclude_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.exclude_dirs.push(dir.into());
        self
    }

    pub fn include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_dirs.push(dir.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }

    pub fn resolve_symlinks(mut self, resolve: bool) -> Self {
        self.resolve_symlinks = resolve;
        self
    }

    pub fn config_filename(mut self, name: impl Into<String>) -> Self {
        self.config_filename = Some(name.into());
        self
    }

    pub fn backend_file_extension(mut self, ext: impl Into<String>) -> Self {
        self.backend_file_extension = Some(ext.into());
        self
    }

    pub fn report_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_path = Some(path.into());
        self
    }

    pub fn disable_color(mut self, disable: bool) -> Self {
        self.disable_color = disable;
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<RunOptions> {
        let working_dir = self.working_dir.context("working_dir is required")?;
        let download_dir = self
            .download_dir
            .unwrap_or_else(|| default_download_dir(&working_dir));

        let options = RunOptions {
            working_dir,
            command: self.command.context("command is required")?,
            backend_args: self.backend_args,
            parallelism: self.parallelism.unwrap_or(DEFAULT_PARALLELISM),
            ignore_dependency_order: self.ignore_dependency_order,
            ignore_external_dependencies: self.ignore_external_dependencies,
            exclude_dirs: self.exclude_dirs,
            include_dirs: self.include_dirs,
            source: self.source,
            download_dir,
            resolve_symlinks: self.resolve_symlinks,
            config_filename: self
                .config_filename
                .unwrap_or_else(|| DEFAULT_CONFIG_FILENAME.to_owned()),
            backend_file_extension: self
                .backend_file_extension
                .unwrap_or_else(|| DEFAULT_BACKEND_FILE_EXTENSION.to_owned()),
            report_path: self.report_path,
            disable_color: self.disable_color,
            metrics_interval: self.metrics_interval,
        };

        options.validate()?;
        Ok(options)
    }
}
