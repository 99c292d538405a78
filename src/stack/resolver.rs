//! Unit discovery and dependency resolution.
//!
//! Turns a list of configuration paths into a validated unit set: each config
//! is partially parsed, internal dependencies are resolved recursively with
//! per-invocation memoization, external dependencies go through a separate
//! confirmation pass, and filter passes plus cycle detection finish the set.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::anyhow;

use crate::error::{Error, Result};
use crate::runtime::hooks::{ConfigParser, CredentialSource, ExternalConfirmation};
use crate::runtime::options::RunOptions;
use crate::stack::{cycles, filters, paths};
use crate::unit::{Exclusion, Unit, UnitSet};

/// Memoization key for dependency resolution: unit path, working directory,
/// skip-external flag, and command. The cache lives for one invocation only.
type MemoKey = (PathBuf, PathBuf, bool, String);

pub(crate) struct Resolver<'a> {
    pub(crate) options: &'a RunOptions,
    parser: &'a dyn ConfigParser,
    credentials: &'a dyn CredentialSource,
    pub(crate) confirm: &'a dyn ExternalConfirmation,
    /// Include paths already processed by the child config the run started
    /// from, if any.
    child_includes: &'a [PathBuf],
    pub(crate) working_dir: PathBuf,
    exclude_dirs: Vec<PathBuf>,
    include_dirs: Vec<PathBuf>,
    memo: HashMap<MemoKey, UnitSet>,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(
        options: &'a RunOptions,
        parser: &'a dyn ConfigParser,
        credentials: &'a dyn CredentialSource,
        confirm: &'a dyn ExternalConfirmation,
        child_includes: &'a [PathBuf],
    ) -> Result<Self> {
        let resolve_symlinks = options.resolve_symlinks();
        let working_dir = canonical_or_processing(
            options.working_dir(),
            Path::new("."),
            resolve_symlinks,
            "working directory",
        )?;
        let exclude_dirs =
            canonical_dirs(options.exclude_dirs(), &working_dir, resolve_symlinks)?;
        let include_dirs =
            canonical_dirs(options.include_dirs(), &working_dir, resolve_symlinks)?;

        Ok(Self {
            options,
            parser,
            credentials,
            confirm,
            child_includes,
            working_dir,
            exclude_dirs,
            include_dirs,
            memo: HashMap::new(),
        })
    }

    /// Resolves the full unit set for the given configuration paths.
    pub(crate) fn resolve(&mut self, config_paths: &[PathBuf]) -> Result<UnitSet> {
        if config_paths.is_empty() {
            return Err(Error::NoUnitsFound);
        }

        let canonical = paths::canonical_paths(
            config_paths,
            &self.working_dir,
            self.options.resolve_symlinks(),
        )
        .map_err(|err| Error::processing(self.working_dir.clone(), "configured paths", err))?;

        let found = format!("config file found under {}", self.working_dir.display());

        let mut units = {
            let span = tracing::info_span!(
                "resolve_units",
                working_dir = %self.working_dir.display()
            );
            let _guard = span.enter();
            self.resolve_units(&canonical, &found)?
        };

        let external = {
            let span = tracing::info_span!(
                "resolve_external_dependencies",
                working_dir = %self.working_dir.display()
            );
            let _guard = span.enter();
            self.resolve_external(&units, &UnitSet::new(), 0)?
        };
        units.merge(external);

        {
            let span = tracing::info_span!("crosslink_dependencies");
            let _guard = span.enter();
            filters::crosslink(&mut units, &canonical, self.options)?;
        }

        {
            let span = tracing::info_span!("filter_units");
            let _guard = span.enter();
            filters::flag_included_dirs(&mut units, &self.include_dirs);
            filters::flag_units_that_are_included(&mut units);
            filters::flag_excluded_units(&mut units, self.options.command());
            filters::flag_units_that_read(&mut units);
            filters::flag_excluded_dirs(&mut units, &self.exclude_dirs);
        }

        {
            let span = tracing::info_span!("check_for_cycles");
            let _guard = span.enter();
            cycles::check_for_cycles(&units)?;
        }

        Ok(units)
    }

    /// Resolves each config path into a unit and recursively pulls in its
    /// internal dependencies. First-seen units win; later duplicates are
    /// skipped.
    pub(crate) fn resolve_units(
        &mut self,
        config_paths: &[PathBuf],
        how_found: &str,
    ) -> Result<UnitSet> {
        let mut units = UnitSet::new();

        for config_path in config_paths {
            if !config_path.exists() {
                return Err(Error::processing(
                    config_path.clone(),
                    how_found,
                    anyhow!("config file does not exist"),
                ));
            }

            let Some(unit) = self.resolve_unit(config_path, &units, how_found)? else {
                continue;
            };

            let unit_for_deps = unit.clone();
            units.insert(unit);

            let dependencies = self.resolve_dependencies(&unit_for_deps, &units, true)?;
            units.merge(dependencies);
        }

        Ok(units)
    }

    /// Resolves one config path into a unit. Returns `None` when the unit is
    /// already present, or when it declares no source and its directory holds
    /// no backend source files.
    fn resolve_unit(
        &mut self,
        config_path: &Path,
        units: &UnitSet,
        how_found: &str,
    ) -> Result<Option<Unit>> {
        let parent = config_path.parent().unwrap_or(Path::new("."));
        let unit_dir = canonical_or_processing(
            parent,
            &self.working_dir,
            self.options.resolve_symlinks(),
            how_found,
        )?;

        if units.contains(&unit_dir) {
            return Ok(None);
        }

        let mut unit_options = self.options.unit_options(config_path);

        // When the run started from a child config that includes this path,
        // bind the include so parent-relative functions resolve correctly.
        if self.child_includes.iter().any(|p| p == config_path) {
            unit_options.include_parent = Some(config_path.to_path_buf());
        }

        if paths::is_under_any(&unit_dir, &self.exclude_dirs) {
            let unit = Unit::new(
                unit_dir,
                config_path.to_path_buf(),
                Default::default(),
                unit_options,
            )
            .excluded_by(Exclusion::Dir);
            return Ok(Some(unit));
        }

        // Credentials must be in place before parsing; the config may contain
        // interpolations that need them.
        self.credentials
            .acquire(&unit_options)
            .map_err(|err| Error::processing(config_path, how_found, err))?;

        let config = self
            .parser
            .partial_parse(config_path)
            .map_err(|err| Error::processing(config_path, how_found, err))?;

        if !config.has_source() && !has_backend_files(&unit_dir, self.options) {
            tracing::debug!(
                unit = %unit_dir.display(),
                "unit has no source and no backend files; skipping"
            );
            return Ok(None);
        }

        Ok(Some(Unit::new(
            unit_dir,
            config_path.to_path_buf(),
            config,
            unit_options,
        )))
    }

    /// Resolves the dependency paths declared by `unit` into units. With
    /// `skip_external`, dependencies outside the working directory are left
    /// for the external pass.
    pub(crate) fn resolve_dependencies(
        &mut self,
        unit: &Unit,
        units: &UnitSet,
        skip_external: bool,
    ) -> Result<UnitSet> {
        if unit.config.dependencies.is_empty() {
            return Ok(UnitSet::new());
        }

        let key: MemoKey = (
            unit.path.clone(),
            self.working_dir.clone(),
            skip_external,
            self.options.command().to_owned(),
        );
        if let Some(cached) = self.memo.get(&key) {
            return Ok(cached.clone());
        }

        let mut dependency_config_paths = Vec::new();

        for dependency in &unit.config.dependencies {
            let dependency_path = paths::canonical_path(
                dependency,
                &unit.path,
                self.options.resolve_symlinks(),
            )
            .map_err(|err| Error::processing(unit.path.clone(), "dependency path", err))?;

            if skip_external && !paths::has_path_prefix(&dependency_path, &self.working_dir) {
                continue;
            }

            if units.contains(&dependency_path) {
                continue;
            }

            dependency_config_paths.push(self.options.default_config_path(&dependency_path));
        }

        let how_found = format!("dependency of unit at '{}'", unit.path.display());
        let resolved = self.resolve_units(&dependency_config_paths, &how_found)?;

        self.memo.insert(key, resolved.clone());
        Ok(resolved)
    }
}

fn canonical_or_processing(
    path: &Path,
    base: &Path,
    resolve_symlinks: bool,
    how_found: &str,
) -> Result<PathBuf> {
    paths::canonical_path(path, base, resolve_symlinks)
        .map_err(|err| Error::processing(path.to_path_buf(), how_found, err))
}

fn canonical_dirs(
    dirs: &[PathBuf],
    working_dir: &Path,
    resolve_symlinks: bool,
) -> Result<Vec<PathBuf>> {
    paths::canonical_paths(dirs, working_dir, resolve_symlinks)
        .map_err(|err| Error::processing(working_dir.to_path_buf(), "filter directories", err))
}

/// Whether the directory holds any backend source files (by extension).
fn has_backend_files(unit_dir: &Path, options: &RunOptions) -> bool {
    let Ok(entries) = std::fs::read_dir(unit_dir) else {
        return false;
    };

    let extension = std::ffi::OsStr::new(options.backend_file_extension());
    entries
        .filter_map(|entry| entry.ok())
        .any(|entry| entry.path().extension() == Some(extension))
}
