//! Cross-linking and filter passes applied to a resolved unit set, in order:
//! crosslink, include dirs, included-by-others, exclude blocks, read-by
//! flags, exclude dirs.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::anyhow;

use crate::error::{Error, Result};
use crate::runtime::options::RunOptions;
use crate::stack::paths;
use crate::unit::{Exclusion, UnitSet};

/// Replaces declared dependency strings with validated references to members
/// of the set. A dependency that was explicitly targeted but cannot be found
/// is fatal; unresolved paths outside the set (skipped externals) are dropped.
pub(crate) fn crosslink(
    units: &mut UnitSet,
    target_config_paths: &[PathBuf],
    options: &RunOptions,
) -> Result<()> {
    let members: HashSet<PathBuf> = units.paths().into_iter().collect();
    let mut resolved: Vec<(PathBuf, Vec<PathBuf>)> = Vec::with_capacity(units.len());

    for unit in units.iter() {
        let mut dependencies = Vec::new();

        for declared in &unit.config.dependencies {
            let dependency_path =
                paths::canonical_path(declared, &unit.path, options.resolve_symlinks())
                    .map_err(|err| {
                        Error::processing(unit.path.clone(), "crosslink dependencies", err)
                    })?;

            if members.contains(&dependency_path) {
                dependencies.push(dependency_path);
            } else if target_config_paths
                .contains(&options.default_config_path(&dependency_path))
            {
                return Err(Error::processing(
                    unit.path.clone(),
                    "crosslink dependencies",
                    anyhow!(
                        "dependency {} could not be resolved",
                        dependency_path.display()
                    ),
                ));
            }
        }

        resolved.push((unit.path.clone(), dependencies));
    }

    for (path, dependencies) in resolved {
        if let Some(unit) = units.get_mut(&path) {
            unit.dependencies = dependencies;
        }
    }

    Ok(())
}

/// When include dirs are configured, only units under them stay eligible;
/// everything else is excluded pending the included-by pass.
pub(crate) fn flag_included_dirs(units: &mut UnitSet, include_dirs: &[PathBuf]) {
    if include_dirs.is_empty() {
        return;
    }

    for unit in units.iter_mut() {
        if paths::is_under_any(&unit.path, include_dirs) {
            unit.clear_exclusion();
        } else if !unit.excluded {
            unit.mark_excluded(Exclusion::Dir);
        }
    }
}

/// Re-admits units whose config files are pulled in via include
/// relationships from a unit that is itself eligible. Include paths come
/// from the parser and are expected canonical.
pub(crate) fn flag_units_that_are_included(units: &mut UnitSet) {
    let included_paths: HashSet<PathBuf> = units
        .iter()
        .filter(|unit| !unit.excluded)
        .flat_map(|unit| unit.config.includes.iter().cloned())
        .collect();

    if included_paths.is_empty() {
        return;
    }

    for unit in units.iter_mut() {
        if included_paths.contains(&unit.config_path) {
            unit.included_by_other = true;
            unit.clear_exclusion();
        }
    }
}

/// Applies exclude blocks declared in unit configs for the current command.
pub(crate) fn flag_excluded_units(units: &mut UnitSet, command: &str) {
    for unit in units.iter_mut() {
        let block = unit
            .config
            .exclude
            .as_ref()
            .filter(|exclude| exclude.applies_to(command))
            .map(|exclude| exclude.name.clone());

        if let Some(name) = block {
            tracing::debug!(
                unit = %unit.path.display(),
                block = %name,
                "unit excluded by exclude block"
            );
            unit.mark_excluded(Exclusion::Block { name });
        }
    }
}

/// Marks units whose files are read by another unit, so they are kept in the
/// queue even when not directly targeted.
pub(crate) fn flag_units_that_read(units: &mut UnitSet) {
    let reads: Vec<(PathBuf, PathBuf)> = units
        .iter()
        .flat_map(|unit| {
            unit.config
                .read_files
                .iter()
                .map(|file| (unit.path.clone(), file.clone()))
        })
        .collect();

    for unit in units.iter_mut() {
        let read_by_other = reads
            .iter()
            .any(|(reader, file)| reader != &unit.path && file.starts_with(&unit.path));
        if read_by_other {
            unit.read_by_other = true;
        }
    }
}

/// Final pass applying exclude dirs; applies unconditionally, even to units
/// kept by earlier passes.
pub(crate) fn flag_excluded_dirs(units: &mut UnitSet, exclude_dirs: &[PathBuf]) {
    for unit in units.iter_mut() {
        if paths::is_under_any(&unit.path, exclude_dirs) {
            unit.mark_excluded(Exclusion::Dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{ExcludeSpec, Unit, UnitConfig};
    use std::path::Path;

    fn options() -> RunOptions {
        RunOptions::builder()
            .working_dir("/stacks")
            .command("apply")
            .build()
            .unwrap()
    }

    fn unit_with_config(path: &str, config: UnitConfig) -> Unit {
        let options = options();
        let config_path = PathBuf::from(path).join("unit.hcl");
        Unit::new(
            PathBuf::from(path),
            config_path.clone(),
            config,
            options.unit_options(&config_path),
        )
    }

    fn unit(path: &str, deps: &[&str]) -> Unit {
        unit_with_config(
            path,
            UnitConfig {
                dependencies: deps.iter().map(PathBuf::from).collect(),
                ..UnitConfig::default()
            },
        )
    }

    #[test]
    fn crosslink_resolves_relative_dependencies() {
        let mut units = UnitSet::new();
        units.insert(unit("/stacks/app", &["../db"]));
        units.insert(unit("/stacks/db", &[]));

        crosslink(&mut units, &[], &options()).unwrap();

        let app = units.get(Path::new("/stacks/app")).unwrap();
        assert_eq!(app.dependencies, vec![PathBuf::from("/stacks/db")]);
    }

    #[test]
    fn crosslink_drops_untracked_dependencies() {
        let mut units = UnitSet::new();
        units.insert(unit("/stacks/app", &["/external/vpc"]));

        crosslink(&mut units, &[], &options()).unwrap();

        let app = units.get(Path::new("/stacks/app")).unwrap();
        assert!(app.dependencies.is_empty());
    }

    #[test]
    fn crosslink_fails_for_missing_targeted_dependency() {
        let mut units = UnitSet::new();
        units.insert(unit("/stacks/app", &["../db"]));

        let targets = vec![PathBuf::from("/stacks/db/unit.hcl")];
        let err = crosslink(&mut units, &targets, &options()).unwrap_err();
        assert!(matches!(err, Error::ProcessingUnit { .. }));
    }

    #[test]
    fn include_dirs_exclude_everything_else() {
        let mut units = UnitSet::new();
        units.insert(unit("/stacks/keep/db", &[]));
        units.insert(unit("/stacks/drop/app", &[]));

        flag_included_dirs(&mut units, &[PathBuf::from("/stacks/keep")]);

        assert!(!units.get(Path::new("/stacks/keep/db")).unwrap().excluded);
        assert!(units.get(Path::new("/stacks/drop/app")).unwrap().excluded);
    }

    #[test]
    fn included_by_other_units_are_readmitted() {
        let mut units = UnitSet::new();
        units.insert(unit_with_config(
            "/stacks/keep/db",
            UnitConfig {
                includes: vec![PathBuf::from("/stacks/drop/shared/unit.hcl")],
                ..UnitConfig::default()
            },
        ));
        units.insert(unit("/stacks/drop/shared", &[]));

        flag_included_dirs(&mut units, &[PathBuf::from("/stacks/keep")]);
        flag_units_that_are_included(&mut units);

        let shared = units.get(Path::new("/stacks/drop/shared")).unwrap();
        assert!(shared.included_by_other);
        assert!(!shared.excluded);
    }

    #[test]
    fn exclude_blocks_apply_per_command() {
        let mut units = UnitSet::new();
        units.insert(unit_with_config(
            "/stacks/a",
            UnitConfig {
                exclude: Some(ExcludeSpec {
                    name: "skip-apply".into(),
                    enabled: true,
                    actions: vec!["apply".into()],
                }),
                ..UnitConfig::default()
            },
        ));

        flag_excluded_units(&mut units, "destroy");
        assert!(!units.get(Path::new("/stacks/a")).unwrap().excluded);

        flag_excluded_units(&mut units, "apply");
        let excluded = units.get(Path::new("/stacks/a")).unwrap();
        assert!(excluded.excluded);
        assert_eq!(
            excluded.exclusion,
            Some(Exclusion::Block {
                name: "skip-apply".into()
            })
        );
    }

    #[test]
    fn read_files_flag_the_owning_unit() {
        let mut units = UnitSet::new();
        units.insert(unit_with_config(
            "/stacks/reader",
            UnitConfig {
                read_files: vec![PathBuf::from("/stacks/source/data.json")],
                ..UnitConfig::default()
            },
        ));
        units.insert(unit("/stacks/source", &[]));

        flag_units_that_read(&mut units);

        assert!(units.get(Path::new("/stacks/source")).unwrap().read_by_other);
        assert!(
            !units.get(Path::new("/stacks/reader")).unwrap().read_by_other,
            "reading your own files does not count"
        );
    }

    #[test]
    fn exclude_dirs_apply_last_and_unconditionally() {
        let mut units = UnitSet::new();
        let mut read = unit("/stacks/shared", &[]);
        read.read_by_other = true;
        units.insert(read);

        flag_excluded_dirs(&mut units, &[PathBuf::from("/stacks/shared")]);

        let excluded = units.get(Path::new("/stacks/shared")).unwrap();
        assert!(excluded.excluded);
        assert_eq!(excluded.exclusion, Some(Exclusion::Dir));
    }
}
