//! Cycle detection over resolved dependency references.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::unit::UnitSet;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Depth-first traversal over the resolved references; any cycle is fatal
/// and reported with the full chain.
pub(crate) fn check_for_cycles(units: &UnitSet) -> Result<()> {
    let mut marks: HashMap<PathBuf, Mark> = units
        .paths()
        .into_iter()
        .map(|path| (path, Mark::Unvisited))
        .collect();
    let mut trail: Vec<PathBuf> = Vec::new();

    for path in units.paths() {
        visit(&path, units, &mut marks, &mut trail)?;
    }

    Ok(())
}

fn visit(
    path: &Path,
    units: &UnitSet,
    marks: &mut HashMap<PathBuf, Mark>,
    trail: &mut Vec<PathBuf>,
) -> Result<()> {
    match marks.get(path).copied() {
        Some(Mark::Done) | None => return Ok(()),
        Some(Mark::InProgress) => {
            let start = trail
                .iter()
                .position(|entry| entry == path)
                .unwrap_or_default();
            let mut chain: Vec<PathBuf> = trail[start..].to_vec();
            chain.push(path.to_path_buf());
            return Err(Error::DependencyCycle { chain });
        }
        Some(Mark::Unvisited) => {}
    }

    marks.insert(path.to_path_buf(), Mark::InProgress);
    trail.push(path.to_path_buf());

    if let Some(unit) = units.get(path) {
        for dependency in &unit.dependencies {
            visit(dependency, units, marks, trail)?;
        }
    }

    trail.pop();
    marks.insert(path.to_path_buf(), Mark::Done);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::options::RunOptions;
    use crate::unit::{Unit, UnitConfig};

    fn unit(path: &str, deps: &[&str]) -> Unit {
        let options = RunOptions::builder()
            .working_dir("/stacks")
            .command("apply")
            .build()
            .unwrap();
        let config_path = PathBuf::from(path).join("unit.hcl");
        let mut unit = Unit::new(
            PathBuf::from(path),
            config_path.clone(),
            UnitConfig::default(),
            options.unit_options(&config_path),
        );
        unit.dependencies = deps.iter().map(PathBuf::from).collect();
        unit
    }

    #[test]
    fn acyclic_graph_passes() {
        let mut units = UnitSet::new();
        units.insert(unit("/stacks/a", &[]));
        units.insert(unit("/stacks/b", &["/stacks/a"]));
        units.insert(unit("/stacks/c", &["/stacks/a", "/stacks/b"]));

        check_for_cycles(&units).expect("no cycle expected");
    }

    #[test]
    fn two_node_cycle_reports_chain() {
        let mut units = UnitSet::new();
        units.insert(unit("/stacks/a", &["/stacks/b"]));
        units.insert(unit("/stacks/b", &["/stacks/a"]));

        let err = check_for_cycles(&units).unwrap_err();
        match err {
            Error::DependencyCycle { chain } => {
                assert_eq!(chain.first(), chain.last());
                assert_eq!(chain.len(), 3);
            }
            other => panic!("expected DependencyCycle, got {other}"),
        }
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let mut units = UnitSet::new();
        units.insert(unit("/stacks/a", &["/stacks/a"]));

        let err = check_for_cycles(&units).unwrap_err();
        assert!(matches!(err, Error::DependencyCycle { .. }));
    }

    #[test]
    fn longer_cycle_is_found_through_clean_prefix() {
        let mut units = UnitSet::new();
        units.insert(unit("/stacks/entry", &["/stacks/a"]));
        units.insert(unit("/stacks/a", &["/stacks/b"]));
        units.insert(unit("/stacks/b", &["/stacks/c"]));
        units.insert(unit("/stacks/c", &["/stacks/a"]));

        let err = check_for_cycles(&units).unwrap_err();
        match err {
            Error::DependencyCycle { chain } => {
                assert_eq!(chain.first().map(|p| p.display().to_string()).unwrap(), "/stacks/a");
                assert_eq!(chain.len(), 4);
            }
            other => panic!("expected DependencyCycle, got {other}"),
        }
    }
}
