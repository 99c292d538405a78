//! Unit model: the immutable-after-resolution descriptor of one configuration
//! directory, the partially parsed configuration snapshot, and the path-keyed
//! set the resolver produces.

use std::collections::{btree_map, BTreeMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::runtime::options::UnitOptions;

/// Partially parsed configuration snapshot for one unit.
///
/// Only the blocks the resolver needs are decoded here; the full configuration
/// is parsed again right before the backend tool is invoked.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitConfig {
    /// Source declared for the backend tool, if any.
    pub source: Option<String>,
    /// Dependency paths as declared, relative to the unit directory.
    pub dependencies: Vec<PathBuf>,
    /// Error-handling policies consulted after a failed backend invocation.
    pub error_policies: Vec<ErrorPolicy>,
    /// Exclude block, if declared.
    pub exclude: Option<ExcludeSpec>,
    /// Files this unit reads from other units via read-file functions.
    pub read_files: Vec<PathBuf>,
    /// Config paths pulled in by this unit via include relationships.
    pub includes: Vec<PathBuf>,
}

impl UnitConfig {
    /// True when the config declares a non-empty source.
    pub fn has_source(&self) -> bool {
        self.source.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Error-handling policy declared in a unit's config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ErrorPolicy {
    /// Re-invoke the backend when its output matches `pattern`.
    Retry {
        name: String,
        pattern: String,
        max_attempts: usize,
        backoff: Duration,
    },
    /// Treat a matching failure as success.
    Ignore { name: String, pattern: String },
}

impl ErrorPolicy {
    pub fn name(&self) -> &str {
        match self {
            Self::Retry { name, .. } | Self::Ignore { name, .. } => name,
        }
    }
}

/// Exclude block declared in a unit's config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExcludeSpec {
    pub name: String,
    /// Whether the block is active.
    pub enabled: bool,
    /// Commands the block applies to; empty applies to every command.
    pub actions: Vec<String>,
}

impl ExcludeSpec {
    /// Whether this block excludes the unit for the given command.
    pub fn applies_to(&self, command: &str) -> bool {
        self.enabled && (self.actions.is_empty() || self.actions.iter().any(|a| a == command))
    }
}

/// Where an exclusion came from; drives the reason/cause recorded on the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exclusion {
    /// Matched an `exclude_dirs` entry (or fell outside `include_dirs`).
    Dir,
    /// Matched an exclude block in the unit's own config.
    Block { name: String },
}

/// One configuration directory processed as an atomic deployment target.
///
/// Identity is the canonical absolute directory path. Flags are flipped during
/// resolution only; the unit is frozen once handed to the run graph.
#[derive(Debug, Clone)]
pub struct Unit {
    /// Canonical absolute path of the unit directory.
    pub path: PathBuf,
    /// Canonical absolute path of the unit's config file.
    pub config_path: PathBuf,
    /// Partially parsed configuration snapshot.
    pub config: UnitConfig,
    /// Per-unit effective options, cloned from the globals.
    pub options: UnitOptions,
    /// Resolved dependency unit paths (canonical, members of the same set).
    pub dependencies: Vec<PathBuf>,
    /// Filtered out by configuration; recorded but never executed.
    pub excluded: bool,
    pub exclusion: Option<Exclusion>,
    /// Pulled in via an include relationship from another included unit.
    pub included_by_other: bool,
    /// Another unit reads this unit's files.
    pub read_by_other: bool,
    /// External dependency the operator declined to run; treated as an
    /// immediate success for scheduling.
    pub assume_already_applied: bool,
}

impl Unit {
    pub(crate) fn new(
        path: PathBuf,
        config_path: PathBuf,
        config: UnitConfig,
        options: UnitOptions,
    ) -> Self {
        Self {
            path,
            config_path,
            config,
            options,
            dependencies: Vec::new(),
            excluded: false,
            exclusion: None,
            included_by_other: false,
            read_by_other: false,
            assume_already_applied: false,
        }
    }

    pub(crate) fn excluded_by(mut self, exclusion: Exclusion) -> Self {
        self.excluded = true;
        self.exclusion = Some(exclusion);
        self
    }

    pub(crate) fn mark_excluded(&mut self, exclusion: Exclusion) {
        self.excluded = true;
        self.exclusion = Some(exclusion);
    }

    pub(crate) fn clear_exclusion(&mut self) {
        self.excluded = false;
        self.exclusion = None;
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dependencies: Vec<String> = self
            .dependencies
            .iter()
            .map(|path| path.display().to_string())
            .collect();
        write!(
            f,
            "Unit {} (excluded: {}, assume applied: {}, dependencies: [{}])",
            self.path.display(),
            self.excluded,
            self.assume_already_applied,
            dependencies.join(", ")
        )
    }
}

impl PartialEq for Unit {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for Unit {}

/// Path-keyed unit collection with first-seen-wins merge semantics and
/// deterministic (path-ordered) iteration.
#[derive(Debug, Clone, Default)]
pub struct UnitSet {
    units: BTreeMap<PathBuf, Unit>,
}

impl UnitSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a unit unless one with the same path is already present.
    /// Returns whether the unit was inserted.
    pub fn insert(&mut self, unit: Unit) -> bool {
        match self.units.entry(unit.path.clone()) {
            btree_map::Entry::Vacant(entry) => {
                entry.insert(unit);
                true
            }
            btree_map::Entry::Occupied(_) => false,
        }
    }

    /// Merges `other` into `self`; existing entries win.
    pub fn merge(&mut self, other: UnitSet) {
        for (_, unit) in other.units {
            self.insert(unit);
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.units.contains_key(path)
    }

    pub fn get(&self, path: &Path) -> Option<&Unit> {
        self.units.get(path)
    }

    pub(crate) fn get_mut(&mut self, path: &Path) -> Option<&mut Unit> {
        self.units.get_mut(path)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Unit paths in ascending order.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.units.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Unit> {
        self.units.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Unit> {
        self.units.values_mut()
    }
}

impl IntoIterator for UnitSet {
    type Item = Unit;
    type IntoIter = btree_map::IntoValues<PathBuf, Unit>;

    fn into_iter(self) -> Self::IntoIter {
        self.units.into_values()
    }
}

impl FromIterator<Unit> for UnitSet {
    fn from_iter<I: IntoIterator<Item = Unit>>(iter: I) -> Self {
        let mut set = Self::new();
        for unit in iter {
            set.insert(unit);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::options::RunOptions;

    fn unit(path: &str, source: Option<&str>) -> Unit {
        let options = RunOptions::builder()
            .working_dir("/stacks")
            .command("apply")
            .build()
            .expect("options should build");
        let config = UnitConfig {
            source: source.map(str::to_owned),
            ..UnitConfig::default()
        };
        let config_path = PathBuf::from(path).join("unit.hcl");
        Unit::new(
            PathBuf::from(path),
            config_path.clone(),
            config,
            options.unit_options(&config_path),
        )
    }

    #[test]
    fn insert_is_first_seen_wins() {
        let mut set = UnitSet::new();
        assert!(set.insert(unit("/stacks/a", Some("first"))));
        assert!(!set.insert(unit("/stacks/a", Some("second"))));

        let kept = set.get(Path::new("/stacks/a")).expect("unit should exist");
        assert_eq!(kept.config.source.as_deref(), Some("first"));
    }

    #[test]
    fn merge_keeps_existing_entries() {
        let mut left = UnitSet::new();
        left.insert(unit("/stacks/a", Some("left")));

        let mut right = UnitSet::new();
        right.insert(unit("/stacks/a", Some("right")));
        right.insert(unit("/stacks/b", None));

        left.merge(right);
        assert_eq!(left.len(), 2);
        assert_eq!(
            left.get(Path::new("/stacks/a"))
                .and_then(|u| u.config.source.as_deref()),
            Some("left")
        );
    }

    #[test]
    fn paths_are_sorted() {
        let mut set = UnitSet::new();
        set.insert(unit("/stacks/c", None));
        set.insert(unit("/stacks/a", None));
        set.insert(unit("/stacks/b", None));

        assert_eq!(
            set.paths(),
            vec![
                PathBuf::from("/stacks/a"),
                PathBuf::from("/stacks/b"),
                PathBuf::from("/stacks/c"),
            ]
        );
    }

    #[test]
    fn exclude_spec_honors_actions() {
        let spec = ExcludeSpec {
            name: "skip-prod".into(),
            enabled: true,
            actions: vec!["apply".into()],
        };
        assert!(spec.applies_to("apply"));
        assert!(!spec.applies_to("destroy"));

        let all = ExcludeSpec {
            name: "always".into(),
            enabled: true,
            actions: Vec::new(),
        };
        assert!(all.applies_to("destroy"));

        let disabled = ExcludeSpec {
            name: "off".into(),
            enabled: false,
            actions: Vec::new(),
        };
        assert!(!disabled.applies_to("apply"));
    }
}
