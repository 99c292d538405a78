//! Recursive resolution of external dependencies: units living outside the
//! working directory that the current run depends on.

use crate::error::{Error, Result, MAX_RESOLUTION_DEPTH};
use crate::stack::resolver::Resolver;
use crate::unit::UnitSet;

impl Resolver<'_> {
    /// Resolves the external dependencies of every unit in `units`, then
    /// recurses into the dependencies of those, guarding against runaway
    /// recursion with a fixed depth cap.
    ///
    /// Unless external dependencies are ignored wholesale, each newly found
    /// unit goes through the confirmation callback; a declined unit is marked
    /// assume-already-applied so it still anchors the graph without being
    /// executed.
    pub(crate) fn resolve_external(
        &mut self,
        units: &UnitSet,
        already_processed: &UnitSet,
        depth: usize,
    ) -> Result<UnitSet> {
        if depth > MAX_RESOLUTION_DEPTH {
            return Err(Error::InfiniteRecursion {
                depth: MAX_RESOLUTION_DEPTH,
            });
        }

        let mut skip = units.clone();
        skip.merge(already_processed.clone());

        let mut all_external = UnitSet::new();

        for path in units.paths() {
            let unit = units.get(&path).expect("path came from the set").clone();
            let candidates = self.resolve_dependencies(&unit, &skip, false)?;

            for candidate in candidates {
                if skip.contains(&candidate.path) || all_external.contains(&candidate.path) {
                    continue;
                }

                let mut external = candidate;
                let should_apply = !self.options.ignore_external_dependencies()
                    && self.confirm.confirm(&external);
                external.assume_already_applied = !should_apply;

                tracing::debug!(
                    unit = %external.path.display(),
                    assume_already_applied = external.assume_already_applied,
                    "resolved external dependency"
                );

                all_external.insert(external);
            }
        }

        if !all_external.is_empty() {
            let recursive = self.resolve_external(&all_external, units, depth + 1)?;
            all_external.merge(recursive);
        }

        Ok(all_external)
    }
}
