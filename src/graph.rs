//! Execution-time dependency graph: units wrapped in arena-allocated nodes
//! with index-list edges, supporting forward and reverse traversal and
//! topological grouping.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::unit::{Unit, UnitSet};

/// Cap on topological group depth so pathological graphs cannot loop forever.
pub const MAX_GRAPH_DEPTH: usize = 1000;

/// Which way dependency edges point during execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Dependencies run before their dependents (apply).
    Normal,
    /// Dependents run before their dependencies (destroy).
    Reverse,
}

/// Scheduling state of a node. A node transitions Waiting to Running exactly
/// once, and Running to Finished exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Waiting,
    Running,
    Finished,
}

/// Terminal outcome of a node; valid only once the node is Finished.
#[derive(Debug, Clone)]
pub enum NodeOutcome {
    Success,
    Failure(Arc<anyhow::Error>),
    /// Skipped at execution time; the cause names the failing ancestor or the
    /// cancellation that stopped the run.
    EarlyExit { cause: String },
}

impl NodeOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}

/// Execution wrapper around one unit.
#[derive(Debug)]
pub struct RunNode {
    unit: Arc<Unit>,
    /// Nodes this one waits for, in the active direction.
    deps: Vec<usize>,
    /// Nodes notified when this one finishes.
    dependents: Vec<usize>,
    pub(crate) status: NodeStatus,
    pub(crate) outcome: Option<NodeOutcome>,
    /// Count of unfinished dependencies; eligible to run at zero.
    pub(crate) outstanding: usize,
}

impl RunNode {
    pub fn unit(&self) -> &Arc<Unit> {
        &self.unit
    }

    pub fn deps(&self) -> &[usize] {
        &self.deps
    }

    pub fn dependents(&self) -> &[usize] {
        &self.dependents
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn outcome(&self) -> Option<&NodeOutcome> {
        self.outcome.as_ref()
    }
}

/// Arena of run nodes built from a resolved unit set.
#[derive(Debug)]
pub struct RunGraph {
    nodes: Vec<RunNode>,
    index: HashMap<PathBuf, usize>,
    direction: Direction,
}

impl RunGraph {
    /// Wraps every unit of the set in a node and wires index-list edges in
    /// the requested direction. Dependency paths missing from the set were
    /// rejected during crosslinking, so they are ignored here.
    pub fn build(units: &UnitSet, direction: Direction) -> Self {
        let mut nodes: Vec<RunNode> = Vec::with_capacity(units.len());
        let mut index = HashMap::with_capacity(units.len());

        for unit in units.iter() {
            index.insert(unit.path.clone(), nodes.len());
            nodes.push(RunNode {
                unit: Arc::new(unit.clone()),
                deps: Vec::new(),
                dependents: Vec::new(),
                status: NodeStatus::Waiting,
                outcome: None,
                outstanding: 0,
            });
        }

        for dependent_idx in 0..nodes.len() {
            let dep_paths = nodes[dependent_idx].unit.dependencies.clone();
            for dep_path in dep_paths {
                let Some(&dep_idx) = index.get(&dep_path) else {
                    continue;
                };

                match direction {
                    Direction::Normal => {
                        nodes[dependent_idx].deps.push(dep_idx);
                        nodes[dep_idx].dependents.push(dependent_idx);
                    }
                    Direction::Reverse => {
                        nodes[dep_idx].deps.push(dependent_idx);
                        nodes[dependent_idx].dependents.push(dep_idx);
                    }
                }
            }
        }

        for node in &mut nodes {
            node.outstanding = node.deps.len();
        }

        Self {
            nodes,
            index,
            direction,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, idx: usize) -> &RunNode {
        &self.nodes[idx]
    }

    pub(crate) fn node_mut(&mut self, idx: usize) -> &mut RunNode {
        &mut self.nodes[idx]
    }

    pub fn nodes(&self) -> &[RunNode] {
        &self.nodes
    }

    pub fn index_of(&self, path: &Path) -> Option<usize> {
        self.index.get(path).copied()
    }

    /// Node indices in ascending unit-path order.
    pub(crate) fn sorted_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.nodes.len()).collect();
        indices.sort_by(|&a, &b| self.nodes[a].unit.path.cmp(&self.nodes[b].unit.path));
        indices
    }

    /// Topological groups: group `i` holds the nodes whose longest dependency
    /// chain from a source is `i`, ties broken by ascending unit path.
    /// Excluded units are left out of the listing. Iteration stops at
    /// `max_depth`.
    pub fn groups(&self, max_depth: usize) -> Vec<Vec<Arc<Unit>>> {
        let mut grouped = vec![false; self.nodes.len()];
        let mut groups = Vec::new();
        let order = self.sorted_indices();

        for _ in 0..max_depth {
            if grouped.iter().all(|&done| done) {
                break;
            }

            let ready: Vec<usize> = order
                .iter()
                .copied()
                .filter(|&idx| {
                    !grouped[idx] && self.nodes[idx].deps.iter().all(|&dep| grouped[dep])
                })
                .collect();

            if ready.is_empty() {
                break;
            }

            let group: Vec<Arc<Unit>> = ready
                .iter()
                .filter(|&&idx| !self.nodes[idx].unit.excluded)
                .map(|&idx| self.nodes[idx].unit.clone())
                .collect();

            for idx in &ready {
                grouped[*idx] = true;
            }

            if !group.is_empty() {
                groups.push(group);
            }
        }

        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::options::RunOptions;
    use crate::unit::{Exclusion, UnitConfig};

    fn unit_set(edges: &[(&str, &[&str])]) -> UnitSet {
        let options = RunOptions::builder()
            .working_dir("/stacks")
            .command("apply")
            .build()
            .unwrap();

        let mut set = UnitSet::new();
        for (path, deps) in edges {
            let config_path = PathBuf::from(path).join("unit.hcl");
            let mut unit = Unit::new(
                PathBuf::from(path),
                config_path.clone(),
                UnitConfig::default(),
                options.unit_options(&config_path),
            );
            unit.dependencies = deps.iter().map(PathBuf::from).collect();
            set.insert(unit);
        }
        set
    }

    fn paths(group: &[Arc<Unit>]) -> Vec<String> {
        group
            .iter()
            .map(|u| u.path.display().to_string())
            .collect()
    }

    #[test]
    fn normal_direction_points_deps_at_dependents() {
        let set = unit_set(&[("/stacks/a", &[]), ("/stacks/b", &["/stacks/a"])]);
        let graph = RunGraph::build(&set, Direction::Normal);

        let a = graph.index_of(Path::new("/stacks/a")).unwrap();
        let b = graph.index_of(Path::new("/stacks/b")).unwrap();

        assert!(graph.node(a).deps().is_empty());
        assert_eq!(graph.node(a).dependents(), &[b]);
        assert_eq!(graph.node(b).deps(), &[a]);
        assert_eq!(graph.node(b).outstanding, 1);
    }

    #[test]
    fn reverse_direction_inverts_edges() {
        let set = unit_set(&[("/stacks/a", &[]), ("/stacks/b", &["/stacks/a"])]);
        let graph = RunGraph::build(&set, Direction::Reverse);

        let a = graph.index_of(Path::new("/stacks/a")).unwrap();
        let b = graph.index_of(Path::new("/stacks/b")).unwrap();

        assert_eq!(graph.node(a).deps(), &[b]);
        assert_eq!(graph.node(a).outstanding, 1);
        assert!(graph.node(b).deps().is_empty());
        assert_eq!(graph.node(b).dependents(), &[a]);
    }

    #[test]
    fn groups_reflect_longest_chain_depth() {
        // Diamond with a long arm: a -> b -> d, a -> c -> e -> d.
        let set = unit_set(&[
            ("/stacks/a", &[]),
            ("/stacks/b", &["/stacks/a"]),
            ("/stacks/c", &["/stacks/a"]),
            ("/stacks/e", &["/stacks/c"]),
            ("/stacks/d", &["/stacks/b", "/stacks/e"]),
        ]);
        let graph = RunGraph::build(&set, Direction::Normal);
        let groups = graph.groups(MAX_GRAPH_DEPTH);

        assert_eq!(groups.len(), 4);
        assert_eq!(paths(&groups[0]), vec!["/stacks/a"]);
        assert_eq!(paths(&groups[1]), vec!["/stacks/b", "/stacks/c"]);
        assert_eq!(paths(&groups[2]), vec!["/stacks/e"]);
        assert_eq!(paths(&groups[3]), vec!["/stacks/d"]);
    }

    #[test]
    fn groups_tie_break_by_ascending_path() {
        let set = unit_set(&[
            ("/stacks/zeta", &[]),
            ("/stacks/alpha", &[]),
            ("/stacks/mid", &[]),
        ]);
        let graph = RunGraph::build(&set, Direction::Normal);
        let groups = graph.groups(MAX_GRAPH_DEPTH);

        assert_eq!(groups.len(), 1);
        assert_eq!(
            paths(&groups[0]),
            vec!["/stacks/alpha", "/stacks/mid", "/stacks/zeta"]
        );
    }

    #[test]
    fn groups_leave_out_excluded_units() {
        let mut set = unit_set(&[("/stacks/a", &[]), ("/stacks/b", &["/stacks/a"])]);
        set.get_mut(Path::new("/stacks/a"))
            .unwrap()
            .mark_excluded(Exclusion::Dir);

        let graph = RunGraph::build(&set, Direction::Normal);
        let groups = graph.groups(MAX_GRAPH_DEPTH);

        assert_eq!(groups.len(), 1);
        assert_eq!(paths(&groups[0]), vec!["/stacks/b"]);
    }

    #[test]
    fn depth_cap_stops_grouping() {
        let set = unit_set(&[
            ("/stacks/a", &[]),
            ("/stacks/b", &["/stacks/a"]),
            ("/stacks/c", &["/stacks/b"]),
        ]);
        let graph = RunGraph::build(&set, Direction::Normal);
        let groups = graph.groups(2);
        assert_eq!(groups.len(), 2);
    }
}
