//! Fragment DAGs and their structural validation.
//!
//! A [`Plan`] is immutable once built: construction checks that every output
//! id has exactly one producer, every input id is produced inside the plan,
//! the graph is acyclic, and every terminal id is produced.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use sysproc_common::{DependencyId, Result, SysprocError};

use crate::fragment::Fragment;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    fragments: Vec<Fragment>,
    terminal_dependencies: Vec<DependencyId>,
}

impl Plan {
    /// Build and validate a plan.
    pub fn new(fragments: Vec<Fragment>, terminal_dependencies: Vec<DependencyId>) -> Result<Self> {
        let plan = Self {
            fragments,
            terminal_dependencies,
        };
        plan.validate()?;
        Ok(plan)
    }

    /// The common two-layer case: one distribute fragment feeding one aggregate.
    pub fn distribute_aggregate(distribute: Fragment, aggregate: Fragment) -> Result<Self> {
        if !aggregate
            .input_dependencies
            .contains(&distribute.output_dependency)
        {
            return Err(SysprocError::Planning(format!(
                "aggregate fragment {} does not consume distribute output {}",
                aggregate.fragment_id, distribute.output_dependency
            )));
        }
        let terminal = aggregate.output_dependency;
        Self::new(vec![distribute, aggregate], vec![terminal])
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn terminal_dependencies(&self) -> &[DependencyId] {
        &self.terminal_dependencies
    }

    /// Index of the fragment producing `dependency`.
    pub fn producer_of(&self, dependency: DependencyId) -> Option<usize> {
        self.fragments
            .iter()
            .position(|f| f.output_dependency == dependency)
    }

    /// Fragment indexes grouped in topological layers.
    ///
    /// Layer `n` only consumes outputs of layers `< n`; fragments within a
    /// layer are listed in plan order.
    pub fn layers(&self) -> Vec<Vec<usize>> {
        let mut depth = vec![0usize; self.fragments.len()];
        for idx in self.topological_order() {
            let f = &self.fragments[idx];
            depth[idx] = f
                .input_dependencies
                .iter()
                .filter_map(|d| self.producer_of(*d))
                .map(|p| depth[p] + 1)
                .max()
                .unwrap_or(0);
        }
        let max_depth = depth.iter().copied().max().unwrap_or(0);
        let mut layers = vec![Vec::new(); max_depth + 1];
        for (idx, d) in depth.into_iter().enumerate() {
            layers[d].push(idx);
        }
        layers.retain(|l| !l.is_empty());
        layers
    }

    fn topological_order(&self) -> Vec<usize> {
        let mut indegree = self
            .fragments
            .iter()
            .map(|f| f.input_dependencies.len())
            .collect::<Vec<_>>();
        let mut ready = indegree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect::<Vec<_>>();
        let mut order = Vec::with_capacity(self.fragments.len());
        while let Some(idx) = ready.pop() {
            order.push(idx);
            let produced = self.fragments[idx].output_dependency;
            for (consumer, f) in self.fragments.iter().enumerate() {
                let hits = f
                    .input_dependencies
                    .iter()
                    .filter(|d| **d == produced)
                    .count();
                if hits > 0 {
                    indegree[consumer] -= hits;
                    if indegree[consumer] == 0 {
                        ready.push(consumer);
                    }
                }
            }
        }
        order
    }

    fn validate(&self) -> Result<()> {
        if self.fragments.is_empty() {
            return Err(SysprocError::Planning("plan has no fragments".to_string()));
        }
        if self.terminal_dependencies.is_empty() {
            return Err(SysprocError::Planning(
                "plan has no terminal dependency".to_string(),
            ));
        }

        let mut producers: HashMap<DependencyId, usize> = HashMap::new();
        for (idx, f) in self.fragments.iter().enumerate() {
            if let Some(prev) = producers.insert(f.output_dependency, idx) {
                return Err(SysprocError::Planning(format!(
                    "dependency {} produced by fragments {} and {}",
                    f.output_dependency, self.fragments[prev].fragment_id, f.fragment_id
                )));
            }
        }

        for f in &self.fragments {
            let mut seen = HashSet::new();
            for input in &f.input_dependencies {
                if *input == f.output_dependency {
                    return Err(SysprocError::Planning(format!(
                        "fragment {} consumes its own output {}",
                        f.fragment_id, input
                    )));
                }
                if !producers.contains_key(input) {
                    return Err(SysprocError::Planning(format!(
                        "fragment {} consumes dependency {} that no fragment produces",
                        f.fragment_id, input
                    )));
                }
                if !seen.insert(*input) {
                    return Err(SysprocError::Planning(format!(
                        "fragment {} lists input {} twice",
                        f.fragment_id, input
                    )));
                }
            }
            if f.target_partition.is_some()
                && f.scope != crate::fragment::FragmentScope::SinglePartition
            {
                return Err(SysprocError::Planning(format!(
                    "fragment {} names a target partition but has scope {}",
                    f.fragment_id,
                    f.scope.as_str()
                )));
            }
        }

        for t in &self.terminal_dependencies {
            if !producers.contains_key(t) {
                return Err(SysprocError::Planning(format!(
                    "terminal dependency {t} is not produced by the plan"
                )));
            }
        }

        if self.topological_order().len() != self.fragments.len() {
            return Err(SysprocError::Planning(
                "plan fragments form a dependency cycle".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Plan;
    use crate::fragment::{Fragment, FragmentScope};
    use sysproc_common::{DependencyId, FragmentId, PartitionId, SysprocError};

    fn dep(n: u32) -> DependencyId {
        DependencyId(n)
    }

    #[test]
    fn distribute_aggregate_has_two_layers() {
        let plan = Plan::distribute_aggregate(
            Fragment::distribute(FragmentId(1), dep(10)),
            Fragment::aggregate(FragmentId(2), dep(11), vec![dep(10)]),
        )
        .expect("plan");
        assert_eq!(plan.layers(), vec![vec![0], vec![1]]);
        assert_eq!(plan.terminal_dependencies(), &[dep(11)]);
    }

    #[test]
    fn diamond_plan_layers_respect_inputs() {
        let plan = Plan::new(
            vec![
                Fragment::distribute(FragmentId(1), dep(1)),
                Fragment::new(FragmentId(2), dep(2), FragmentScope::NonExecutionSites),
                Fragment::aggregate(FragmentId(3), dep(3), vec![dep(1), dep(2)]),
                Fragment::aggregate(FragmentId(4), dep(4), vec![dep(3)]),
            ],
            vec![dep(4)],
        )
        .expect("plan");
        assert_eq!(plan.layers(), vec![vec![0, 1], vec![2], vec![3]]);
    }

    #[test]
    fn rejects_cycles() {
        let err = Plan::new(
            vec![
                Fragment::aggregate(FragmentId(1), dep(1), vec![dep(2)]),
                Fragment::aggregate(FragmentId(2), dep(2), vec![dep(1)]),
            ],
            vec![dep(2)],
        )
        .expect_err("cycle");
        assert!(matches!(err, SysprocError::Planning(ref m) if m.contains("cycle")));
    }

    #[test]
    fn rejects_unproduced_inputs_and_terminals() {
        let err = Plan::new(
            vec![Fragment::aggregate(FragmentId(1), dep(1), vec![dep(9)])],
            vec![dep(1)],
        )
        .expect_err("missing producer");
        assert!(err.to_string().contains("no fragment produces"));

        let err = Plan::new(
            vec![Fragment::distribute(FragmentId(1), dep(1))],
            vec![dep(2)],
        )
        .expect_err("missing terminal");
        assert!(err.to_string().contains("terminal dependency 2"));
    }

    #[test]
    fn rejects_duplicate_producers() {
        let err = Plan::new(
            vec![
                Fragment::distribute(FragmentId(1), dep(1)),
                Fragment::distribute(FragmentId(2), dep(1)),
            ],
            vec![dep(1)],
        )
        .expect_err("duplicate");
        assert!(err.to_string().contains("produced by fragments"));
    }

    #[test]
    fn rejects_target_partition_on_fanout_scope() {
        let mut f = Fragment::distribute(FragmentId(1), dep(1));
        f.target_partition = Some(PartitionId(0));
        let err = Plan::new(vec![f], vec![dep(1)]).expect_err("bad scope");
        assert!(err.to_string().contains("names a target partition"));
    }
}
