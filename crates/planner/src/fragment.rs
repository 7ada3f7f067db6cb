use serde::{Deserialize, Serialize};
use sysproc_common::{DependencyId, FragmentId, PartitionId, Result, SysprocError, Value};

/// Which sites receive a copy of a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FragmentScope {
    /// Runs exactly once: on the target partition's site when one is named,
    /// otherwise on the coordinator's own site.
    SinglePartition,
    /// Runs on the lead site of every partition.
    AllPartitions,
    /// Runs once per host, on the host's lowest site id.
    NonExecutionSites,
}

impl FragmentScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            FragmentScope::SinglePartition => "SinglePartition",
            FragmentScope::AllPartitions => "AllPartitions",
            FragmentScope::NonExecutionSites => "NonExecutionSites",
        }
    }
}

/// Positional parameter payload carried by a fragment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet(pub Vec<Value>);

impl ParameterSet {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fetch parameter `idx`; `name` is only used for the error message.
    pub fn get(&self, idx: usize, name: &str) -> Result<&Value> {
        self.0.get(idx).ok_or_else(|| {
            SysprocError::Execution(format!(
                "missing fragment parameter {idx} ({name}); got {} parameters",
                self.0.len()
            ))
        })
    }

    pub fn get_i64(&self, idx: usize, name: &str) -> Result<i64> {
        let v = self.get(idx, name)?;
        v.as_i64().ok_or_else(|| type_mismatch(idx, name, "BIGINT", v))
    }

    pub fn get_str(&self, idx: usize, name: &str) -> Result<&str> {
        let v = self.get(idx, name)?;
        v.as_str().ok_or_else(|| type_mismatch(idx, name, "VARCHAR", v))
    }

    pub fn get_bool(&self, idx: usize, name: &str) -> Result<bool> {
        let v = self.get(idx, name)?;
        v.as_bool()
            .ok_or_else(|| type_mismatch(idx, name, "BOOLEAN", v))
    }
}

fn type_mismatch(idx: usize, name: &str, expected: &str, got: &Value) -> SysprocError {
    SysprocError::Execution(format!(
        "fragment parameter {idx} ({name}) expected {expected}, got {}",
        got.type_name()
    ))
}

/// One atomic, named unit of distributed work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    /// Handler selector.
    pub fragment_id: FragmentId,
    /// Dependency ids that must be complete before this fragment runs.
    pub input_dependencies: Vec<DependencyId>,
    /// Dependency id this fragment's results are filed under.
    pub output_dependency: DependencyId,
    /// Site fan-out.
    pub scope: FragmentScope,
    /// Routing target for [`FragmentScope::SinglePartition`].
    pub target_partition: Option<PartitionId>,
    /// Opaque parameters handed to the handler.
    pub parameters: ParameterSet,
}

impl Fragment {
    pub fn new(fragment_id: FragmentId, output: DependencyId, scope: FragmentScope) -> Self {
        Self {
            fragment_id,
            input_dependencies: Vec::new(),
            output_dependency: output,
            scope,
            target_partition: None,
            parameters: ParameterSet::empty(),
        }
    }

    /// Leaf fragment replicated to every partition.
    pub fn distribute(fragment_id: FragmentId, output: DependencyId) -> Self {
        Self::new(fragment_id, output, FragmentScope::AllPartitions)
    }

    /// Fragment that runs once on the coordinator site and consumes `inputs`.
    pub fn aggregate(
        fragment_id: FragmentId,
        output: DependencyId,
        inputs: Vec<DependencyId>,
    ) -> Self {
        Self::new(fragment_id, output, FragmentScope::SinglePartition).with_inputs(inputs)
    }

    pub fn with_inputs(mut self, inputs: Vec<DependencyId>) -> Self {
        self.input_dependencies = inputs;
        self
    }

    pub fn with_parameters(mut self, parameters: ParameterSet) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn on_partition(mut self, partition: PartitionId) -> Self {
        self.scope = FragmentScope::SinglePartition;
        self.target_partition = Some(partition);
        self
    }

    /// Whether this fragment consumes other fragments' outputs.
    pub fn is_aggregate(&self) -> bool {
        !self.input_dependencies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_parameter_access_reports_mismatches() {
        let params = ParameterSet::new(vec![Value::from("t"), Value::BigInt(5)]);
        assert_eq!(params.get_str(0, "table").expect("table"), "t");
        assert_eq!(params.get_i64(1, "chunk").expect("chunk"), 5);

        let err = params.get_i64(0, "chunk").expect_err("type mismatch");
        assert!(err.to_string().contains("expected BIGINT"));
        let err = params.get(2, "missing").expect_err("missing");
        assert!(err.to_string().contains("missing fragment parameter 2"));
    }

    #[test]
    fn on_partition_forces_single_partition_scope() {
        let f = Fragment::distribute(FragmentId(1), DependencyId(1)).on_partition(PartitionId(3));
        assert_eq!(f.scope, FragmentScope::SinglePartition);
        assert_eq!(f.target_partition, Some(PartitionId(3)));
        assert!(!f.is_aggregate());
    }
}
