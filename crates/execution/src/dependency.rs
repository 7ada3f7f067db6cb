use std::collections::BTreeMap;

use arrow::record_batch::RecordBatch;
use sysproc_common::{DependencyId, Result, SiteId, SysprocError};

/// One site's contribution to a dependency id.
#[derive(Debug, Clone)]
pub struct PartialTable {
    pub site_id: SiteId,
    pub table: RecordBatch,
}

/// Partial tables of one plan execution, grouped by output dependency id.
///
/// Tables under an id are kept in arrival order.
#[derive(Debug, Clone, Default)]
pub struct DependencyTables {
    tables: BTreeMap<DependencyId, Vec<PartialTable>>,
}

impl DependencyTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, dependency: DependencyId, site_id: SiteId, table: RecordBatch) {
        self.tables
            .entry(dependency)
            .or_default()
            .push(PartialTable { site_id, table });
    }

    pub fn count(&self, dependency: DependencyId) -> usize {
        self.tables.get(&dependency).map(|t| t.len()).unwrap_or(0)
    }

    pub fn get(&self, dependency: DependencyId) -> &[PartialTable] {
        self.tables
            .get(&dependency)
            .map(|t| t.as_slice())
            .unwrap_or(&[])
    }

    /// Like [`get`](Self::get) but fails when no site contributed.
    pub fn require(&self, dependency: DependencyId) -> Result<&[PartialTable]> {
        match self.tables.get(&dependency) {
            Some(t) if !t.is_empty() => Ok(t),
            _ => Err(SysprocError::Execution(format!(
                "dependency {dependency} has no partial tables"
            ))),
        }
    }

    /// The bare batches under `dependency`, in arrival order.
    pub fn batches(&self, dependency: DependencyId) -> Vec<RecordBatch> {
        self.get(dependency).iter().map(|p| p.table.clone()).collect()
    }

    pub fn dependency_ids(&self) -> Vec<DependencyId> {
        self.tables.keys().copied().collect()
    }

    /// Copy of the entries for `ids` only; absent ids map to nothing.
    pub fn subset(&self, ids: &[DependencyId]) -> Self {
        let tables = ids
            .iter()
            .filter_map(|id| self.tables.get(id).map(|t| (*id, t.clone())))
            .collect();
        Self { tables }
    }
}
