use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use arrow::record_batch::RecordBatch;
use sysproc_common::{FragmentId, Result, SysprocError};
use sysproc_planner::ParameterSet;

use crate::context::SiteContext;
use crate::dependency::DependencyTables;

/// Site-side implementation of one fragment id.
///
/// `inputs` holds only the dependency ids the fragment declared; leaf
/// fragments receive an empty set. The returned table is filed under the
/// fragment's output dependency id by the caller.
pub trait FragmentHandler: Send + Sync {
    fn execute(
        &self,
        ctx: &SiteContext,
        inputs: &DependencyTables,
        params: &ParameterSet,
    ) -> Result<RecordBatch>;
}

impl<F> FragmentHandler for F
where
    F: Fn(&SiteContext, &DependencyTables, &ParameterSet) -> Result<RecordBatch> + Send + Sync,
{
    fn execute(
        &self,
        ctx: &SiteContext,
        inputs: &DependencyTables,
        params: &ParameterSet,
    ) -> Result<RecordBatch> {
        self(ctx, inputs, params)
    }
}

/// Fragment id to handler dispatch table shared by the sites of a cluster.
#[derive(Default)]
pub struct FragmentRegistry {
    inner: RwLock<HashMap<FragmentId, Arc<dyn FragmentHandler>>>,
}

impl std::fmt::Debug for FragmentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.inner.read().map(|m| m.len()).unwrap_or_default();
        f.debug_struct("FragmentRegistry")
            .field("handlers", &count)
            .finish()
    }
}

impl FragmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a handler.
    ///
    /// Returns `true` when an existing handler for the id was replaced.
    pub fn register(&self, id: FragmentId, handler: Arc<dyn FragmentHandler>) -> bool {
        self.inner
            .write()
            .expect("fragment registry lock poisoned")
            .insert(id, handler)
            .is_some()
    }

    pub fn register_fn<F>(&self, id: FragmentId, f: F) -> bool
    where
        F: Fn(&SiteContext, &DependencyTables, &ParameterSet) -> Result<RecordBatch>
            + Send
            + Sync
            + 'static,
    {
        self.register(id, Arc::new(f))
    }

    pub fn get(&self, id: FragmentId) -> Option<Arc<dyn FragmentHandler>> {
        self.inner
            .read()
            .expect("fragment registry lock poisoned")
            .get(&id)
            .cloned()
    }

    /// Like [`get`](Self::get) but an unknown id is an execution error.
    pub fn resolve(&self, id: FragmentId) -> Result<Arc<dyn FragmentHandler>> {
        self.get(id).ok_or_else(|| {
            SysprocError::Execution(format!("no handler registered for fragment {id}"))
        })
    }

    /// Registered fragment ids in ascending order.
    pub fn ids(&self) -> Vec<FragmentId> {
        let mut ids = self
            .inner
            .read()
            .expect("fragment registry lock poisoned")
            .keys()
            .copied()
            .collect::<Vec<_>>();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{rows_to_batch, schemas};

    #[test]
    fn register_and_replace() {
        let reg = FragmentRegistry::new();
        let h = |_: &SiteContext, _: &DependencyTables, _: &ParameterSet| {
            rows_to_batch(schemas::unused(), Vec::new())
        };
        assert!(!reg.register_fn(FragmentId(2), h));
        assert!(reg.register_fn(FragmentId(2), h));
        assert!(!reg.register_fn(FragmentId(1), h));
        assert_eq!(reg.ids(), vec![FragmentId(1), FragmentId(2)]);
        assert!(reg.resolve(FragmentId(2)).is_ok());
        assert!(reg.resolve(FragmentId(3)).is_err());
    }
}
