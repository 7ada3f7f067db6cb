//! Site executors: the unit fragments are dispatched to.
//!
//! A site executes one fragment at a time against its local partition state
//! and answers with one table tagged by the fragment's output dependency id.

use std::sync::Arc;
use std::time::Instant;

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use sysproc_common::metrics::global_metrics;
use sysproc_common::{DependencyId, Result, SiteId, SysprocError};
use sysproc_execution::{DependencyTables, FragmentRegistry, SiteContext};
use sysproc_planner::Fragment;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Table produced by one site for one fragment.
#[derive(Debug, Clone)]
pub struct FragmentResult {
    pub dependency: DependencyId,
    pub table: RecordBatch,
}

#[async_trait]
/// Execution contract for fragments dispatched by the coordinator.
pub trait SiteExecutor: Send + Sync {
    fn site_id(&self) -> SiteId;

    /// Run `fragment` with the partial tables of its declared inputs.
    async fn execute(&self, fragment: &Fragment, inputs: DependencyTables)
    -> Result<FragmentResult>;
}

/// In-process site backed by a handler registry.
pub struct LocalSite {
    ctx: SiteContext,
    registry: Arc<FragmentRegistry>,
    lane: Mutex<()>,
}

impl std::fmt::Debug for LocalSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSite")
            .field("site_id", &self.ctx.site_id)
            .field("partition_id", &self.ctx.partition_id)
            .finish()
    }
}

impl LocalSite {
    pub fn new(ctx: SiteContext, registry: Arc<FragmentRegistry>) -> Self {
        Self {
            ctx,
            registry,
            lane: Mutex::new(()),
        }
    }

    pub fn context(&self) -> &SiteContext {
        &self.ctx
    }
}

#[async_trait]
impl SiteExecutor for LocalSite {
    fn site_id(&self) -> SiteId {
        self.ctx.site_id
    }

    async fn execute(
        &self,
        fragment: &Fragment,
        inputs: DependencyTables,
    ) -> Result<FragmentResult> {
        let _lane = self.lane.lock().await;
        let started = Instant::now();
        debug!(
            site_id = %self.ctx.site_id,
            fragment_id = %fragment.fragment_id,
            dependency_id = %fragment.output_dependency,
            "site executing fragment"
        );
        let outcome = self
            .registry
            .resolve(fragment.fragment_id)
            .and_then(|h| h.execute(&self.ctx, &inputs, &fragment.parameters));
        global_metrics().record_fragment(
            fragment.fragment_id.0,
            fragment.scope.as_str(),
            started.elapsed().as_secs_f64(),
        );
        match outcome {
            Ok(table) => Ok(FragmentResult {
                dependency: fragment.output_dependency,
                table,
            }),
            Err(e) => {
                warn!(
                    site_id = %self.ctx.site_id,
                    fragment_id = %fragment.fragment_id,
                    error = %e,
                    "site aborted fragment"
                );
                Err(match e {
                    e @ (SysprocError::SiteAbort { .. }
                    | SysprocError::SiteDisconnected { .. }
                    | SysprocError::Reconciliation(_)) => e,
                    other => SysprocError::SiteAbort {
                        site: self.ctx.site_id,
                        fragment: fragment.fragment_id,
                        message: other.to_string(),
                    },
                })
            }
        }
    }
}
