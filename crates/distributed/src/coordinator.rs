//! Scatter/gather coordinator.
//!
//! Responsibilities:
//! - resolve every fragment's target sites from the topology before anything runs;
//! - dispatch leaf fragments to all of their sites in parallel;
//! - file each site's table under the fragment's output dependency id;
//! - release a consuming fragment once every producer of each of its inputs
//!   has answered from every site of the producing scope;
//! - return the tables of the plan's terminal dependency ids.
//!
//! Failure semantics:
//! - the first site abort or disconnect fails the whole plan;
//! - fragments still waiting for inputs are never dispatched after a failure;
//! - fragments already scattered run to completion; nothing is rolled back.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use arrow::record_batch::RecordBatch;
use futures::StreamExt;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::FuturesUnordered;
use sysproc_common::metrics::global_metrics;
use sysproc_common::{ClusterConfig, DependencyId, PlanId, Result, SiteId, SysprocError};
use sysproc_execution::{DependencyTables, PartialTable};
use sysproc_planner::{Fragment, Plan};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::site::{FragmentResult, SiteExecutor};
use crate::topology::Topology;

#[derive(Debug, Clone, Default)]
/// Coordinator behavior knobs.
pub struct CoordinatorConfig {
    /// A site that has not answered a dispatched fragment within this window
    /// is treated as disconnected. `None` waits forever.
    pub fragment_response_timeout: Option<Duration>,
}

impl CoordinatorConfig {
    pub fn from_cluster(config: &ClusterConfig) -> Self {
        Self {
            fragment_response_timeout: (config.fragment_response_timeout_ms > 0)
                .then(|| Duration::from_millis(config.fragment_response_timeout_ms)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Lifecycle of one plan execution.
pub enum PlanState {
    Created,
    /// Target sites resolved and leaf fragments sent.
    Scattered,
    /// Collecting partial tables.
    Waiting,
    /// At least one consuming fragment has been released.
    Aggregating,
    Done,
    Failed,
}

impl PlanState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlanState::Done | PlanState::Failed)
    }
}

/// Tables of a finished plan's terminal dependency ids.
#[derive(Debug, Clone)]
pub struct PlanOutput {
    plan_id: PlanId,
    states: Vec<PlanState>,
    tables: DependencyTables,
}

impl PlanOutput {
    pub fn plan_id(&self) -> PlanId {
        self.plan_id
    }

    /// States the run passed through, `Created` first and `Done` last.
    pub fn states(&self) -> &[PlanState] {
        &self.states
    }

    pub fn tables(&self, dependency: DependencyId) -> &[PartialTable] {
        self.tables.get(dependency)
    }

    /// The only table filed under `dependency`.
    pub fn single(&self, dependency: DependencyId) -> Result<RecordBatch> {
        match self.tables.get(dependency) {
            [one] => Ok(one.table.clone()),
            many => Err(SysprocError::Execution(format!(
                "expected one table for dependency {dependency}, found {}",
                many.len()
            ))),
        }
    }

    pub fn into_tables(self) -> DependencyTables {
        self.tables
    }
}

struct SiteEvent {
    fragment_idx: usize,
    site: SiteId,
    result: Result<FragmentResult>,
}

/// Per-invocation bookkeeping; dropped when the plan call returns.
struct PlanRun<'a> {
    plan_id: PlanId,
    plan: &'a Plan,
    states: Vec<PlanState>,
    targets: Vec<Vec<SiteId>>,
    expected: HashMap<DependencyId, usize>,
    received: DependencyTables,
    dispatched: Vec<bool>,
}

impl<'a> PlanRun<'a> {
    fn new(plan_id: PlanId, plan: &'a Plan) -> Self {
        Self {
            plan_id,
            plan,
            states: vec![PlanState::Created],
            targets: Vec::with_capacity(plan.fragments().len()),
            expected: HashMap::new(),
            received: DependencyTables::new(),
            dispatched: vec![false; plan.fragments().len()],
        }
    }

    fn state(&self) -> PlanState {
        self.states.last().copied().unwrap_or(PlanState::Created)
    }

    fn transition(&mut self, to: PlanState) {
        let from = self.state();
        if from == to || from.is_terminal() {
            return;
        }
        debug!(plan_id = %self.plan_id, from = ?from, to = ?to, "plan state transition");
        self.states.push(to);
    }

    fn is_complete(&self, dependency: DependencyId) -> bool {
        self.expected
            .get(&dependency)
            .map(|n| self.received.count(dependency) == *n)
            .unwrap_or(false)
    }

    fn ready(&self, idx: usize) -> bool {
        !self.dispatched[idx]
            && self.plan.fragments()[idx]
                .input_dependencies
                .iter()
                .all(|d| self.is_complete(*d))
    }
}

/// Drives plans across the sites of one cluster.
///
/// Holds no state across invocations apart from the plan id counter.
pub struct ScatterGatherCoordinator {
    topology: Arc<Topology>,
    sites: HashMap<SiteId, Arc<dyn SiteExecutor>>,
    config: CoordinatorConfig,
    next_plan_id: AtomicU64,
}

impl std::fmt::Debug for ScatterGatherCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScatterGatherCoordinator")
            .field("sites", &self.sites.len())
            .field("config", &self.config)
            .finish()
    }
}

impl ScatterGatherCoordinator {
    pub fn new(
        topology: Arc<Topology>,
        sites: Vec<Arc<dyn SiteExecutor>>,
        config: CoordinatorConfig,
    ) -> Result<Self> {
        let sites = sites
            .into_iter()
            .map(|s| (s.site_id(), s))
            .collect::<HashMap<_, _>>();
        for info in topology.sites() {
            if !sites.contains_key(&info.site_id) {
                return Err(SysprocError::InvalidConfig(format!(
                    "no executor for site {}",
                    info.site_id
                )));
            }
        }
        Ok(Self {
            topology,
            sites,
            config,
            next_plan_id: AtomicU64::new(1),
        })
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Execute `plan` and return the tables of its terminal dependency ids.
    pub async fn execute_plan(&self, plan: &Plan) -> Result<PlanOutput> {
        self.execute_tracked(plan).await.1
    }

    /// Execute `plan`, also handing back the states of the run when it fails.
    pub(crate) async fn execute_tracked(
        &self,
        plan: &Plan,
    ) -> (Vec<PlanState>, Result<PlanOutput>) {
        let plan_id = PlanId(self.next_plan_id.fetch_add(1, Ordering::Relaxed));
        let started = Instant::now();
        let mut run = PlanRun::new(plan_id, plan);
        let result = self.drive(&mut run).await;
        let secs = started.elapsed().as_secs_f64();
        let result = match result {
            Ok(tables) => {
                run.transition(PlanState::Done);
                global_metrics().record_plan("done", secs);
                info!(
                    plan_id = %plan_id,
                    fragments = plan.fragments().len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "plan completed"
                );
                Ok(PlanOutput {
                    plan_id,
                    states: run.states.clone(),
                    tables,
                })
            }
            Err(e) => {
                let reached = run.state();
                run.transition(PlanState::Failed);
                global_metrics().record_plan("failed", secs);
                warn!(plan_id = %plan_id, reached = ?reached, error = %e, "plan failed");
                Err(e)
            }
        };
        (run.states, result)
    }

    async fn drive(&self, run: &mut PlanRun<'_>) -> Result<DependencyTables> {
        let plan = run.plan;
        for f in plan.fragments() {
            let sites = self.topology.resolve(f.scope, f.target_partition)?;
            if sites.is_empty() {
                return Err(SysprocError::Planning(format!(
                    "fragment {} resolves to no sites",
                    f.fragment_id
                )));
            }
            if let Some(missing) = sites.iter().find(|s| !self.sites.contains_key(s)) {
                return Err(SysprocError::Execution(format!(
                    "fragment {} targets unknown site {missing}",
                    f.fragment_id
                )));
            }
            run.expected.insert(f.output_dependency, sites.len());
            run.targets.push(sites);
        }

        let mut in_flight = FuturesUnordered::new();
        for idx in 0..plan.fragments().len() {
            if run.ready(idx) {
                self.dispatch(run, idx, &mut in_flight);
            }
        }
        run.transition(PlanState::Scattered);
        run.transition(PlanState::Waiting);

        while let Some(event) = in_flight.next().await {
            let SiteEvent {
                fragment_idx,
                site,
                result,
            } = event;
            let fragment = &plan.fragments()[fragment_idx];
            let out = match result {
                Ok(out) => out,
                Err(e) => {
                    let kind = match e {
                        SysprocError::SiteAbort { .. } => "abort",
                        SysprocError::SiteDisconnected { .. } => "disconnect",
                        _ => "error",
                    };
                    global_metrics().inc_site_failures(site.0, kind);
                    return Err(e);
                }
            };
            if out.dependency != fragment.output_dependency {
                return Err(SysprocError::Execution(format!(
                    "site {site} answered fragment {} with dependency {} instead of {}",
                    fragment.fragment_id, out.dependency, fragment.output_dependency
                )));
            }
            run.received.insert(out.dependency, site, out.table);
            global_metrics().record_partial_table(out.dependency.0);

            if !run.is_complete(out.dependency) {
                continue;
            }
            debug!(
                plan_id = %run.plan_id,
                dependency_id = %out.dependency,
                tables = run.received.count(out.dependency),
                "dependency complete"
            );
            for idx in 0..plan.fragments().len() {
                if run.ready(idx) {
                    run.transition(PlanState::Aggregating);
                    self.dispatch(run, idx, &mut in_flight);
                }
            }
        }

        if let Some(missing) = plan
            .terminal_dependencies()
            .iter()
            .find(|d| !run.is_complete(**d))
        {
            return Err(SysprocError::Execution(format!(
                "plan {} finished without terminal dependency {missing}",
                run.plan_id
            )));
        }
        Ok(run.received.subset(plan.terminal_dependencies()))
    }

    fn dispatch(
        &self,
        run: &mut PlanRun<'_>,
        idx: usize,
        in_flight: &mut FuturesUnordered<BoxFuture<'static, SiteEvent>>,
    ) {
        run.dispatched[idx] = true;
        let fragment: Arc<Fragment> = Arc::new(run.plan.fragments()[idx].clone());
        let inputs = run.received.subset(&fragment.input_dependencies);
        debug!(
            plan_id = %run.plan_id,
            fragment_id = %fragment.fragment_id,
            scope = fragment.scope.as_str(),
            sites = run.targets[idx].len(),
            "dispatching fragment"
        );
        for site in &run.targets[idx] {
            let Some(executor) = self.sites.get(site).cloned() else {
                continue;
            };
            let site = *site;
            let dependency = fragment.output_dependency;
            let timeout = self.config.fragment_response_timeout;
            let f = Arc::clone(&fragment);
            let inputs = inputs.clone();
            let handle = tokio::spawn(async move { executor.execute(&f, inputs).await });
            in_flight.push(
                async move {
                    let result = await_site(handle, timeout, site, dependency).await;
                    SiteEvent {
                        fragment_idx: idx,
                        site,
                        result,
                    }
                }
                .boxed(),
            );
        }
    }
}

async fn await_site(
    handle: JoinHandle<Result<FragmentResult>>,
    timeout: Option<Duration>,
    site: SiteId,
    dependency: DependencyId,
) -> Result<FragmentResult> {
    let joined = match timeout {
        Some(t) => match tokio::time::timeout(t, handle).await {
            Ok(joined) => joined,
            Err(_) => {
                return Err(SysprocError::SiteDisconnected {
                    site,
                    dependency,
                    reason: format!("no response within {} ms", t.as_millis()),
                });
            }
        },
        None => handle.await,
    };
    joined.map_err(|e| SysprocError::SiteDisconnected {
        site,
        dependency,
        reason: format!("site task ended without a result: {e}"),
    })?
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
