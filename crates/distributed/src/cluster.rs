//! In-process cluster: one [`LocalSite`] per partition, grouped into hosts,
//! wired to a shared catalog, router and coordination store.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use sysproc_common::{ClusterConfig, HostId, Result, SiteId, SysprocError};
use sysproc_execution::{FragmentRegistry, HostState, SiteContext};
use sysproc_storage::{
    Catalog, CoordinationStore, MemoryCoordinationStore, MemoryPartitionStore, ModuloHashinator,
    PartitionRouter, PartitionStore, Row,
};
use tracing::info;

use crate::coordinator::{CoordinatorConfig, ScatterGatherCoordinator};
use crate::site::{LocalSite, SiteExecutor};
use crate::topology::Topology;

#[derive(Debug)]
pub struct LocalClusterBuilder {
    config: ClusterConfig,
    catalog: Catalog,
    registry: Arc<FragmentRegistry>,
    coordination: Option<Arc<dyn CoordinationStore>>,
    snapshot_dir: Option<PathBuf>,
}

impl LocalClusterBuilder {
    pub fn catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn registry(mut self, registry: Arc<FragmentRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn coordination(mut self, store: Arc<dyn CoordinationStore>) -> Self {
        self.coordination = Some(store);
        self
    }

    pub fn snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> Result<LocalCluster> {
        let topology = Arc::new(Topology::from_config(&self.config)?);
        let catalog = Arc::new(self.catalog);
        let router: Arc<dyn PartitionRouter> =
            Arc::new(ModuloHashinator::new(topology.partition_count())?);
        let coordination = match self.coordination {
            Some(store) => store,
            None => Arc::new(MemoryCoordinationStore::new()) as Arc<dyn CoordinationStore>,
        };

        let hosts = topology
            .hosts()
            .into_iter()
            .map(|h| {
                let state = HostState::new(h, format!("host-{h}"), Arc::clone(&catalog));
                (h, Arc::new(state))
            })
            .collect::<BTreeMap<_, _>>();
        let lead_host = hosts.values().next().cloned().ok_or_else(|| {
            SysprocError::InvalidConfig("cluster has no hosts".to_string())
        })?;

        let mut sites = Vec::with_capacity(topology.sites().len());
        for info in topology.sites() {
            let host = hosts.get(&info.host_id).cloned().ok_or_else(|| {
                SysprocError::InvalidConfig(format!("site {} on unknown host", info.site_id))
            })?;
            let store: Arc<dyn PartitionStore> = Arc::new(MemoryPartitionStore::new());
            let ctx = SiteContext {
                site_id: info.site_id,
                partition_id: info.partition_id,
                is_lowest_site_on_host: topology.is_lowest_site_on_host(info.site_id),
                store,
                router: Arc::clone(&router),
                coordination: Arc::clone(&coordination),
                host,
                snapshot_dir: self.snapshot_dir.clone(),
            };
            sites.push(Arc::new(LocalSite::new(ctx, Arc::clone(&self.registry))));
        }

        let executors = sites
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn SiteExecutor>)
            .collect();
        let coordinator = Arc::new(ScatterGatherCoordinator::new(
            Arc::clone(&topology),
            executors,
            CoordinatorConfig::from_cluster(&self.config),
        )?);
        info!(
            hosts = hosts.len(),
            sites = sites.len(),
            handlers = self.registry.ids().len(),
            "local cluster started"
        );
        Ok(LocalCluster {
            config: self.config,
            topology,
            lead_host,
            router,
            coordination,
            registry: self.registry,
            hosts,
            sites,
            coordinator,
        })
    }
}

#[derive(Debug)]
pub struct LocalCluster {
    config: ClusterConfig,
    topology: Arc<Topology>,
    /// Host of the lowest site; its catalog is the one procedures validate against.
    lead_host: Arc<HostState>,
    router: Arc<dyn PartitionRouter>,
    coordination: Arc<dyn CoordinationStore>,
    registry: Arc<FragmentRegistry>,
    hosts: BTreeMap<HostId, Arc<HostState>>,
    sites: Vec<Arc<LocalSite>>,
    coordinator: Arc<ScatterGatherCoordinator>,
}

impl LocalCluster {
    pub fn builder(config: ClusterConfig) -> LocalClusterBuilder {
        LocalClusterBuilder {
            config,
            catalog: Catalog::new(),
            registry: Arc::new(FragmentRegistry::new()),
            coordination: None,
            snapshot_dir: None,
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    pub fn catalog(&self) -> Arc<Catalog> {
        self.lead_host.catalog().catalog
    }

    pub fn lead_host(&self) -> &Arc<HostState> {
        &self.lead_host
    }

    pub fn router(&self) -> &Arc<dyn PartitionRouter> {
        &self.router
    }

    pub fn coordination(&self) -> &Arc<dyn CoordinationStore> {
        &self.coordination
    }

    pub fn registry(&self) -> &Arc<FragmentRegistry> {
        &self.registry
    }

    pub fn coordinator(&self) -> &Arc<ScatterGatherCoordinator> {
        &self.coordinator
    }

    pub fn hosts(&self) -> &BTreeMap<HostId, Arc<HostState>> {
        &self.hosts
    }

    pub fn sites(&self) -> &[Arc<LocalSite>] {
        &self.sites
    }

    pub fn site(&self, site_id: SiteId) -> Result<&Arc<LocalSite>> {
        self.sites
            .iter()
            .find(|s| s.context().site_id == site_id)
            .ok_or_else(|| SysprocError::Execution(format!("unknown site {site_id}")))
    }

    /// Insert rows the way a client write would land: partitioned tables by
    /// partition key, replicated tables on every site.
    pub fn load_rows(&self, table: &str, rows: Vec<Row>) -> Result<u64> {
        let catalog = self.catalog();
        let def = catalog.get(table)?;
        let Some(pcol) = def.partition_column.as_deref() else {
            for site in &self.sites {
                site.context().store.insert_rows(def, rows.clone())?;
            }
            return Ok(rows.len() as u64);
        };
        let col = def.column_index(pcol).ok_or_else(|| {
            SysprocError::InvalidConfig(format!(
                "partition column {pcol} missing from table {}",
                def.name
            ))
        })?;
        let mut routed: BTreeMap<SiteId, Vec<Row>> = BTreeMap::new();
        for row in rows {
            let key = row.get(col).ok_or_else(|| {
                SysprocError::Validation(format!("row for {} lacks partition column", def.name))
            })?;
            let partition = self.router.partition_for(key)?;
            let site = self.topology.site_for_partition(partition)?;
            routed.entry(site).or_default().push(row);
        }
        let mut inserted = 0;
        for (site, rows) in routed {
            inserted += self.site(site)?.context().store.insert_rows(def, rows)?;
        }
        Ok(inserted)
    }

    /// Rows of `table` held by every site, in site order.
    pub fn row_counts(&self, table: &str) -> Result<Vec<(SiteId, u64)>> {
        let catalog = self.catalog();
        let def = catalog.get(table)?;
        self.sites
            .iter()
            .map(|s| Ok((s.context().site_id, s.context().store.row_count(def)?)))
            .collect()
    }
}
