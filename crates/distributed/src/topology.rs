//! Static cluster layout: which site runs which partition on which host.

use std::collections::{BTreeMap, HashSet};

use sysproc_common::{ClusterConfig, HostId, PartitionId, Result, SiteId, SysprocError};
use sysproc_planner::FragmentScope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiteInfo {
    pub site_id: SiteId,
    pub host_id: HostId,
    pub partition_id: PartitionId,
}

#[derive(Debug, Clone)]
pub struct Topology {
    /// Sorted by site id.
    sites: Vec<SiteInfo>,
}

impl Topology {
    pub fn new(mut sites: Vec<SiteInfo>) -> Result<Self> {
        if sites.is_empty() {
            return Err(SysprocError::InvalidConfig(
                "topology has no sites".to_string(),
            ));
        }
        sites.sort_by_key(|s| s.site_id);
        let mut site_ids = HashSet::new();
        let mut partitions = HashSet::new();
        for s in &sites {
            if !site_ids.insert(s.site_id) {
                return Err(SysprocError::InvalidConfig(format!(
                    "site {} listed twice",
                    s.site_id
                )));
            }
            if !partitions.insert(s.partition_id) {
                return Err(SysprocError::InvalidConfig(format!(
                    "partition {} led by more than one site",
                    s.partition_id
                )));
            }
        }
        Ok(Self { sites })
    }

    /// `host_count * sites_per_host` sites; site `n` leads partition `n`.
    pub fn from_config(config: &ClusterConfig) -> Result<Self> {
        config.validate()?;
        let mut sites = Vec::new();
        for h in 0..config.host_count {
            for s in 0..config.sites_per_host {
                let n = h * config.sites_per_host + s;
                sites.push(SiteInfo {
                    site_id: SiteId(n as u64),
                    host_id: HostId(h),
                    partition_id: PartitionId(n),
                });
            }
        }
        Self::new(sites)
    }

    pub fn sites(&self) -> &[SiteInfo] {
        &self.sites
    }

    pub fn site(&self, site_id: SiteId) -> Result<&SiteInfo> {
        self.sites
            .iter()
            .find(|s| s.site_id == site_id)
            .ok_or_else(|| SysprocError::Execution(format!("unknown site {site_id}")))
    }

    pub fn partition_count(&self) -> u32 {
        self.sites.len() as u32
    }

    pub fn partitions(&self) -> Vec<PartitionId> {
        let mut out = self.sites.iter().map(|s| s.partition_id).collect::<Vec<_>>();
        out.sort();
        out
    }

    pub fn hosts(&self) -> Vec<HostId> {
        let mut out = self.sites.iter().map(|s| s.host_id).collect::<Vec<_>>();
        out.sort();
        out.dedup();
        out
    }

    pub fn site_for_partition(&self, partition: PartitionId) -> Result<SiteId> {
        self.sites
            .iter()
            .find(|s| s.partition_id == partition)
            .map(|s| s.site_id)
            .ok_or_else(|| SysprocError::Validation(format!("unknown partition {partition}")))
    }

    /// The site aggregate fragments run on.
    pub fn coordinator_site(&self) -> SiteId {
        self.sites[0].site_id
    }

    pub fn lowest_site_on_host(&self, host: HostId) -> Option<SiteId> {
        self.sites
            .iter()
            .filter(|s| s.host_id == host)
            .map(|s| s.site_id)
            .min()
    }

    pub fn is_lowest_site_on_host(&self, site_id: SiteId) -> bool {
        self.site(site_id)
            .ok()
            .and_then(|s| self.lowest_site_on_host(s.host_id))
            == Some(site_id)
    }

    pub fn partitions_by_host(&self) -> BTreeMap<HostId, Vec<PartitionId>> {
        let mut out: BTreeMap<HostId, Vec<PartitionId>> = BTreeMap::new();
        for s in &self.sites {
            out.entry(s.host_id).or_default().push(s.partition_id);
        }
        for parts in out.values_mut() {
            parts.sort();
        }
        out
    }

    /// Sites a fragment of `scope` is sent to, in site id order.
    pub fn resolve(&self, scope: FragmentScope, target: Option<PartitionId>) -> Result<Vec<SiteId>> {
        match scope {
            FragmentScope::SinglePartition => match target {
                Some(p) => Ok(vec![self.site_for_partition(p)?]),
                None => Ok(vec![self.coordinator_site()]),
            },
            FragmentScope::AllPartitions => Ok(self.sites.iter().map(|s| s.site_id).collect()),
            FragmentScope::NonExecutionSites => Ok(self
                .hosts()
                .into_iter()
                .filter_map(|h| self.lowest_site_on_host(h))
                .collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_by_three() -> Topology {
        Topology::from_config(&ClusterConfig {
            host_count: 2,
            sites_per_host: 3,
            ..ClusterConfig::default()
        })
        .expect("topology")
    }

    #[test]
    fn resolves_every_scope() {
        let t = two_by_three();
        assert_eq!(
            t.resolve(FragmentScope::AllPartitions, None).expect("all").len(),
            6
        );
        assert_eq!(
            t.resolve(FragmentScope::NonExecutionSites, None).expect("hosts"),
            vec![SiteId(0), SiteId(3)]
        );
        assert_eq!(
            t.resolve(FragmentScope::SinglePartition, None).expect("coord"),
            vec![SiteId(0)]
        );
        assert_eq!(
            t.resolve(FragmentScope::SinglePartition, Some(PartitionId(4)))
                .expect("routed"),
            vec![SiteId(4)]
        );
        assert!(
            t.resolve(FragmentScope::SinglePartition, Some(PartitionId(9)))
                .is_err()
        );
    }

    #[test]
    fn lowest_site_per_host() {
        let t = two_by_three();
        assert!(t.is_lowest_site_on_host(SiteId(0)));
        assert!(!t.is_lowest_site_on_host(SiteId(1)));
        assert!(t.is_lowest_site_on_host(SiteId(3)));
        assert_eq!(
            t.partitions_by_host().get(&HostId(1)),
            Some(&vec![PartitionId(3), PartitionId(4), PartitionId(5)])
        );
    }

    #[test]
    fn rejects_duplicate_partition_leaders() {
        let s = SiteInfo {
            site_id: SiteId(0),
            host_id: HostId(0),
            partition_id: PartitionId(0),
        };
        let dup = SiteInfo {
            site_id: SiteId(1),
            ..s
        };
        assert!(Topology::new(vec![s, dup]).is_err());
        assert!(Topology::new(Vec::new()).is_err());
    }
}
