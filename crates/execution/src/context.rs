use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

use sysproc_common::{HostId, PartitionId, Result, SiteId, SysprocError};
use sysproc_storage::{Catalog, CoordinationStore, PartitionRouter, PartitionStore};

/// Cluster run mode as seen by one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunMode {
    Running = 0,
    Paused = 1,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Running => "RUNNING",
            RunMode::Paused => "PAUSED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "RUNNING" => Ok(RunMode::Running),
            "PAUSED" => Ok(RunMode::Paused),
            other => Err(SysprocError::Coordination(format!(
                "unknown run mode '{other}'"
            ))),
        }
    }

    fn from_u8(v: u8) -> Self {
        if v == RunMode::Paused as u8 {
            RunMode::Paused
        } else {
            RunMode::Running
        }
    }
}

/// Host-global state shared by every site on a host.
///
/// All mutations are compare-and-swap, so a host flag applied twice (or by
/// two sites) still changes exactly once.
#[derive(Debug)]
pub struct HostState {
    pub host_id: HostId,
    pub hostname: String,
    run_mode: AtomicU8,
    settings: RwLock<InstalledSettings>,
    catalog: RwLock<InstalledCatalog>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstalledSettings {
    pub version: u64,
    pub json: String,
}

/// Catalog a host serves, with the number of updates applied to it.
#[derive(Debug, Clone)]
pub struct InstalledCatalog {
    pub version: u64,
    pub catalog: Arc<Catalog>,
}

impl HostState {
    pub fn new(host_id: HostId, hostname: impl Into<String>, catalog: Arc<Catalog>) -> Self {
        Self {
            host_id,
            hostname: hostname.into(),
            run_mode: AtomicU8::new(RunMode::Running as u8),
            settings: RwLock::new(InstalledSettings::default()),
            catalog: RwLock::new(InstalledCatalog {
                version: 0,
                catalog,
            }),
        }
    }

    pub fn run_mode(&self) -> RunMode {
        RunMode::from_u8(self.run_mode.load(Ordering::Acquire))
    }

    /// Move the host from `from` to `to`; true only for the call that changed it.
    pub fn transition_run_mode(&self, from: RunMode, to: RunMode) -> bool {
        self.run_mode
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Install a settings blob unless an equal or newer version is already present.
    pub fn install_settings(&self, version: u64, json: &str) -> Result<bool> {
        let mut cur = self
            .settings
            .write()
            .map_err(|_| SysprocError::Execution("host settings lock poisoned".to_string()))?;
        if cur.version >= version {
            return Ok(false);
        }
        *cur = InstalledSettings {
            version,
            json: json.to_string(),
        };
        Ok(true)
    }

    pub fn settings(&self) -> Result<InstalledSettings> {
        self.settings
            .read()
            .map(|s| s.clone())
            .map_err(|_| SysprocError::Execution("host settings lock poisoned".to_string()))
    }

    pub fn catalog(&self) -> InstalledCatalog {
        self.catalog
            .read()
            .expect("host catalog lock poisoned")
            .clone()
    }

    /// Replace the catalog planned against `expected_version`.
    ///
    /// Returns false when the host already holds `expected_version + 1`, i.e.
    /// a retried update. Any other version is a conflict.
    pub fn install_catalog(&self, expected_version: u64, catalog: Arc<Catalog>) -> Result<bool> {
        let mut cur = self.catalog.write().expect("host catalog lock poisoned");
        if cur.version == expected_version + 1 {
            return Ok(false);
        }
        if cur.version != expected_version {
            return Err(SysprocError::Coordination(format!(
                "host {} holds catalog version {}, update was planned against {expected_version}",
                self.host_id, cur.version
            )));
        }
        *cur = InstalledCatalog {
            version: expected_version + 1,
            catalog,
        };
        Ok(true)
    }
}

/// Everything a fragment handler may touch while running on one site.
#[derive(Debug, Clone)]
pub struct SiteContext {
    pub site_id: SiteId,
    pub partition_id: PartitionId,
    /// Host-level effects are performed only where this is set.
    pub is_lowest_site_on_host: bool,
    pub store: Arc<dyn PartitionStore>,
    pub router: Arc<dyn PartitionRouter>,
    pub coordination: Arc<dyn CoordinationStore>,
    pub host: Arc<HostState>,
    /// Directory snapshot files are written under, if configured.
    pub snapshot_dir: Option<PathBuf>,
}

impl SiteContext {
    pub fn host_id(&self) -> HostId {
        self.host.host_id
    }

    pub fn hostname(&self) -> &str {
        &self.host.hostname
    }

    /// Catalog currently installed on this site's host.
    pub fn catalog(&self) -> Arc<Catalog> {
        self.host.catalog().catalog
    }
}
