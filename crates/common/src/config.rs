use std::env;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SysprocError};

/// Shape and timing knobs for an in-process cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Number of hosts.
    pub host_count: u32,
    /// Execution sites per host; each site leads one partition.
    pub sites_per_host: u32,
    /// Max wait for a single site response before the site counts as disconnected.
    ///
    /// `0` disables the timeout.
    pub fragment_response_timeout_ms: u64,
    /// Default wall-clock budget for chunked (nibble/migrate) loops.
    pub chunked_timeout_ms: u64,
    /// Default chunk size for chunked loops.
    pub chunked_default_chunk_size: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            host_count: 1,
            sites_per_host: 2,
            fragment_response_timeout_ms: 30_000,
            chunked_timeout_ms: 120_000,
            chunked_default_chunk_size: 1_000,
        }
    }
}

impl ClusterConfig {
    /// Build config from `SYSPROC_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let d = Self::default();
        let cfg = Self {
            host_count: env_parse_or("SYSPROC_HOSTS", d.host_count)?,
            sites_per_host: env_parse_or("SYSPROC_SITES_PER_HOST", d.sites_per_host)?,
            fragment_response_timeout_ms: env_parse_or(
                "SYSPROC_FRAGMENT_TIMEOUT_MS",
                d.fragment_response_timeout_ms,
            )?,
            chunked_timeout_ms: env_parse_or("SYSPROC_CHUNKED_TIMEOUT_MS", d.chunked_timeout_ms)?,
            chunked_default_chunk_size: env_parse_or(
                "SYSPROC_CHUNK_SIZE",
                d.chunked_default_chunk_size,
            )?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject shapes that cannot host a cluster.
    pub fn validate(&self) -> Result<()> {
        if self.host_count == 0 {
            return Err(SysprocError::InvalidConfig(
                "host_count must be positive".to_string(),
            ));
        }
        if self.sites_per_host == 0 {
            return Err(SysprocError::InvalidConfig(
                "sites_per_host must be positive".to_string(),
            ));
        }
        if self.chunked_default_chunk_size == 0 {
            return Err(SysprocError::InvalidConfig(
                "chunked_default_chunk_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Total number of execution sites (and partitions).
    pub fn site_count(&self) -> u32 {
        self.host_count * self.sites_per_host
    }
}

fn env_parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| SysprocError::InvalidConfig(format!("{key}={raw:?}: {e}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::ClusterConfig;

    #[test]
    fn default_config_is_valid() {
        let cfg = ClusterConfig::default();
        cfg.validate().expect("valid");
        assert_eq!(cfg.site_count(), 2);
    }

    #[test]
    fn rejects_zero_sites() {
        let cfg = ClusterConfig {
            sites_per_host: 0,
            ..ClusterConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
