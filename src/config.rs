//! Cache Configuration
//!
//! Every knob of the cache engine, loadable from YAML. Missing fields take
//! their defaults; unknown fields are rejected so typos surface early.
//!
//! ```yaml
//! cache_dir: /var/cache/blobtier
//! memoryBudgetBytes: 33554432   # snake_case or camelCase
//! disk_budget_bytes: 104857600
//! max_entry_age_secs: 604800
//! maintenance_interval_secs: 3600
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{
    Dimensions, FetchTimeouts, MemoryBudget, RetentionPolicy, DEFAULT_DISK_BUDGET,
    DEFAULT_MAX_ENTRY_AGE, DEFAULT_MEMORY_BUDGET,
};
use crate::error::{Error, Result};

/// Cache engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Disk tier directory
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Configured memory tier budget in bytes
    #[serde(default = "default_memory_budget", alias = "memoryBudgetBytes")]
    pub memory_budget_bytes: u64,

    /// Cap on the memory tier as a fraction of available host memory
    #[serde(default = "default_memory_fraction", alias = "memoryFraction")]
    pub memory_fraction: f64,

    /// Disk tier byte budget enforced by size trimming
    #[serde(default = "default_disk_budget", alias = "diskBudgetBytes")]
    pub disk_budget_bytes: u64,

    /// Disk entries older than this are removed by age trimming
    #[serde(default = "default_max_entry_age", alias = "maxEntryAgeSecs")]
    pub max_entry_age_secs: u64,

    /// Origin connect timeout
    #[serde(default = "default_connect_timeout", alias = "connectTimeoutMs")]
    pub connect_timeout_ms: u64,

    /// Origin read timeout
    #[serde(default = "default_read_timeout", alias = "readTimeoutMs")]
    pub read_timeout_ms: u64,

    /// Decode target width
    #[serde(default = "default_target_width", alias = "targetWidth")]
    pub target_width: u32,

    /// Decode target height
    #[serde(default = "default_target_height", alias = "targetHeight")]
    pub target_height: u32,

    /// Origin payloads smaller than this are returned but not cached
    #[serde(default, alias = "minSizeToCache")]
    pub min_size_to_cache: u64,

    /// Parallel origin fetches during preload
    #[serde(default = "default_preload_concurrency", alias = "preloadConcurrency")]
    pub preload_concurrency: usize,

    /// Background trim period; disabled when absent
    #[serde(default, alias = "maintenanceIntervalSecs")]
    pub maintenance_interval_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            memory_budget_bytes: default_memory_budget(),
            memory_fraction: default_memory_fraction(),
            disk_budget_bytes: default_disk_budget(),
            max_entry_age_secs: default_max_entry_age(),
            connect_timeout_ms: default_connect_timeout(),
            read_timeout_ms: default_read_timeout(),
            target_width: default_target_width(),
            target_height: default_target_height(),
            min_size_to_cache: 0,
            preload_concurrency: default_preload_concurrency(),
            maintenance_interval_secs: None,
        }
    }
}

impl CacheConfig {
    /// Defaults with a specific cache directory
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Default::default()
        }
    }

    /// Load and validate a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&text).map_err(|source| Error::ConfigParse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_ms == 0 {
            return Err(Error::Config("connect_timeout_ms must be > 0".into()));
        }
        if self.read_timeout_ms == 0 {
            return Err(Error::Config("read_timeout_ms must be > 0".into()));
        }
        if !(self.memory_fraction > 0.0 && self.memory_fraction <= 1.0) {
            return Err(Error::Config(
                "memory_fraction must be in (0.0, 1.0]".into(),
            ));
        }
        if self.preload_concurrency == 0 {
            return Err(Error::Config("preload_concurrency must be >= 1".into()));
        }
        if self.maintenance_interval_secs == Some(0) {
            return Err(Error::Config(
                "maintenance_interval_secs must be > 0 when set".into(),
            ));
        }
        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::Config("cache_dir must not be empty".into()));
        }
        Ok(())
    }

    /// Origin timeouts
    pub fn timeouts(&self) -> FetchTimeouts {
        FetchTimeouts {
            connect: Duration::from_millis(self.connect_timeout_ms),
            read: Duration::from_millis(self.read_timeout_ms),
        }
    }

    /// Decode target dimensions
    pub fn target_dimensions(&self) -> Dimensions {
        Dimensions::new(self.target_width, self.target_height)
    }

    /// Memory tier budget
    pub fn memory_budget(&self) -> MemoryBudget {
        MemoryBudget {
            configured_bytes: self.memory_budget_bytes,
            max_fraction: self.memory_fraction,
        }
    }

    /// Disk tier retention policy
    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_age: Duration::from_secs(self.max_entry_age_secs),
            max_total_bytes: self.disk_budget_bytes,
        }
    }

    /// Background maintenance period
    pub fn maintenance_interval(&self) -> Option<Duration> {
        self.maintenance_interval_secs.map(Duration::from_secs)
    }
}

fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join("blobtier")
}

fn default_memory_budget() -> u64 {
    DEFAULT_MEMORY_BUDGET
}

fn default_memory_fraction() -> f64 {
    0.25
}

fn default_disk_budget() -> u64 {
    DEFAULT_DISK_BUDGET
}

fn default_max_entry_age() -> u64 {
    DEFAULT_MAX_ENTRY_AGE.as_secs()
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_read_timeout() -> u64 {
    15_000
}

fn default_target_width() -> u32 {
    1080
}

fn default_target_height() -> u32 {
    1920
}

fn default_preload_concurrency() -> usize {
    4
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.memory_budget_bytes, 32 * 1024 * 1024);
        assert_eq!(config.disk_budget_bytes, 100 * 1024 * 1024);
        assert_eq!(config.max_entry_age_secs, 7 * 24 * 3600);
        assert_eq!(config.timeouts().total(), Duration::from_secs(25));
        assert_eq!(config.target_dimensions(), Dimensions::new(1080, 1920));
        assert_eq!(config.maintenance_interval(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: CacheConfig = serde_yaml::from_str(
            "cache_dir: /tmp/images\nmemoryBudgetBytes: 1024\nmaintenance_interval_secs: 60\n",
        )
        .unwrap();

        assert_eq!(config.cache_dir, PathBuf::from("/tmp/images"));
        assert_eq!(config.memory_budget_bytes, 1024);
        assert_eq!(config.read_timeout_ms, 15_000);
        assert_eq!(config.maintenance_interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: std::result::Result<CacheConfig, _> =
            serde_yaml::from_str("cache_dir: /tmp\nmemory_budget: 10\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let config = CacheConfig {
            read_timeout_ms: 0,
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Config(msg)) if msg.contains("read_timeout_ms"));

        let config = CacheConfig {
            connect_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_fraction() {
        for fraction in [0.0, -0.5, 1.5, f64::NAN] {
            let config = CacheConfig {
                memory_fraction: fraction,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "fraction {} accepted", fraction);
        }

        let config = CacheConfig {
            memory_fraction: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency_and_interval() {
        let config = CacheConfig {
            preload_concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CacheConfig {
            maintenance_interval_secs: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cache_dir: /srv/cache").unwrap();
        writeln!(file, "disk_budget_bytes: 2048").unwrap();
        writeln!(file, "max_entry_age_secs: 3600").unwrap();

        let config = CacheConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(
            config.retention_policy(),
            RetentionPolicy {
                max_age: Duration::from_secs(3600),
                max_total_bytes: 2048,
            }
        );
    }

    #[test]
    fn test_from_yaml_file_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cache_dir: [unterminated").unwrap();

        let result = CacheConfig::from_yaml_file(file.path());
        assert_matches!(result, Err(Error::ConfigParse { .. }));
    }

    #[test]
    fn test_from_yaml_file_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "preload_concurrency: 0").unwrap();

        let result = CacheConfig::from_yaml_file(file.path());
        assert_matches!(result, Err(Error::Config(_)));
    }

    #[test]
    fn test_yaml_roundtrip_preserves_values() {
        let config = CacheConfig {
            min_size_to_cache: 512,
            maintenance_interval_secs: Some(900),
            ..CacheConfig::with_cache_dir("/data/cache")
        };
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: CacheConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }
}
