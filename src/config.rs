//! Configuration management for the hypercube
//!
//! All configurable parameters in one place with environment variable overrides.
//! Sensible defaults, each overridable with a `HYPERCUBE_*` variable.

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::constants::{
    DEFAULT_ARCHIVE_KEEP, DEFAULT_CARE_RATE, DEFAULT_CYCLE_INTERVAL_SECS,
    DEFAULT_GENERATION_THRESHOLD, DEFAULT_MAX_ASSOCIATIONS, DEFAULT_QUERY_SLA_MS,
    DEFAULT_TOP_TAGS,
};
use crate::memory::LoopConfig;
use crate::store::StoreConfig;

/// Process-wide configuration
#[derive(Debug, Clone)]
pub struct HypercubeConfig {
    /// CARE redistribution rate (0.0 - 1.0)
    pub care_rate: f64,

    /// Soft query latency budget in milliseconds
    pub query_sla_ms: u64,

    /// TRANSFER entries between generation snapshots
    pub generation_threshold: u64,

    /// Associations computed per memory during ENCODE
    pub max_associations: usize,

    /// Working snapshot file loaded and saved by the CLI
    pub snapshot_path: PathBuf,

    /// Directory of archived snapshots
    pub archive_dir: PathBuf,

    /// Archived snapshots kept when purging
    pub archive_keep: usize,

    /// Seconds between cycles in the CLI `run` loop
    pub cycle_interval_secs: u64,
}

impl Default for HypercubeConfig {
    fn default() -> Self {
        Self {
            care_rate: DEFAULT_CARE_RATE,
            query_sla_ms: DEFAULT_QUERY_SLA_MS,
            generation_threshold: DEFAULT_GENERATION_THRESHOLD,
            max_associations: DEFAULT_MAX_ASSOCIATIONS,
            snapshot_path: PathBuf::from("./hypercube_snapshot.json"),
            archive_dir: PathBuf::from("./hypercube_archive"),
            archive_keep: DEFAULT_ARCHIVE_KEEP,
            cycle_interval_secs: DEFAULT_CYCLE_INTERVAL_SECS,
        }
    }
}

impl HypercubeConfig {
    /// Load configuration from environment variables.
    ///
    /// Unparseable values are ignored and the default kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("HYPERCUBE_CARE_RATE") {
            if let Ok(n) = val.parse::<f64>() {
                if n.is_finite() {
                    config.care_rate = n.clamp(0.0, 1.0);
                }
            }
        }

        if let Ok(val) = env::var("HYPERCUBE_QUERY_SLA_MS") {
            if let Ok(n) = val.parse() {
                config.query_sla_ms = n;
            }
        }

        if let Ok(val) = env::var("HYPERCUBE_GENERATION_THRESHOLD") {
            if let Ok(n) = val.parse::<u64>() {
                config.generation_threshold = n.max(1);
            }
        }

        if let Ok(val) = env::var("HYPERCUBE_MAX_ASSOCIATIONS") {
            if let Ok(n) = val.parse() {
                config.max_associations = n;
            }
        }

        if let Ok(path) = env::var("HYPERCUBE_SNAPSHOT_PATH") {
            config.snapshot_path = PathBuf::from(path);
        }

        if let Ok(path) = env::var("HYPERCUBE_ARCHIVE_DIR") {
            config.archive_dir = PathBuf::from(path);
        }

        if let Ok(val) = env::var("HYPERCUBE_ARCHIVE_KEEP") {
            if let Ok(n) = val.parse::<usize>() {
                config.archive_keep = n.max(1);
            }
        }

        if let Ok(val) = env::var("HYPERCUBE_CYCLE_INTERVAL") {
            if let Ok(n) = val.parse() {
                config.cycle_interval_secs = n;
            }
        }

        config
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            care_rate: self.care_rate,
            query_sla: Duration::from_millis(self.query_sla_ms),
        }
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            generation_threshold: self.generation_threshold,
            max_associations: self.max_associations,
            top_tags: DEFAULT_TOP_TAGS,
        }
    }

    /// Log the current configuration
    pub fn log(&self) {
        info!("Configuration:");
        info!("   CARE rate: {:.2}", self.care_rate);
        info!("   Query SLA: {}ms", self.query_sla_ms);
        info!(
            "   Generation threshold: {} (max associations: {})",
            self.generation_threshold, self.max_associations
        );
        info!("   Snapshot: {:?}", self.snapshot_path);
        info!(
            "   Archive: {:?} (keep {})",
            self.archive_dir, self.archive_keep
        );
        info!("   Cycle interval: {}s", self.cycle_interval_secs);
    }
}

/// Environment variable documentation
pub fn print_env_help() {
    println!("Hypercube Configuration Environment Variables:");
    println!();
    println!("  HYPERCUBE_CARE_RATE            - CARE redistribution rate 0.0-1.0 (default: 0.15)");
    println!("  HYPERCUBE_QUERY_SLA_MS         - Query latency budget in ms, logged only (default: 9000)");
    println!("  HYPERCUBE_GENERATION_THRESHOLD - TRANSFER entries per generation snapshot (default: 10)");
    println!("  HYPERCUBE_MAX_ASSOCIATIONS     - Associations per memory (default: 5)");
    println!();
    println!("Snapshot Configuration:");
    println!("  HYPERCUBE_SNAPSHOT_PATH        - Working snapshot file (default: ./hypercube_snapshot.json)");
    println!("  HYPERCUBE_ARCHIVE_DIR          - Snapshot archive directory (default: ./hypercube_archive)");
    println!("  HYPERCUBE_ARCHIVE_KEEP         - Archived snapshots to keep (default: 7)");
    println!();
    println!("  HYPERCUBE_CYCLE_INTERVAL       - Seconds between cycles for `run` (default: 9)");
    println!("  RUST_LOG                       - Log level (e.g., info, debug, trace)");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HypercubeConfig::default();
        assert_eq!(config.care_rate, 0.15);
        assert_eq!(config.query_sla_ms, 9_000);
        assert_eq!(config.generation_threshold, 10);
        assert_eq!(config.archive_keep, 7);
    }

    #[test]
    fn test_env_override() {
        env::set_var("HYPERCUBE_GENERATION_THRESHOLD", "0");
        env::set_var("HYPERCUBE_CARE_RATE", "3.5");
        env::set_var("HYPERCUBE_MAX_ASSOCIATIONS", "8");

        let config = HypercubeConfig::from_env();
        assert_eq!(config.generation_threshold, 1);
        assert_eq!(config.care_rate, 1.0);
        assert_eq!(config.max_associations, 8);

        env::remove_var("HYPERCUBE_GENERATION_THRESHOLD");
        env::remove_var("HYPERCUBE_CARE_RATE");
        env::remove_var("HYPERCUBE_MAX_ASSOCIATIONS");
    }

    #[test]
    fn test_component_configs() {
        let config = HypercubeConfig {
            query_sla_ms: 250,
            max_associations: 3,
            ..Default::default()
        };
        assert_eq!(config.store_config().query_sla, Duration::from_millis(250));
        assert_eq!(config.loop_config().max_associations, 3);
    }
}
