//! # Unified Configuration System
//!
//! Configuration structures for the index builders and the range simulator,
//! aggregated under [`EngineConfig`] so an application can keep everything
//! in one TOML or RON file.
//!
//! ```toml
//! log_level = "info"
//!
//! [build]
//! max_leaf_size = 4
//! prefer_refit = true
//!
//! [simulator]
//! worker_threads = 8
//! max_range = 120.0
//! ```

use serde::{Deserialize, Serialize};

pub use crate::config::{Config, ConfigError};

/// # Build Configuration
///
/// Parameters of the host backend's BVH builder and its dispatch-table
/// accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Maximum primitives stored in one BVH leaf
    pub max_leaf_size: usize,
    /// Maximum BVH depth; deeper subtrees become larger leaves
    pub max_depth: u32,
    /// Whether a refresh may refit an existing index instead of rebuilding it
    pub prefer_refit: bool,
    /// Dispatch-table records required by one triangle mesh
    pub records_per_mesh: u32,
    /// Dispatch-table records required by one point set
    pub records_per_points: u32,
}

impl BuildConfig {
    /// Create a build configuration with default values
    pub fn new() -> Self {
        Self {
            max_leaf_size: 4,
            max_depth: 48,
            prefer_refit: true,
            records_per_mesh: 1,
            records_per_points: 1,
        }
    }

    /// Set the maximum leaf size
    pub fn with_max_leaf_size(mut self, size: usize) -> Self {
        self.max_leaf_size = size;
        self
    }

    /// Enable or disable refitting on refresh
    pub fn with_refit(mut self, enabled: bool) -> Self {
        self.prefer_refit = enabled;
        self
    }

    /// Set per-geometry dispatch records for meshes and point sets
    pub fn with_records(mut self, per_mesh: u32, per_points: u32) -> Self {
        self.records_per_mesh = per_mesh;
        self.records_per_points = per_points;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_leaf_size == 0 {
            return Err(ConfigError::Invalid("max_leaf_size must be at least 1".to_string()));
        }
        if self.max_depth == 0 {
            return Err(ConfigError::Invalid("max_depth must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// # Simulator Configuration
///
/// Batch ray casting behavior of the range simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Worker threads used for one batch; `0` means one per available core
    pub worker_threads: usize,
    /// Hits closer than this are reported as misses
    pub min_range: f32,
    /// Rays are not traced beyond this distance
    pub max_range: f32,
}

impl SimulatorConfig {
    /// Create a simulator configuration with default values
    pub fn new() -> Self {
        Self {
            worker_threads: 0,
            min_range: 0.0,
            max_range: 100.0,
        }
    }

    /// Set the number of worker threads
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Set the valid range interval
    pub fn with_range(mut self, min_range: f32, max_range: f32) -> Self {
        self.min_range = min_range;
        self.max_range = max_range;
        self
    }

    /// Worker count after resolving `0` against the machine
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            return self.worker_threads;
        }
        std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.min_range >= 0.0 && self.min_range < self.max_range) {
            return Err(ConfigError::Invalid(format!(
                "range interval [{}, {}] is empty or negative",
                self.min_range, self.max_range
            )));
        }
        Ok(())
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// # Engine Configuration
///
/// Top-level configuration that encompasses all subsystems. This is the main
/// configuration structure applications should load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Log filter used when the application initializes logging
    pub log_level: String,
    /// Index builder configuration
    pub build: BuildConfig,
    /// Range simulator configuration
    pub simulator: SimulatorConfig,
}

impl EngineConfig {
    /// Create a new engine configuration with defaults
    pub fn new() -> Self {
        Self {
            log_level: "info".to_string(),
            build: BuildConfig::default(),
            simulator: SimulatorConfig::default(),
        }
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.build.validate()?;
        self.simulator.validate()?;
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl Config for EngineConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [build]
            max_leaf_size = 8

            [simulator]
            max_range = 30.0
            "#,
        )
        .unwrap();

        assert_eq!(config.build.max_leaf_size, 8);
        assert!(config.build.prefer_refit);
        assert_eq!(config.simulator.max_range, 30.0);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let build = BuildConfig::new().with_max_leaf_size(0);
        assert!(matches!(build.validate(), Err(ConfigError::Invalid(_))));

        let sim = SimulatorConfig::new().with_range(5.0, 1.0);
        assert!(matches!(sim.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_save_and_load_ron() {
        let path = std::env::temp_dir().join(format!("range_engine_cfg_{}.ron", std::process::id()));
        let mut config = EngineConfig::default();
        config.simulator.worker_threads = 3;

        config.save_to_file(&path).unwrap();
        let loaded = EngineConfig::load_from_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let result = EngineConfig::default().save_to_file("config.yaml");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }
}
