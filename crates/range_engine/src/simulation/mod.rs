//! # Range Simulation
//!
//! Consumes a committed map: casts sensor ray patterns from batches of poses
//! and tracks the dispatch layout a pipeline over the map would need.
//!
//! Sensor models stay outside the crate; a pattern is simply a list of ray
//! directions in the sensor frame.
//!
//! ```rust
//! use std::rc::Rc;
//! use range_engine::backend::{BuildBackend, HostBackend};
//! use range_engine::core::SimulatorConfig;
//! use range_engine::foundation::math::{Point3, Transform, Vec3};
//! use range_engine::map::{Geometry, Scene};
//! use range_engine::simulation::RangeSimulator;
//!
//! let backend: Rc<dyn BuildBackend> = Rc::new(HostBackend::default());
//! let ground = Geometry::mesh(
//!     vec![
//!         Point3::new(-5.0, -5.0, 0.0),
//!         Point3::new(5.0, -5.0, 0.0),
//!         Point3::new(0.0, 5.0, 0.0),
//!     ],
//!     vec![0, 1, 2],
//! )?;
//! let map = Scene::new_geometry(backend);
//! map.add(&ground)?;
//! map.commit()?;
//!
//! let mut simulator = RangeSimulator::new(SimulatorConfig::default())?;
//! simulator.set_map(map);
//! let pose = Transform::from_position(Vec3::new(0.3, 0.2, 2.0));
//! let ranges = simulator.simulate(&[pose], &[-Vec3::z()])?;
//! assert!((ranges.as_slice()[0] - 2.0).abs() < 1e-4);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod layout;
mod simulator;

pub use layout::{LayoutCache, PipelineLayout};
pub use simulator::{RangeSimulator, Ranges};

use crate::config::ConfigError;
use crate::map::MapError;

/// Range simulation errors
#[derive(thiserror::Error, Debug)]
pub enum SimulationError {
    /// No map was set
    #[error("No map set")]
    NoMap,

    /// The map has uncommitted changes
    #[error("Scene {0} has no valid index, commit it first")]
    NotCommitted(u64),

    /// The ray pattern has no directions
    #[error("Sensor pattern is empty")]
    EmptyPattern,

    /// A pattern direction is zero or not finite
    #[error("Pattern direction {0} is zero or not finite")]
    InvalidDirection(usize),

    /// Committing the map failed
    #[error("Map error: {0}")]
    Map(#[from] MapError),

    /// Invalid simulator configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
