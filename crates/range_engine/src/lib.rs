//! # Range Engine
//!
//! A scene graph for simulating range sensors against polygonal maps.
//!
//! ## Features
//!
//! - **Two-level maps**: geometry-scenes of meshes and point sets, and
//!   instance-scenes placing other scenes under transforms, nested to any depth
//! - **Explicit commits**: changes accumulate until a commit rebuilds or
//!   refits the affected indices and re-commits every scene above
//! - **Pluggable builders**: a BVH host backend and a brute-force reference
//! - **Batch simulation**: ray patterns cast from many poses on scoped worker
//!   threads against immutable, shareable indices
//!
//! ## Quick Start
//!
//! ```rust
//! use std::rc::Rc;
//! use range_engine::prelude::*;
//!
//! let backend: Rc<dyn BuildBackend> = Rc::new(HostBackend::new(BuildConfig::default()));
//! let post = Geometry::points(vec![Point3::new(0.0, 0.0, 1.0)], 0.5)?;
//!
//! let props = Scene::new_geometry(Rc::clone(&backend));
//! props.add(&post)?;
//!
//! let world = Scene::new_instances(backend);
//! for x in [-4.0, 0.0, 4.0] {
//!     let placed = props.instantiate()?;
//!     placed.set_transform(Transform::from_position(Vec3::new(x, 0.0, 0.0)))?;
//!     world.add(&placed)?;
//! }
//! world.commit()?;
//!
//! let mut simulator = RangeSimulator::new(SimulatorConfig::default())?;
//! simulator.set_map(world);
//! let pose = Transform::from_position(Vec3::new(-10.0, 0.0, 1.0));
//! let ranges = simulator.simulate(&[pose], &[Vec3::x()])?;
//! assert!((ranges.as_slice()[0] - 5.5).abs() < 1e-3);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

// Shared configuration
pub mod core;

pub mod foundation;
pub mod config;
pub mod spatial;
pub mod backend;
pub mod map;
pub mod simulation;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        backend::{BuildBackend, HostBackend, LinearBackend},
        core::config::{BuildConfig, Config, EngineConfig, SimulatorConfig},
        foundation::math::{Point3, Quat, Transform, Vec3},
        map::{
            CommitReport, Geometry, Instance, MapError, Scene, SceneEventReceiver, SceneFlavor,
            Shape,
        },
        simulation::{RangeSimulator, Ranges, SimulationError},
        spatial::{Ray, RayHit, SpatialIndex},
    };
}
