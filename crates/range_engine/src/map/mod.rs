//! # Map Scene Graph
//!
//! A map is a DAG of scenes. A geometry-scene holds [`Geometry`] members and
//! commits into one bottom-level index; an instance-scene holds [`Instance`]
//! members, each placing another scene under a transform, and commits into a
//! top-level index over the children's indices.
//!
//! ## Ownership
//!
//! - A scene owns its members (`Rc`).
//! - An instance owns the scene it references.
//! - A scene only observes the instances referencing it (`Weak`), and an
//!   instance only observes the scene it was added to.
//!
//! Dropping the outermost scene therefore releases the whole map, and no
//! reference cycle can form even though changes propagate upward on commit.
//!
//! ## Usage
//!
//! ```rust
//! use std::rc::Rc;
//! use range_engine::backend::{BuildBackend, HostBackend};
//! use range_engine::foundation::math::{Point3, Transform, Vec3};
//! use range_engine::map::{Geometry, Scene};
//!
//! let backend: Rc<dyn BuildBackend> = Rc::new(HostBackend::default());
//! let floor = Geometry::mesh(
//!     vec![
//!         Point3::new(-1.0, -1.0, 0.0),
//!         Point3::new(1.0, -1.0, 0.0),
//!         Point3::new(0.0, 1.0, 0.0),
//!     ],
//!     vec![0, 1, 2],
//! )?;
//!
//! let room = Scene::new_geometry(Rc::clone(&backend));
//! room.add(&floor)?;
//!
//! let world = Scene::new_instances(backend);
//! let placed = room.instantiate()?;
//! placed.set_transform(Transform::from_position(Vec3::new(0.0, 0.0, 2.0)))?;
//! world.add(&placed)?;
//!
//! let report = world.commit()?;
//! assert_eq!(world.depth(), 1);
//! assert!(report.depth_changed);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod commit;
mod error;
mod events;
mod geometry;
mod instance;
mod scene;

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;

pub use commit::{CommitReport, CommitState};
pub use error::{GeometryError, MapError};
pub use events::{ReceiverKey, SceneEventReceiver};
pub use geometry::{Geometry, Shape};
pub use instance::Instance;
pub use scene::{Member, Scene, SceneFlavor, SceneMember};

bitflags! {
    /// Shapes of traversal graph a dispatch must be prepared for
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct TraversalFlags: u32 {
        /// A lone geometry index without instancing
        const SINGLE_GEOMETRY_INDEX   = 1 << 0;
        /// One instance level above geometry indices
        const SINGLE_LEVEL_INSTANCING = 1 << 1;
        /// Arbitrary instancing depth
        const ANY_DEPTH               = 1 << 2;
    }
}

impl TraversalFlags {
    /// Flags describing a scene of the given instancing depth
    pub fn for_depth(depth: u32) -> Self {
        match depth {
            0 => Self::SINGLE_GEOMETRY_INDEX,
            1 => Self::SINGLE_LEVEL_INSTANCING,
            _ => Self::ANY_DEPTH,
        }
    }

    /// Whether any instancing is present
    pub fn has_instancing(self) -> bool {
        self.intersects(Self::SINGLE_LEVEL_INSTANCING | Self::ANY_DEPTH)
    }
}

bitflags! {
    /// Primitive kinds present in a scene, including everything instanced
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct PrimitiveFlags: u32 {
        /// Triangle meshes
        const TRIANGLES = 1 << 0;
        /// Sphere-approximated point sets
        const SPHERES   = 1 << 1;
    }
}

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity for scenes, geometries and instances
pub(crate) fn next_token() -> u64 {
    NEXT_TOKEN.fetch_add(1, Ordering::Relaxed)
}
