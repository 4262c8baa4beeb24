//! Abstract ray query interface over built indices
//!
//! Every backend produces indices behind [`SpatialIndex`]. A built index is
//! immutable, so it is shared as an [`IndexRef`] between the scene that owns
//! it, any enclosing scene that references it and the worker threads of a
//! range simulation.

use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

use crate::foundation::math::{Point3, Vec3};

use super::{Aabb, Ray};

/// Shared handle to a built index
pub type IndexRef = Arc<dyn SpatialIndex>;

/// Closest intersection reported by an index
#[derive(Debug, Clone, PartialEq)]
pub struct RayHit {
    /// Ray parameter of the hit; a distance for unit-length rays
    pub distance: f32,
    /// Hit point in the frame of the queried index
    pub point: Point3,
    /// Unit surface normal in the frame of the queried index
    pub normal: Vec3,
    /// Member id of the geometry inside its geometry-scene
    pub geometry_id: u32,
    /// Triangle or point index within the geometry
    pub primitive_id: u32,
    /// Member ids of the instances passed through, outermost first
    pub instance_ids: Vec<u32>,
}

/// Ray query interface implemented by every built index
pub trait SpatialIndex: Send + Sync + Debug {
    /// Bounds of everything indexed, in the index's own frame
    fn bounds(&self) -> Aabb;

    /// Closest hit with parameter in `(t_min, t_max]`
    fn intersect(&self, ray: &Ray, t_min: f32, t_max: f32) -> Option<RayHit>;

    /// Number of directly indexed entries (primitives, geometries or instances)
    fn entry_count(&self) -> usize;

    /// Downcast to Any for type-specific access (e.g. refitting a previous index)
    fn as_any(&self) -> &dyn Any;
}
