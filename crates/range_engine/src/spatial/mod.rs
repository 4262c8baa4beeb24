//! Spatial data structures for ray queries
//!
//! Bounding boxes, ray primitives and the bounding volume hierarchy the host
//! backend builds its indices from, plus the [`SpatialIndex`] interface all
//! built indices are queried through.

mod aabb;
mod bvh;
mod index;
mod primitives;

pub use aabb::Aabb;
pub use bvh::{Bvh, BvhNode, BvhSettings};
pub use index::{IndexRef, RayHit, SpatialIndex};
pub use primitives::{Ray, Sphere, SurfaceHit, Triangle};
