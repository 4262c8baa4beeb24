//! Brute-force reference backend
//!
//! Tests every primitive of every geometry for each ray. It cannot build
//! instance indices, so scenes using it stay single-level.

use std::any::Any;
use std::sync::Arc;

use log::debug;

use crate::map::Shape;
use crate::spatial::{Aabb, IndexRef, Ray, RayHit, SpatialIndex, SurfaceHit};

use super::{
    check_finite, BottomLevelOutput, BuildBackend, BuildError, BuildMode, BuildResult,
    GeometryInput, InstanceInput,
};

/// Index that keeps shape snapshots and scans them linearly
#[derive(Debug, Clone)]
pub struct LinearIndex {
    members: Vec<(u32, Arc<Shape>)>,
    bounds: Aabb,
}

impl LinearIndex {
    fn new(members: Vec<(u32, Arc<Shape>)>) -> Self {
        let bounds = members
            .iter()
            .fold(Aabb::empty(), |acc, (_, shape)| acc.union(&shape.bounds()));
        Self { members, bounds }
    }

    fn closest_in(shape: &Shape, ray: &Ray, t_min: f32, t_max: f32) -> Option<(u32, SurfaceHit)> {
        let mut closest = t_max;
        let mut best = None;
        for primitive in 0..shape.primitive_count() {
            let hit = match shape {
                Shape::Mesh { .. } => shape
                    .triangle(primitive)
                    .and_then(|t| t.intersect_ray(ray, t_min, closest)),
                Shape::Points { .. } => shape
                    .sphere(primitive)
                    .and_then(|s| s.intersect_ray(ray, t_min, closest)),
            };
            if let Some(hit) = hit {
                closest = hit.t;
                best = Some((primitive as u32, hit));
            }
        }
        best
    }
}

impl SpatialIndex for LinearIndex {
    fn bounds(&self) -> Aabb {
        self.bounds
    }

    fn intersect(&self, ray: &Ray, t_min: f32, t_max: f32) -> Option<RayHit> {
        let mut best: Option<RayHit> = None;
        for (member_id, shape) in &self.members {
            let closest = best.as_ref().map_or(t_max, |hit| hit.distance);
            if let Some((primitive_id, hit)) = Self::closest_in(shape, ray, t_min, closest) {
                best = Some(RayHit {
                    distance: hit.t,
                    point: ray.point_at(hit.t),
                    normal: hit.normal,
                    geometry_id: *member_id,
                    primitive_id,
                    instance_ids: Vec::new(),
                });
            }
        }
        best
    }

    fn entry_count(&self) -> usize {
        self.members.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Reference backend without acceleration structures or instancing
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearBackend;

impl LinearBackend {
    /// Create the backend
    pub fn new() -> Self {
        Self
    }
}

impl BuildBackend for LinearBackend {
    fn name(&self) -> &str {
        "linear"
    }

    fn supports_hierarchy(&self) -> bool {
        false
    }

    fn build_bottom_level(
        &self,
        mode: BuildMode,
        geometries: &[GeometryInput],
        _previous: Option<&IndexRef>,
    ) -> BuildResult<BottomLevelOutput> {
        let mut local_indices: Vec<IndexRef> = Vec::with_capacity(geometries.len());
        for input in geometries {
            check_finite(input)?;
            local_indices.push(Arc::new(LinearIndex::new(vec![(0, Arc::clone(&input.shape))])));
        }
        debug!("linear build: {} geometries, {:?}", geometries.len(), mode);

        let members = geometries
            .iter()
            .map(|input| (input.member_id, Arc::clone(&input.shape)))
            .collect();
        Ok(BottomLevelOutput {
            index: Arc::new(LinearIndex::new(members)),
            local_indices,
        })
    }

    fn build_top_level(
        &self,
        _mode: BuildMode,
        _instances: &[InstanceInput],
        _previous: Option<&IndexRef>,
    ) -> BuildResult<IndexRef> {
        Err(BuildError::Unsupported {
            backend: self.name().to_string(),
            operation: "instance indices".to_string(),
        })
    }
}
