//! Host backend: bounding volume hierarchies built on the CPU
//!
//! Three index types make up a map:
//! - [`LocalIndex`] over the triangles or spheres of one geometry,
//!   cached on the geometry and shared by every scene containing it
//! - [`GeometrySetIndex`] over the local indices of a geometry-scene
//! - [`InstanceSetIndex`] over the placed child indices of an instance-scene

use std::any::Any;
use std::sync::Arc;

use log::{debug, info};

use crate::core::config::BuildConfig;
use crate::foundation::math::{utils, Mat4};
use crate::map::Shape;
use crate::spatial::{
    Aabb, Bvh, BvhSettings, IndexRef, Ray, RayHit, SpatialIndex, Sphere, SurfaceHit, Triangle,
};

use super::{
    check_finite, BottomLevelOutput, BuildBackend, BuildError, BuildMode, BuildResult,
    GeometryInput, InstanceInput,
};

#[derive(Debug, Clone)]
enum Primitives {
    Triangles(Vec<Triangle>),
    Spheres(Vec<Sphere>),
}

impl Primitives {
    fn from_shape(shape: &Shape) -> Self {
        match shape {
            Shape::Mesh { .. } => Self::Triangles(
                (0..shape.primitive_count()).filter_map(|i| shape.triangle(i)).collect(),
            ),
            Shape::Points { .. } => Self::Spheres(
                (0..shape.primitive_count()).filter_map(|i| shape.sphere(i)).collect(),
            ),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Triangles(t) => t.len(),
            Self::Spheres(s) => s.len(),
        }
    }

    fn bounds(&self) -> Vec<Aabb> {
        match self {
            Self::Triangles(t) => t.iter().map(Triangle::bounds).collect(),
            Self::Spheres(s) => s.iter().map(Sphere::bounds).collect(),
        }
    }

    fn same_layout(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (Self::Triangles(_), Self::Triangles(_)) | (Self::Spheres(_), Self::Spheres(_))
        ) && self.len() == other.len()
    }

    fn intersect(&self, index: usize, ray: &Ray, t_min: f32, t_max: f32) -> Option<SurfaceHit> {
        match self {
            Self::Triangles(t) => t[index].intersect_ray(ray, t_min, t_max),
            Self::Spheres(s) => s[index].intersect_ray(ray, t_min, t_max),
        }
    }
}

/// Index over the primitives of one geometry
#[derive(Debug, Clone)]
pub struct LocalIndex {
    primitives: Primitives,
    bvh: Bvh,
}

impl LocalIndex {
    /// Build from scratch
    pub fn build(shape: &Shape, settings: BvhSettings) -> Self {
        let primitives = Primitives::from_shape(shape);
        let bvh = Bvh::build(&primitives.bounds(), settings);
        Self { primitives, bvh }
    }

    /// Copy of this index refitted to a moved shape
    ///
    /// Returns `None` when the shape no longer matches the indexed layout.
    pub fn refit(&self, shape: &Shape) -> Option<Self> {
        let primitives = Primitives::from_shape(shape);
        if !primitives.same_layout(&self.primitives) {
            return None;
        }
        let mut bvh = self.bvh.clone();
        bvh.refit(&primitives.bounds());
        Some(Self { primitives, bvh })
    }

    /// Underlying hierarchy
    pub fn bvh(&self) -> &Bvh {
        &self.bvh
    }
}

impl SpatialIndex for LocalIndex {
    fn bounds(&self) -> Aabb {
        self.bvh.bounds()
    }

    fn intersect(&self, ray: &Ray, t_min: f32, t_max: f32) -> Option<RayHit> {
        let mut best: Option<(u32, SurfaceHit)> = None;
        self.bvh.closest_hit(ray, t_min, t_max, |primitive, closest| {
            let hit = self.primitives.intersect(primitive as usize, ray, t_min, closest)?;
            best = Some((primitive, hit));
            Some(hit.t)
        });

        best.map(|(primitive_id, hit)| RayHit {
            distance: hit.t,
            point: ray.point_at(hit.t),
            normal: hit.normal,
            geometry_id: 0,
            primitive_id,
            instance_ids: Vec::new(),
        })
    }

    fn entry_count(&self) -> usize {
        self.primitives.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Reuse `previous`'s shape if it indexes the same entries, else build
fn hierarchy_for(previous: Option<&Bvh>, bounds: &[Aabb], settings: BvhSettings) -> Bvh {
    match previous {
        Some(bvh) if bvh.primitive_count() == bounds.len() => {
            let mut refitted = bvh.clone();
            refitted.refit(bounds);
            refitted
        }
        _ => Bvh::build(bounds, settings),
    }
}

/// Index over the geometries of a geometry-scene
#[derive(Debug, Clone)]
pub struct GeometrySetIndex {
    members: Vec<(u32, IndexRef)>,
    bvh: Bvh,
}

impl GeometrySetIndex {
    fn new(members: Vec<(u32, IndexRef)>, previous: Option<&Self>, settings: BvhSettings) -> Self {
        let bounds: Vec<Aabb> = members.iter().map(|(_, index)| index.bounds()).collect();
        let reusable = previous
            .filter(|p| p.member_ids().eq(members.iter().map(|(id, _)| *id)))
            .map(|p| &p.bvh);
        let bvh = hierarchy_for(reusable, &bounds, settings);
        Self { members, bvh }
    }

    /// Member ids of the indexed geometries
    pub fn member_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.members.iter().map(|(id, _)| *id)
    }
}

impl SpatialIndex for GeometrySetIndex {
    fn bounds(&self) -> Aabb {
        self.bvh.bounds()
    }

    fn intersect(&self, ray: &Ray, t_min: f32, t_max: f32) -> Option<RayHit> {
        let mut best: Option<RayHit> = None;
        self.bvh.closest_hit(ray, t_min, t_max, |entry, closest| {
            let (member_id, index) = &self.members[entry as usize];
            let mut hit = index.intersect(ray, t_min, closest)?;
            hit.geometry_id = *member_id;
            let t = hit.distance;
            best = Some(hit);
            Some(t)
        });
        best
    }

    fn entry_count(&self) -> usize {
        self.members.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone)]
struct PlacedInstance {
    member_id: u32,
    to_world: Mat4,
    to_local: Mat4,
    child: IndexRef,
}

/// Index over the instances of an instance-scene
#[derive(Debug, Clone)]
pub struct InstanceSetIndex {
    instances: Vec<PlacedInstance>,
    bvh: Bvh,
}

impl InstanceSetIndex {
    fn new(instances: Vec<PlacedInstance>, previous: Option<&Self>, settings: BvhSettings) -> Self {
        let bounds: Vec<Aabb> = instances
            .iter()
            .map(|i| i.child.bounds().transformed(&i.to_world))
            .collect();
        let reusable = previous
            .filter(|p| p.member_ids().eq(instances.iter().map(|i| i.member_id)))
            .map(|p| &p.bvh);
        let bvh = hierarchy_for(reusable, &bounds, settings);
        Self { instances, bvh }
    }

    /// Member ids of the indexed instances
    pub fn member_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.instances.iter().map(|i| i.member_id)
    }
}

impl SpatialIndex for InstanceSetIndex {
    fn bounds(&self) -> Aabb {
        self.bvh.bounds()
    }

    fn intersect(&self, ray: &Ray, t_min: f32, t_max: f32) -> Option<RayHit> {
        let mut best: Option<RayHit> = None;
        self.bvh.closest_hit(ray, t_min, t_max, |entry, closest| {
            let placed = &self.instances[entry as usize];
            // The local ray keeps the world parameterization
            let local_ray = ray.transformed(&placed.to_local);
            let mut hit = placed.child.intersect(&local_ray, t_min, closest)?;
            hit.point = placed.to_world.transform_point(&hit.point);
            hit.normal = utils::normal_to_world(&placed.to_local, &hit.normal);
            hit.instance_ids.insert(0, placed.member_id);
            let t = hit.distance;
            best = Some(hit);
            Some(t)
        });
        best
    }

    fn entry_count(&self) -> usize {
        self.instances.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Multi-core host backend building bounding volume hierarchies
#[derive(Debug, Clone, Default)]
pub struct HostBackend {
    config: BuildConfig,
}

impl HostBackend {
    /// Create a backend with the given build parameters
    pub fn new(config: BuildConfig) -> Self {
        info!(
            "host backend: leaf size {}, max depth {}, refit {}",
            config.max_leaf_size, config.max_depth, config.prefer_refit
        );
        Self { config }
    }

    /// Build parameters
    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    fn settings(&self) -> BvhSettings {
        BvhSettings {
            max_leaf_size: self.config.max_leaf_size,
            max_depth: self.config.max_depth,
        }
    }

    fn refit_allowed(&self, mode: BuildMode) -> bool {
        mode == BuildMode::Refresh && self.config.prefer_refit
    }

    fn local_index(&self, input: &GeometryInput, refit: bool) -> IndexRef {
        match &input.cached {
            Some((version, index)) if *version == input.version => Arc::clone(index),
            Some((_, index)) if refit => index
                .as_any()
                .downcast_ref::<LocalIndex>()
                .and_then(|local| local.refit(&input.shape))
                .map_or_else(
                    || Arc::new(LocalIndex::build(&input.shape, self.settings())) as IndexRef,
                    |local| Arc::new(local) as IndexRef,
                ),
            _ => Arc::new(LocalIndex::build(&input.shape, self.settings())),
        }
    }
}

impl BuildBackend for HostBackend {
    fn name(&self) -> &str {
        "host"
    }

    fn supports_hierarchy(&self) -> bool {
        true
    }

    fn dispatch_records(&self, shape: &Shape) -> u32 {
        match shape {
            Shape::Mesh { .. } => self.config.records_per_mesh,
            Shape::Points { .. } => self.config.records_per_points,
        }
    }

    fn build_bottom_level(
        &self,
        mode: BuildMode,
        geometries: &[GeometryInput],
        previous: Option<&IndexRef>,
    ) -> BuildResult<BottomLevelOutput> {
        let refit = self.refit_allowed(mode);
        let mut local_indices = Vec::with_capacity(geometries.len());
        for input in geometries {
            check_finite(input)?;
            local_indices.push(self.local_index(input, refit));
        }

        let members: Vec<(u32, IndexRef)> = geometries
            .iter()
            .zip(&local_indices)
            .filter(|(_, index)| !index.bounds().is_empty())
            .map(|(input, index)| (input.member_id, Arc::clone(index)))
            .collect();

        let previous = previous
            .filter(|_| refit)
            .and_then(|p| p.as_any().downcast_ref::<GeometrySetIndex>());
        debug!(
            "host bottom-level build: {} geometries, {:?}, refit {}",
            members.len(),
            mode,
            previous.is_some()
        );

        let index = GeometrySetIndex::new(members, previous, self.settings());
        Ok(BottomLevelOutput {
            index: Arc::new(index),
            local_indices,
        })
    }

    fn build_top_level(
        &self,
        mode: BuildMode,
        instances: &[InstanceInput],
        previous: Option<&IndexRef>,
    ) -> BuildResult<IndexRef> {
        let mut placed = Vec::with_capacity(instances.len());
        for input in instances {
            if !input.transform.is_invertible() {
                return Err(BuildError::DegenerateInput(format!(
                    "instance {} has a non-invertible transform",
                    input.member_id
                )));
            }
            if input.child.bounds().is_empty() {
                continue;
            }
            placed.push(PlacedInstance {
                member_id: input.member_id,
                to_world: input.transform.to_matrix(),
                to_local: input.transform.inverse_matrix(),
                child: Arc::clone(&input.child),
            });
        }

        let previous = previous
            .filter(|_| self.refit_allowed(mode))
            .and_then(|p| p.as_any().downcast_ref::<InstanceSetIndex>());
        debug!(
            "host top-level build: {} instances, {:?}, refit {}",
            placed.len(),
            mode,
            previous.is_some()
        );

        Ok(Arc::new(InstanceSetIndex::new(placed, previous, self.settings())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{Point3, Transform, Vec3};
    use approx::assert_relative_eq;

    fn floor(z: f32) -> Arc<Shape> {
        Arc::new(Shape::Mesh {
            vertices: vec![
                Point3::new(-10.0, -10.0, z),
                Point3::new(10.0, -10.0, z),
                Point3::new(10.0, 10.0, z),
                Point3::new(-10.0, 10.0, z),
            ],
            indices: vec![0, 1, 2, 0, 2, 3],
        })
    }

    fn input(member_id: u32, shape: Arc<Shape>, version: u64) -> GeometryInput {
        GeometryInput {
            member_id,
            shape,
            version,
            cached: None,
        }
    }

    fn down_from(x: f32, y: f32) -> Ray {
        Ray::new(Point3::new(x, y, 50.0), -Vec3::z())
    }

    #[test]
    fn test_bottom_level_reports_geometry_and_primitive() {
        let backend = HostBackend::default();
        let points = Arc::new(Shape::Points {
            points: vec![Point3::new(3.0, 3.0, 5.0)],
            radius: 0.5,
        });
        let output = backend
            .build_bottom_level(
                BuildMode::Rebuild,
                &[input(0, floor(0.0), 0), input(4, points, 0)],
                None,
            )
            .unwrap();

        assert_eq!(output.local_indices.len(), 2);
        assert_eq!(output.index.entry_count(), 2);

        let hit = output.index.intersect(&down_from(3.0, 3.0), 0.0, f32::INFINITY).unwrap();
        assert_eq!(hit.geometry_id, 4);
        assert_relative_eq!(hit.distance, 44.5, epsilon = 1e-4);

        let hit = output.index.intersect(&down_from(-3.0, 3.0), 0.0, f32::INFINITY).unwrap();
        assert_eq!(hit.geometry_id, 0);
        assert_relative_eq!(hit.distance, 50.0, epsilon = 1e-4);
        assert!(hit.primitive_id < 2);
    }

    #[test]
    fn test_current_cache_is_reused() {
        let backend = HostBackend::default();
        let first = backend
            .build_bottom_level(BuildMode::Rebuild, &[input(0, floor(0.0), 3)], None)
            .unwrap();

        let mut again = input(0, floor(0.0), 3);
        again.cached = Some((3, Arc::clone(&first.local_indices[0])));
        let second = backend.build_bottom_level(BuildMode::Rebuild, &[again], None).unwrap();

        assert!(Arc::ptr_eq(&first.local_indices[0], &second.local_indices[0]));
    }

    #[test]
    fn test_refresh_refits_moved_geometry() {
        let backend = HostBackend::new(BuildConfig::default().with_max_leaf_size(1));
        let first = backend
            .build_bottom_level(BuildMode::Rebuild, &[input(0, floor(0.0), 0)], None)
            .unwrap();

        let mut moved = input(0, floor(5.0), 1);
        moved.cached = Some((0, Arc::clone(&first.local_indices[0])));
        let second = backend
            .build_bottom_level(BuildMode::Refresh, &[moved], Some(&first.index))
            .unwrap();

        let hit = second.index.intersect(&down_from(1.0, 1.0), 0.0, f32::INFINITY).unwrap();
        assert_relative_eq!(hit.distance, 45.0, epsilon = 1e-4);

        // The previous index is untouched
        let old = first.index.intersect(&down_from(1.0, 1.0), 0.0, f32::INFINITY).unwrap();
        assert_relative_eq!(old.distance, 50.0, epsilon = 1e-4);

        let local = second.local_indices[0].as_any().downcast_ref::<LocalIndex>().unwrap();
        let original = first.local_indices[0].as_any().downcast_ref::<LocalIndex>().unwrap();
        assert_eq!(local.bvh().node_count(), original.bvh().node_count());
    }

    #[test]
    fn test_non_finite_vertices_fail() {
        let backend = HostBackend::default();
        let result = backend.build_bottom_level(BuildMode::Rebuild, &[input(0, floor(f32::NAN), 0)], None);
        assert!(matches!(result, Err(BuildError::DegenerateInput(_))));
    }

    #[test]
    fn test_top_level_places_children() {
        let backend = HostBackend::default();
        let child = backend
            .build_bottom_level(BuildMode::Rebuild, &[input(0, floor(0.0), 0)], None)
            .unwrap()
            .index;

        let raised = InstanceInput {
            member_id: 7,
            transform: Transform::from_position(Vec3::new(0.0, 0.0, 10.0)),
            child: Arc::clone(&child),
        };
        let far = InstanceInput {
            member_id: 2,
            transform: Transform::from_position(Vec3::new(100.0, 0.0, 0.0)),
            child,
        };
        let index = backend.build_top_level(BuildMode::Rebuild, &[far, raised], None).unwrap();

        let hit = index.intersect(&down_from(0.0, 0.0), 0.0, f32::INFINITY).unwrap();
        assert_eq!(hit.instance_ids, vec![7]);
        assert_relative_eq!(hit.distance, 40.0, epsilon = 1e-4);
        assert_relative_eq!(hit.point.z, 10.0, epsilon = 1e-4);
        assert_relative_eq!(hit.normal, Vec3::z(), epsilon = 1e-4);

        let hit = index.intersect(&down_from(100.0, 0.0), 0.0, f32::INFINITY).unwrap();
        assert_eq!(hit.instance_ids, vec![2]);
    }

    #[test]
    fn test_scaled_instance_keeps_world_distance() {
        let backend = HostBackend::default();
        let child = backend
            .build_bottom_level(BuildMode::Rebuild, &[input(0, floor(1.0), 0)], None)
            .unwrap()
            .index;
        let scaled = InstanceInput {
            member_id: 0,
            transform: Transform::identity().with_uniform_scale(4.0),
            child,
        };
        let index = backend.build_top_level(BuildMode::Rebuild, &[scaled], None).unwrap();

        let hit = index.intersect(&down_from(0.0, 0.0), 0.0, f32::INFINITY).unwrap();
        assert_relative_eq!(hit.distance, 46.0, epsilon = 1e-4);
    }

    #[test]
    fn test_degenerate_transform_fails() {
        let backend = HostBackend::default();
        let child = backend
            .build_bottom_level(BuildMode::Rebuild, &[input(0, floor(0.0), 0)], None)
            .unwrap()
            .index;
        let flat = InstanceInput {
            member_id: 0,
            transform: Transform::identity().with_uniform_scale(0.0),
            child,
        };
        let result = backend.build_top_level(BuildMode::Rebuild, &[flat], None);
        assert!(matches!(result, Err(BuildError::DegenerateInput(_))));
    }

    #[test]
    fn test_dispatch_records_follow_config() {
        let backend = HostBackend::new(BuildConfig::default().with_records(2, 3));
        assert_eq!(backend.dispatch_records(&floor(0.0)), 2);
        let points = Shape::Points {
            points: vec![Point3::origin()],
            radius: 1.0,
        };
        assert_eq!(backend.dispatch_records(&points), 3);
    }
}
