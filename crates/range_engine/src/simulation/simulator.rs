//! Batch range simulation

use std::rc::Rc;
use std::thread;

use log::{debug, info};

use crate::core::config::SimulatorConfig;
use crate::foundation::math::{Point3, Transform, Vec3};
use crate::foundation::time::Stopwatch;
use crate::map::{CommitReport, ReceiverKey, Scene};
use crate::spatial::{Ray, SpatialIndex};

use super::{LayoutCache, PipelineLayout, SimulationError};

/// Ranges of one batch, laid out pose-major
#[derive(Debug, Clone, PartialEq)]
pub struct Ranges {
    ranges: Vec<f32>,
    rays_per_pose: usize,
}

impl Ranges {
    /// All ranges; index `pose * rays_per_pose + ray`
    pub fn as_slice(&self) -> &[f32] {
        &self.ranges
    }

    /// Take ownership of the range buffer
    pub fn into_vec(self) -> Vec<f32> {
        self.ranges
    }

    /// Rays cast from every pose
    pub fn rays_per_pose(&self) -> usize {
        self.rays_per_pose
    }

    /// Number of poses in the batch
    pub fn pose_count(&self) -> usize {
        self.ranges.len() / self.rays_per_pose
    }

    /// Ranges measured from one pose
    pub fn pose(&self, pose: usize) -> Option<&[f32]> {
        self.ranges.chunks(self.rays_per_pose).nth(pose)
    }

    /// Rays that hit something inside the valid interval
    pub fn hit_count(&self) -> usize {
        self.ranges.iter().filter(|r| r.is_finite()).count()
    }

    /// Mean of all finite ranges
    pub fn mean_range(&self) -> Option<f32> {
        let hits = self.hit_count();
        if hits == 0 {
            return None;
        }
        let sum: f32 = self.ranges.iter().filter(|r| r.is_finite()).sum();
        Some(sum / hits as f32)
    }
}

/// # Range Simulator
///
/// Casts a sensor's ray pattern from a batch of poses against the committed
/// index of a map. Misses, and hits outside the configured range interval,
/// are reported as `f32::INFINITY`.
///
/// The simulator keeps a [`LayoutCache`] registered on its map, so the
/// pipeline layout follows every commit of the map without polling.
#[derive(Debug)]
pub struct RangeSimulator {
    config: SimulatorConfig,
    map: Option<(Rc<Scene>, ReceiverKey)>,
    layout: Rc<LayoutCache>,
    sensor_offset: Transform,
}

impl RangeSimulator {
    /// Create a simulator without a map
    pub fn new(config: SimulatorConfig) -> Result<Self, SimulationError> {
        config.validate()?;
        info!(
            "range simulator: range [{}, {}], {} worker threads",
            config.min_range,
            config.max_range,
            config.resolved_worker_threads()
        );
        Ok(Self {
            config,
            map: None,
            layout: Rc::new(LayoutCache::new()),
            sensor_offset: Transform::identity(),
        })
    }

    /// Simulator configuration
    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Replace the map
    ///
    /// Unregisters from the previous map. The layout is read immediately if
    /// the new map is already committed.
    pub fn set_map(&mut self, scene: Rc<Scene>) {
        if let Some((previous, key)) = self.map.take() {
            previous.remove_event_receiver(key);
        }
        self.layout.clear();

        let key = scene.add_event_receiver(&self.layout);
        if scene.index().is_some() {
            self.layout.reconfigure(&scene);
        }
        debug!("range simulator: map set to scene {}", scene.token());
        self.map = Some((scene, key));
    }

    /// Current map
    pub fn map(&self) -> Option<&Rc<Scene>> {
        self.map.as_ref().map(|(scene, _)| scene)
    }

    /// Commit the map
    pub fn commit_map(&self) -> Result<CommitReport, SimulationError> {
        let scene = self.map().ok_or(SimulationError::NoMap)?;
        Ok(scene.commit()?)
    }

    /// Pipeline layout of the committed map
    pub fn pipeline_layout(&self) -> Option<PipelineLayout> {
        self.layout.layout()
    }

    /// Set the sensor-to-base transform
    pub fn set_sensor_offset(&mut self, offset: Transform) {
        self.sensor_offset = offset;
    }

    /// Sensor-to-base transform
    pub fn sensor_offset(&self) -> Transform {
        self.sensor_offset
    }

    /// Cast `pattern` from every base pose in `poses`
    ///
    /// `pattern` holds ray directions in the sensor frame. The result holds
    /// one range per pose and direction.
    pub fn simulate(&self, poses: &[Transform], pattern: &[Vec3]) -> Result<Ranges, SimulationError> {
        let scene = self.map().ok_or(SimulationError::NoMap)?;
        let index = scene
            .index()
            .ok_or_else(|| SimulationError::NotCommitted(scene.token()))?;
        if pattern.is_empty() {
            return Err(SimulationError::EmptyPattern);
        }
        if let Some(bad) = pattern
            .iter()
            .position(|d| !(d.iter().all(|c| c.is_finite()) && d.norm_squared() > 0.0))
        {
            return Err(SimulationError::InvalidDirection(bad));
        }

        let sensors: Vec<Transform> = poses.iter().map(|pose| pose.combine(&self.sensor_offset)).collect();
        let total = sensors.len() * pattern.len();
        let mut ranges = vec![f32::INFINITY; total];
        if total == 0 {
            return Ok(Ranges {
                ranges,
                rays_per_pose: pattern.len(),
            });
        }

        let workers = self.config.resolved_worker_threads().clamp(1, total);
        let chunk_size = total.div_ceil(workers);
        let timer = Stopwatch::start_new();

        let index: &dyn SpatialIndex = &*index;
        let sensors = &sensors;
        let (min_range, max_range) = (self.config.min_range, self.config.max_range);
        thread::scope(|scope| {
            for (chunk_index, chunk) in ranges.chunks_mut(chunk_size).enumerate() {
                scope.spawn(move || {
                    let first = chunk_index * chunk_size;
                    for (offset, range) in chunk.iter_mut().enumerate() {
                        let ray_id = first + offset;
                        let sensor = &sensors[ray_id / pattern.len()];
                        let direction = pattern[ray_id % pattern.len()];
                        *range = cast(index, sensor, &direction, min_range, max_range);
                    }
                });
            }
        });

        let result = Ranges {
            ranges,
            rays_per_pose: pattern.len(),
        };
        debug!(
            "simulated {} rays from {} poses on {} threads in {:.2} ms, {} hits",
            total,
            poses.len(),
            workers,
            timer.elapsed_millis(),
            result.hit_count()
        );
        Ok(result)
    }
}

/// Range along one sensor-frame direction, `f32::INFINITY` when out of range
fn cast(index: &dyn SpatialIndex, sensor: &Transform, direction: &Vec3, min_range: f32, max_range: f32) -> f32 {
    let ray = Ray::new(
        sensor.transform_point(&Point3::origin()),
        sensor.transform_vector(direction),
    );
    match index.intersect(&ray, 0.0, max_range) {
        Some(hit) if hit.distance >= min_range => hit.distance,
        _ => f32::INFINITY,
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::backend::{BuildBackend, HostBackend};
    use crate::foundation::math::{constants, Quat};
    use crate::map::Geometry;

    /// Floor at `z = 0` and a wall at `x = 10`, both 40 units wide
    fn room() -> Rc<Scene> {
        crate::foundation::logging::init_for_tests();
        let backend: Rc<dyn BuildBackend> = Rc::new(HostBackend::default());
        let floor = Geometry::mesh(
            vec![
                Point3::new(-20.0, -20.0, 0.0),
                Point3::new(20.0, -20.0, 0.0),
                Point3::new(20.0, 20.0, 0.0),
                Point3::new(-20.0, 20.0, 0.0),
            ],
            vec![0, 1, 2, 0, 2, 3],
        )
        .unwrap();
        let wall = Geometry::mesh(
            vec![
                Point3::new(10.0, -20.0, -20.0),
                Point3::new(10.0, 20.0, -20.0),
                Point3::new(10.0, 20.0, 20.0),
                Point3::new(10.0, -20.0, 20.0),
            ],
            vec![0, 1, 2, 0, 2, 3],
        )
        .unwrap();

        let geometry = Scene::new_geometry(backend.clone());
        geometry.add(&floor).unwrap();
        geometry.add(&wall).unwrap();
        let world = Scene::new_instances(backend);
        world.add(&geometry.instantiate().unwrap()).unwrap();
        world
    }

    fn simulator(threads: usize) -> RangeSimulator {
        RangeSimulator::new(SimulatorConfig::new().with_worker_threads(threads).with_range(0.5, 50.0)).unwrap()
    }

    #[test]
    fn test_requires_committed_map() {
        let mut sim = simulator(1);
        let pattern = [Vec3::x()];
        assert!(matches!(sim.simulate(&[Transform::identity()], &pattern), Err(SimulationError::NoMap)));

        let map = room();
        sim.set_map(Rc::clone(&map));
        assert!(matches!(
            sim.simulate(&[Transform::identity()], &pattern),
            Err(SimulationError::NotCommitted(_))
        ));
        assert!(sim.pipeline_layout().is_none());

        sim.commit_map().unwrap();
        assert_eq!(sim.pipeline_layout().map(|l| l.max_traversal_depth), Some(2));
        assert!(sim.simulate(&[Transform::identity()], &pattern).is_ok());
    }

    #[test]
    fn test_rejects_bad_patterns() {
        let mut sim = simulator(1);
        let map = room();
        map.commit().unwrap();
        sim.set_map(map);

        let pose = [Transform::identity()];
        assert!(matches!(sim.simulate(&pose, &[]), Err(SimulationError::EmptyPattern)));
        assert!(matches!(
            sim.simulate(&pose, &[Vec3::x(), Vec3::zeros()]),
            Err(SimulationError::InvalidDirection(1))
        ));
    }

    #[test]
    fn test_ranges_from_poses() {
        let mut sim = simulator(3);
        let map = room();
        map.commit().unwrap();
        sim.set_map(map);

        let poses = [
            Transform::from_position(Vec3::new(0.0, 1.0, 2.0)),
            Transform::from_position(Vec3::new(4.0, 1.0, 5.0)),
        ];
        let pattern = [Vec3::x(), -Vec3::z(), Vec3::z(), Vec3::new(0.0, 0.0, -0.1)];
        let ranges = sim.simulate(&poses, &pattern).unwrap();

        assert_eq!(ranges.pose_count(), 2);
        assert_eq!(ranges.rays_per_pose(), 4);
        let first = ranges.pose(0).unwrap();
        assert_relative_eq!(first[0], 10.0, epsilon = 1e-4);
        assert_relative_eq!(first[1], 2.0, epsilon = 1e-4);
        assert!(first[2].is_infinite());
        assert_relative_eq!(first[3], 2.0, epsilon = 1e-4);
        let second = ranges.pose(1).unwrap();
        assert_relative_eq!(second[0], 6.0, epsilon = 1e-4);
        assert_relative_eq!(second[1], 5.0, epsilon = 1e-4);
        assert_eq!(ranges.hit_count(), 6);
        assert!(ranges.pose(2).is_none());
    }

    #[test]
    fn test_range_interval() {
        let mut sim = simulator(1);
        let map = room();
        map.commit().unwrap();
        sim.set_map(map);

        let pattern = [-Vec3::z()];
        let near = [Transform::from_position(Vec3::new(1.0, 3.0, 0.2))];
        let far = [Transform::from_position(Vec3::new(1.0, 3.0, 80.0))];
        assert!(sim.simulate(&near, &pattern).unwrap().as_slice()[0].is_infinite());
        assert!(sim.simulate(&far, &pattern).unwrap().as_slice()[0].is_infinite());
        assert_eq!(sim.simulate(&far, &pattern).unwrap().mean_range(), None);
    }

    #[test]
    fn test_sensor_offset_applies_before_pose() {
        let mut sim = simulator(1);
        let map = room();
        map.commit().unwrap();
        sim.set_map(map);

        // Sensor mounted 1 up, looking along the base's +y axis
        sim.set_sensor_offset(Transform::from_position_rotation(
            Vec3::new(0.0, 0.0, 1.0),
            Quat::from_axis_angle(&Vec3::z_axis(), constants::PI * 0.5),
        ));
        // Base yawed back by the same angle, so the sensor looks along world +x
        let pose = Transform::from_position_rotation(
            Vec3::new(2.0, 0.0, 3.0),
            Quat::from_axis_angle(&Vec3::z_axis(), -constants::PI * 0.5),
        );
        let ranges = sim.simulate(&[pose], &[Vec3::x(), -Vec3::z()]).unwrap();

        assert_relative_eq!(ranges.as_slice()[0], 8.0, epsilon = 1e-4);
        assert_relative_eq!(ranges.as_slice()[1], 4.0, epsilon = 1e-4);
    }

    #[test]
    fn test_thread_count_does_not_change_results() {
        let map = room();
        map.commit().unwrap();
        let poses: Vec<Transform> = (0..7)
            .map(|i| Transform::from_position(Vec3::new(i as f32 - 3.0, 1.0, 1.5)))
            .collect();
        let pattern: Vec<Vec3> = (0..33)
            .map(|i| {
                let angle = i as f32 * constants::TAU / 33.0;
                Vec3::new(angle.cos(), angle.sin(), -0.3)
            })
            .collect();

        let mut single = simulator(1);
        single.set_map(Rc::clone(&map));
        let mut many = simulator(5);
        many.set_map(map);

        assert_eq!(
            single.simulate(&poses, &pattern).unwrap(),
            many.simulate(&poses, &pattern).unwrap()
        );
    }

    #[test]
    fn test_switching_maps_unregisters() {
        let first = room();
        let second = room();
        first.commit().unwrap();
        second.commit().unwrap();

        let mut sim = simulator(1);
        sim.set_map(Rc::clone(&first));
        assert_eq!(first.event_receiver_count(), 1);
        sim.set_map(Rc::clone(&second));
        assert_eq!(first.event_receiver_count(), 0);
        assert_eq!(second.event_receiver_count(), 1);
        assert!(sim.pipeline_layout().is_some());
    }

    #[test]
    fn test_empty_batch() {
        let mut sim = simulator(2);
        let map = room();
        map.commit().unwrap();
        sim.set_map(map);

        let ranges = sim.simulate(&[], &[Vec3::x()]).unwrap();
        assert_eq!(ranges.pose_count(), 0);
        assert!(ranges.into_vec().is_empty());
    }
}
