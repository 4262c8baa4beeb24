//! Range Scan Demo
//!
//! Builds a small two-level map and scans it with a spinning range sensor:
//! - A ground mesh and a crate scene instanced several times
//! - A ring of rays cast from a handful of jittered poses
//! - A second pass after moving one crate and warping the ground, which
//!   commits as a refresh instead of a rebuild
//!
//! Usage: `scan_demo [config.toml]`

use std::rc::Rc;

use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use range_engine::config::ConfigError;
use range_engine::foundation::logging;
use range_engine::foundation::math::constants::TAU;
use range_engine::foundation::time::Stopwatch;
use range_engine::map::GeometryError;
use range_engine::prelude::*;

// Map layout
const GROUND_HALF_SIZE: f32 = 40.0;
const GROUND_CELLS: usize = 16;
const CRATE_SIZE: f32 = 2.0;
const NUM_CRATES: usize = 6;
const CRATE_RING_RADIUS: f32 = 12.0;

// Sensor
const RAYS_PER_RING: usize = 360;
const RING_ELEVATIONS: [f32; 4] = [-0.2, -0.1, 0.0, 0.05];
const SENSOR_HEIGHT: f32 = 1.8;
const NUM_POSES: usize = 8;
const POSE_JITTER: f32 = 1.5;

#[derive(thiserror::Error, Debug)]
enum ScanError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    #[error("Map error: {0}")]
    Map(#[from] MapError),

    #[error("Simulation error: {0}")]
    Simulation(#[from] SimulationError),
}

struct ScanApp {
    config: EngineConfig,
    ground: Rc<Geometry>,
    crates: Vec<Rc<Instance>>,
    simulator: RangeSimulator,
    rng: StdRng,
}

impl ScanApp {
    fn new(config: EngineConfig) -> Result<Self, ScanError> {
        config.validate()?;
        let backend: Rc<dyn BuildBackend> = Rc::new(HostBackend::new(config.build.clone()));

        let ground = Geometry::mesh(grid_vertices(|_, _| 0.0), grid_indices())?;
        let terrain = Scene::new_geometry(Rc::clone(&backend));
        terrain.add(&ground)?;

        let crate_scene = Scene::new_geometry(Rc::clone(&backend));
        crate_scene.add(&cube(CRATE_SIZE)?)?;

        let world = Scene::new_instances(backend);
        world.add(&terrain.instantiate()?)?;
        let mut crates = Vec::with_capacity(NUM_CRATES);
        for i in 0..NUM_CRATES {
            let angle = i as f32 * TAU / NUM_CRATES as f32;
            let placed = crate_scene.instantiate()?;
            placed.set_transform(Transform::from_position_rotation(
                Vec3::new(angle.cos() * CRATE_RING_RADIUS, angle.sin() * CRATE_RING_RADIUS, CRATE_SIZE * 0.5),
                Quat::from_axis_angle(&Vec3::z_axis(), angle),
            ))?;
            world.add(&placed)?;
            crates.push(placed);
        }

        let mut simulator = RangeSimulator::new(config.simulator.clone())?;
        simulator.set_sensor_offset(Transform::from_position(Vec3::new(0.0, 0.0, SENSOR_HEIGHT)));
        simulator.set_map(world);

        Ok(Self {
            config,
            ground,
            crates,
            simulator,
            rng: StdRng::seed_from_u64(7),
        })
    }

    fn run(&mut self) -> Result<(), ScanError> {
        self.commit("initial build")?;
        self.scan("initial map")?;

        // Push one crate outward and raise a hill under the sensor path
        if let Some(first) = self.crates.first() {
            let mut moved = first.transform();
            moved.position *= 1.5;
            first.set_transform(moved)?;
        }
        self.ground
            .update_vertices(grid_vertices(|x, y| 2.0 * (-(x * x + y * y) / 200.0).exp()))?;
        self.commit("after motion")?;
        self.scan("moved map")
    }

    fn commit(&self, label: &str) -> Result<(), ScanError> {
        let timer = Stopwatch::start_new();
        let report = self.simulator.commit_map()?;
        info!(
            "{}: committed in {:.2} ms (rebuilt {}, layout changed {})",
            label,
            timer.elapsed_millis(),
            report.rebuilt,
            report.layout_changed()
        );
        match self.simulator.pipeline_layout() {
            Some(layout) => info!(
                "pipeline layout: traversal depth {}, {} dispatch entries, {:?}, {:?}",
                layout.max_traversal_depth,
                layout.dispatch_entries,
                layout.traversal_flags,
                layout.primitive_flags
            ),
            None => warn!("map committed without a pipeline layout"),
        }
        Ok(())
    }

    fn scan(&mut self, label: &str) -> Result<(), ScanError> {
        let poses: Vec<Transform> = (0..NUM_POSES)
            .map(|i| {
                let heading = i as f32 * TAU / NUM_POSES as f32;
                let jitter = Vec3::new(
                    self.rng.gen_range(-POSE_JITTER..POSE_JITTER),
                    self.rng.gen_range(-POSE_JITTER..POSE_JITTER),
                    0.0,
                );
                Transform::from_position_rotation(jitter, Quat::from_axis_angle(&Vec3::z_axis(), heading))
            })
            .collect();
        let pattern = ring_pattern();

        let timer = Stopwatch::start_new();
        let ranges = self.simulator.simulate(&poses, &pattern)?;
        let total = ranges.as_slice().len();
        info!(
            "{}: {} rays in {:.2} ms on up to {} threads",
            label,
            total,
            timer.elapsed_millis(),
            self.config.simulator.resolved_worker_threads()
        );
        info!(
            "{}: hit ratio {:.1}%, mean range {}",
            label,
            100.0 * ranges.hit_count() as f32 / total as f32,
            ranges
                .mean_range()
                .map_or_else(|| "n/a".to_string(), |r| format!("{r:.2}"))
        );
        Ok(())
    }
}

/// Ray directions of a multi-ring spinning sensor
fn ring_pattern() -> Vec<Vec3> {
    RING_ELEVATIONS
        .iter()
        .flat_map(|elevation| {
            (0..RAYS_PER_RING).map(move |i| {
                let azimuth = i as f32 * TAU / RAYS_PER_RING as f32;
                Vec3::new(
                    azimuth.cos() * elevation.cos(),
                    azimuth.sin() * elevation.cos(),
                    elevation.sin(),
                )
            })
        })
        .collect()
}

/// Ground grid vertices with heights from `height(x, y)`
fn grid_vertices(height: impl Fn(f32, f32) -> f32) -> Vec<Point3> {
    let step = 2.0 * GROUND_HALF_SIZE / GROUND_CELLS as f32;
    let mut vertices = Vec::with_capacity((GROUND_CELLS + 1) * (GROUND_CELLS + 1));
    for row in 0..=GROUND_CELLS {
        for col in 0..=GROUND_CELLS {
            let x = col as f32 * step - GROUND_HALF_SIZE;
            let y = row as f32 * step - GROUND_HALF_SIZE;
            vertices.push(Point3::new(x, y, height(x, y)));
        }
    }
    vertices
}

fn grid_indices() -> Vec<u32> {
    let stride = (GROUND_CELLS + 1) as u32;
    let mut indices = Vec::with_capacity(GROUND_CELLS * GROUND_CELLS * 6);
    for row in 0..GROUND_CELLS as u32 {
        for col in 0..GROUND_CELLS as u32 {
            let a = row * stride + col;
            let b = a + 1;
            let c = a + stride;
            let d = c + 1;
            indices.extend_from_slice(&[a, b, d, a, d, c]);
        }
    }
    indices
}

/// Axis-aligned cube of edge `size` centered on the origin
fn cube(size: f32) -> Result<Rc<Geometry>, GeometryError> {
    let h = size * 0.5;
    let vertices = vec![
        Point3::new(-h, -h, -h),
        Point3::new(h, -h, -h),
        Point3::new(h, h, -h),
        Point3::new(-h, h, -h),
        Point3::new(-h, -h, h),
        Point3::new(h, -h, h),
        Point3::new(h, h, h),
        Point3::new(-h, h, h),
    ];
    let indices = vec![
        0, 2, 1, 0, 3, 2, // bottom
        4, 5, 6, 4, 6, 7, // top
        0, 1, 5, 0, 5, 4, // front
        2, 3, 7, 2, 7, 6, // back
        1, 2, 6, 1, 6, 5, // right
        3, 0, 4, 3, 4, 7, // left
    ];
    Geometry::mesh(vertices, indices)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load_from_file(&path)?,
        None => EngineConfig::default(),
    };
    logging::init_with_filter(&config.log_level);

    println!("=== Range Scan Demo ===");
    println!("Set RUST_LOG=debug for per-commit details");
    println!();

    let mut app = ScanApp::new(config)?;
    app.run()?;
    Ok(())
}
