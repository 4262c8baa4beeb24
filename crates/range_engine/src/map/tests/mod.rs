//! Scene graph scenarios
//!
//! Shared fixtures for the membership, instancing, commit and propagation
//! tests.

mod commit;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::backend::{
    BottomLevelOutput, BuildBackend, BuildError, BuildMode, BuildResult, GeometryInput,
    HostBackend, InstanceInput,
};
use crate::foundation::math::{Point3, Vec3};
use crate::map::{CommitReport, Geometry, Scene, SceneEventReceiver, Shape};
use crate::spatial::{IndexRef, Ray};

pub(super) fn host() -> Rc<dyn BuildBackend> {
    crate::foundation::logging::init_for_tests();
    Rc::new(HostBackend::default())
}

/// Axis-aligned square in the plane `z = height`, centered on the origin
pub(super) fn square(half: f32, height: f32) -> Rc<Geometry> {
    Geometry::mesh(
        vec![
            Point3::new(-half, -half, height),
            Point3::new(half, -half, height),
            Point3::new(half, half, height),
            Point3::new(-half, half, height),
        ],
        vec![0, 1, 2, 0, 2, 3],
    )
    .unwrap()
}

/// Ray looking straight down from `z = 100`
pub(super) fn down_from(x: f32, y: f32) -> Ray {
    Ray::new(Point3::new(x, y, 100.0), -Vec3::z())
}

/// Closest distance along `ray` in the scene's committed index
pub(super) fn distance(scene: &Scene, ray: &Ray) -> Option<f32> {
    scene.index()?.intersect(ray, 0.0, f32::INFINITY).map(|hit| hit.distance)
}

/// Host backend wrapper recording build modes and failing on demand
#[derive(Debug, Default)]
pub(super) struct RecordingBackend {
    inner: HostBackend,
    pub fail: Cell<bool>,
    pub bottom_modes: RefCell<Vec<BuildMode>>,
    pub top_modes: RefCell<Vec<BuildMode>>,
}

impl RecordingBackend {
    pub fn new() -> Rc<Self> {
        crate::foundation::logging::init_for_tests();
        Rc::new(Self::default())
    }

    pub fn builds(&self) -> usize {
        self.bottom_modes.borrow().len() + self.top_modes.borrow().len()
    }

    fn check(&self) -> BuildResult<()> {
        if self.fail.get() {
            Err(BuildError::Backend("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

impl BuildBackend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    fn supports_hierarchy(&self) -> bool {
        true
    }

    fn dispatch_records(&self, shape: &Shape) -> u32 {
        self.inner.dispatch_records(shape)
    }

    fn build_bottom_level(
        &self,
        mode: BuildMode,
        geometries: &[GeometryInput],
        previous: Option<&IndexRef>,
    ) -> BuildResult<BottomLevelOutput> {
        self.check()?;
        self.bottom_modes.borrow_mut().push(mode);
        self.inner.build_bottom_level(mode, geometries, previous)
    }

    fn build_top_level(
        &self,
        mode: BuildMode,
        instances: &[InstanceInput],
        previous: Option<&IndexRef>,
    ) -> BuildResult<IndexRef> {
        self.check()?;
        self.top_modes.borrow_mut().push(mode);
        self.inner.build_top_level(mode, instances, previous)
    }
}

/// Receiver remembering every report it was given
#[derive(Default)]
pub(super) struct Recorder {
    pub reports: RefCell<Vec<(u64, CommitReport)>>,
}

impl Recorder {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.reports.borrow().len()
    }

    pub fn last(&self) -> Option<CommitReport> {
        self.reports.borrow().last().map(|(_, report)| *report)
    }
}

impl SceneEventReceiver for Recorder {
    fn on_commit(&self, scene: &Scene, report: &CommitReport) {
        self.reports.borrow_mut().push((scene.token(), *report));
    }
}
