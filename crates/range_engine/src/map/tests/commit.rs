//! Commit protocol of a single scene and its children

use std::rc::Rc;
use std::sync::Arc;

use approx::assert_relative_eq;

use super::{distance, down_from, host, square, Recorder, RecordingBackend};
use crate::backend::{
    BottomLevelOutput, BuildBackend, BuildError, BuildMode, BuildResult, GeometryInput,
    HostBackend, InstanceInput, LinearBackend,
};
use crate::core::config::BuildConfig;
use crate::foundation::math::{Point3, Transform, Vec3};
use crate::map::{CommitState, Geometry, MapError, PrimitiveFlags, Scene, TraversalFlags};
use crate::spatial::IndexRef;

#[test]
fn test_geometry_scene_layout() {
    let backend: Rc<dyn BuildBackend> = Rc::new(HostBackend::new(BuildConfig::default().with_records(1, 2)));
    let scene = Scene::new_geometry(backend);
    scene.add(&square(1.0, 0.0)).unwrap();
    scene.add(&square(1.0, 1.0)).unwrap();
    scene.add(&Geometry::points(vec![Point3::origin()], 0.5).unwrap()).unwrap();

    let report = scene.commit().unwrap();
    assert!(report.rebuilt);
    assert!(report.dispatch_table_size_changed);
    assert_eq!(scene.depth(), 0);
    assert_eq!(scene.required_dispatch_entries(), 4);
    assert_eq!(scene.traversal_flags(), TraversalFlags::SINGLE_GEOMETRY_INDEX);
    assert_eq!(scene.primitive_flags(), PrimitiveFlags::TRIANGLES | PrimitiveFlags::SPHERES);
    assert_eq!(scene.revision(), 1);
}

#[test]
fn test_removal_shrinks_dispatch_table() {
    let scene = Scene::new_geometry(host());
    let geometries: Vec<_> = (0..3).map(|i| square(1.0, i as f32)).collect();
    for geometry in &geometries {
        scene.add(geometry).unwrap();
    }
    scene.commit().unwrap();
    assert_eq!(scene.depth(), 0);
    assert_eq!(scene.required_dispatch_entries(), 3);

    scene.remove(&geometries[1]);
    let report = scene.commit().unwrap();
    assert_eq!(scene.required_dispatch_entries(), 2);
    assert!(report.dispatch_table_size_changed);
    assert!(!report.depth_changed);
}

#[test]
fn test_instance_depths() {
    let backend = host();
    let g = Scene::new_geometry(backend.clone());
    g.add(&square(1.0, 0.0)).unwrap();
    let s1 = Scene::new_instances(backend.clone());
    s1.add(&g.instantiate().unwrap()).unwrap();
    let s2 = Scene::new_instances(backend);
    s2.add(&s1.instantiate().unwrap()).unwrap();

    s2.commit().unwrap();
    assert_eq!(g.depth(), 0);
    assert_eq!(s1.depth(), 1);
    assert_eq!(s2.depth(), 2);
    assert_eq!(s1.traversal_flags(), TraversalFlags::SINGLE_LEVEL_INSTANCING);
    assert_eq!(s2.traversal_flags(), TraversalFlags::ANY_DEPTH);
    assert!(s2.traversal_flags().has_instancing());
    assert_eq!(s2.required_dispatch_entries(), 1);
    assert_eq!(s2.primitive_flags(), PrimitiveFlags::TRIANGLES);
}

#[test]
fn test_empty_instance_scene_has_depth_one() {
    let scene = Scene::new_instances(host());
    scene.commit().unwrap();
    assert_eq!(scene.depth(), 1);
    assert_eq!(scene.required_dispatch_entries(), 0);
    assert!(scene.index().is_some());
    assert!(distance(&scene, &down_from(0.0, 0.0)).is_none());
}

#[test]
fn test_dispatch_entries_take_child_maximum() {
    let backend = host();
    let small = Scene::new_geometry(backend.clone());
    small.add(&square(1.0, 0.0)).unwrap();
    let large = Scene::new_geometry(backend.clone());
    for i in 0..3 {
        large.add(&square(1.0, i as f32)).unwrap();
    }

    let world = Scene::new_instances(backend);
    world.add(&small.instantiate().unwrap()).unwrap();
    world.add(&large.instantiate().unwrap()).unwrap();
    world.commit().unwrap();

    assert_eq!(world.required_dispatch_entries(), 3);
}

#[test]
fn test_second_commit_is_noop() {
    let backend = RecordingBackend::new();
    let scene = Scene::new_geometry(backend.clone());
    scene.add(&square(1.0, 0.0)).unwrap();

    let first = scene.commit().unwrap();
    assert!(first.rebuilt);
    let builds = backend.builds();

    let second = scene.commit().unwrap();
    assert!(!second.depth_changed);
    assert!(!second.dispatch_table_size_changed);
    assert!(!second.rebuilt);
    assert_eq!(backend.builds(), builds);
    assert_eq!(scene.revision(), 1);
}

#[test]
fn test_membership_change_rebuilds() {
    let backend = RecordingBackend::new();
    let scene = Scene::new_geometry(backend.clone());
    scene.add(&square(1.0, 0.0)).unwrap();
    scene.commit().unwrap();
    scene.add(&square(1.0, 1.0)).unwrap();
    scene.commit().unwrap();

    assert_eq!(*backend.bottom_modes.borrow(), vec![BuildMode::Rebuild, BuildMode::Rebuild]);
}

#[test]
fn test_vertex_motion_refreshes() {
    let backend = RecordingBackend::new();
    let scene = Scene::new_geometry(backend.clone());
    let floor = square(10.0, 0.0);
    scene.add(&floor).unwrap();
    scene.commit().unwrap();
    assert_relative_eq!(distance(&scene, &down_from(0.0, 0.0)).unwrap(), 100.0, epsilon = 1e-4);

    let raised: Vec<Point3> = floor
        .shape()
        .vertices()
        .iter()
        .map(|p| Point3::new(p.x, p.y, 20.0))
        .collect();
    floor.update_vertices(raised).unwrap();
    assert!(scene.needs_commit());

    let report = scene.commit().unwrap();
    assert!(report.rebuilt);
    assert!(!report.dispatch_table_size_changed);
    assert_eq!(backend.bottom_modes.borrow().last(), Some(&BuildMode::Refresh));
    assert_relative_eq!(distance(&scene, &down_from(0.0, 0.0)).unwrap(), 80.0, epsilon = 1e-4);
}

#[test]
fn test_instance_motion_refreshes_top_level() {
    let backend = RecordingBackend::new();
    let child = Scene::new_geometry(backend.clone());
    child.add(&square(1.0, 0.0)).unwrap();
    let world = Scene::new_instances(backend.clone());
    let instance = child.instantiate().unwrap();
    world.add(&instance).unwrap();
    world.commit().unwrap();
    assert!(distance(&world, &down_from(0.0, 0.0)).is_some());

    instance
        .set_transform(Transform::from_position(Vec3::new(50.0, 0.0, 0.0)))
        .unwrap();
    assert_eq!(world.state(), CommitState::Dirty);
    assert!(world.index().is_none());

    world.commit().unwrap();
    assert_eq!(backend.top_modes.borrow().last(), Some(&BuildMode::Refresh));
    assert_eq!(backend.bottom_modes.borrow().len(), 1);
    assert!(distance(&world, &down_from(0.0, 0.0)).is_none());
    assert_relative_eq!(distance(&world, &down_from(50.0, 0.0)).unwrap(), 100.0, epsilon = 1e-4);
}

#[test]
fn test_failed_build_keeps_last_valid_index() {
    let backend = RecordingBackend::new();
    let scene = Scene::new_geometry(backend.clone());
    scene.add(&square(1.0, 0.0)).unwrap();
    scene.commit().unwrap();
    let valid = scene.index().unwrap();

    scene.add(&square(1.0, 5.0)).unwrap();
    backend.fail.set(true);
    let err = scene.commit().unwrap_err();
    assert!(matches!(err, MapError::Build { .. }));
    assert_eq!(scene.state(), CommitState::Failed);
    assert!(scene.is_dirty());
    assert!(scene.index().is_none());
    assert!(Arc::ptr_eq(&scene.last_valid_index().unwrap(), &valid));
    assert_eq!(scene.revision(), 1);

    backend.fail.set(false);
    scene.commit().unwrap();
    assert_eq!(scene.state(), CommitState::Clean);
    assert_relative_eq!(distance(&scene, &down_from(0.0, 0.0)).unwrap(), 95.0, epsilon = 1e-4);
}

#[test]
fn test_first_commit_failure_leaves_no_index() {
    let backend = RecordingBackend::new();
    backend.fail.set(true);
    let scene = Scene::new_geometry(backend.clone());
    scene.add(&square(1.0, 0.0)).unwrap();

    assert!(scene.commit().is_err());
    assert!(scene.last_valid_index().is_none());
    assert_eq!(scene.depth(), 0);
}

#[test]
fn test_non_finite_vertices_fail_commit() {
    let scene = Scene::new_geometry(host());
    let floor = square(1.0, 0.0);
    scene.add(&floor).unwrap();
    scene.commit().unwrap();

    let broken = vec![Point3::new(f32::NAN, 0.0, 0.0); 4];
    floor.update_vertices(broken).unwrap();
    assert!(matches!(scene.commit(), Err(MapError::Build { .. })));
    assert_eq!(scene.state(), CommitState::Failed);
    assert!(scene.last_valid_index().is_some());
}

#[test]
fn test_failing_child_fails_parent() {
    let backend = RecordingBackend::new();
    let child = Scene::new_geometry(backend.clone());
    child.add(&square(1.0, 0.0)).unwrap();
    let world = Scene::new_instances(backend.clone());
    world.add(&child.instantiate().unwrap()).unwrap();

    backend.fail.set(true);
    assert!(world.commit().is_err());
    assert_eq!(child.state(), CommitState::Failed);
    assert_eq!(world.state(), CommitState::Failed);

    backend.fail.set(false);
    world.commit().unwrap();
    assert_eq!(child.state(), CommitState::Clean);
    assert_eq!(world.depth(), 1);
}

#[test]
fn test_commit_from_receiver_is_rejected() {
    struct Recommit {
        parent: Rc<Scene>,
        result: std::cell::RefCell<Option<bool>>,
    }
    impl crate::map::SceneEventReceiver for Recommit {
        fn on_commit(&self, _scene: &Scene, _report: &crate::map::CommitReport) {
            let in_progress = matches!(self.parent.commit(), Err(MapError::CommitInProgress(_)));
            *self.result.borrow_mut() = Some(in_progress);
        }
    }

    let backend = host();
    let child = Scene::new_geometry(backend.clone());
    child.add(&square(1.0, 0.0)).unwrap();
    let world = Scene::new_instances(backend);
    world.add(&child.instantiate().unwrap()).unwrap();

    // The child commits first while the world is mid-commit
    let receiver = Rc::new(Recommit {
        parent: Rc::clone(&world),
        result: std::cell::RefCell::new(None),
    });
    child.add_event_receiver(&receiver);
    world.commit().unwrap();

    assert_eq!(*receiver.result.borrow(), Some(true));
    assert_eq!(world.state(), CommitState::Clean);
}

#[test]
fn test_removal_refused_during_commit() {
    struct Remover {
        parent: Rc<Scene>,
        placed: Rc<crate::map::Instance>,
        removed: std::cell::Cell<Option<bool>>,
    }
    impl crate::map::SceneEventReceiver for Remover {
        fn on_commit(&self, _scene: &Scene, _report: &crate::map::CommitReport) {
            self.removed.set(Some(self.parent.remove(&self.placed)));
        }
    }

    let backend = host();
    let child = Scene::new_geometry(backend.clone());
    child.add(&square(1.0, 0.0)).unwrap();
    let world = Scene::new_instances(backend);
    let placed = child.instantiate().unwrap();
    world.add(&placed).unwrap();

    let receiver = Rc::new(Remover {
        parent: Rc::clone(&world),
        placed: Rc::clone(&placed),
        removed: std::cell::Cell::new(None),
    });
    child.add_event_receiver(&receiver);
    world.commit().unwrap();

    assert_eq!(receiver.removed.get(), Some(false));
    assert!(world.has(&placed));
    assert_eq!(world.state(), CommitState::Clean);
}

/// Host backend that drops the last local index of every bottom-level build
#[derive(Debug, Default)]
struct ShortBackend {
    inner: HostBackend,
}

impl BuildBackend for ShortBackend {
    fn name(&self) -> &str {
        "short"
    }

    fn supports_hierarchy(&self) -> bool {
        true
    }

    fn build_bottom_level(
        &self,
        mode: BuildMode,
        geometries: &[GeometryInput],
        previous: Option<&IndexRef>,
    ) -> BuildResult<BottomLevelOutput> {
        let mut output = self.inner.build_bottom_level(mode, geometries, previous)?;
        output.local_indices.pop();
        Ok(output)
    }

    fn build_top_level(
        &self,
        mode: BuildMode,
        instances: &[InstanceInput],
        previous: Option<&IndexRef>,
    ) -> BuildResult<IndexRef> {
        self.inner.build_top_level(mode, instances, previous)
    }
}

#[test]
fn test_missing_local_indices_fail_the_build() {
    let scene = Scene::new_geometry(Rc::new(ShortBackend::default()));
    scene.add(&square(1.0, 0.0)).unwrap();
    scene.add(&square(1.0, 1.0)).unwrap();

    let err = scene.commit().unwrap_err();
    assert!(matches!(err, MapError::Build { source: BuildError::Backend(_), .. }));
    assert_eq!(scene.state(), CommitState::Failed);
    assert!(scene.last_valid_index().is_none());
    assert_eq!(scene.required_dispatch_entries(), 0);
}

#[test]
fn test_host_and_linear_agree() {
    let shapes = || {
        vec![
            square(5.0, 0.0),
            square(2.0, 3.0),
            Geometry::points(vec![Point3::new(1.0, 1.0, 6.0), Point3::new(-3.0, 2.0, 1.0)], 0.7)
                .unwrap(),
        ]
    };
    let host_scene = Scene::new_geometry(host());
    let linear_scene = Scene::new_geometry(Rc::new(LinearBackend::new()));
    for (a, b) in shapes().iter().zip(shapes().iter()) {
        host_scene.add(a).unwrap();
        linear_scene.add(b).unwrap();
    }
    host_scene.commit().unwrap();
    linear_scene.commit().unwrap();

    for i in 0..24 {
        for j in 0..24 {
            let ray = down_from(i as f32 * 0.5 - 6.13, j as f32 * 0.5 - 5.91);
            match (distance(&host_scene, &ray), distance(&linear_scene, &ray)) {
                (Some(h), Some(l)) => assert_relative_eq!(h, l, epsilon = 1e-4),
                (None, None) => {}
                (h, l) => panic!("ray {i},{j}: host {h:?} vs linear {l:?}"),
            }
        }
    }
}

#[test]
fn test_nested_hit_reports_instance_path() {
    let backend = host();
    let g = Scene::new_geometry(backend.clone());
    let gid = g.add(&square(1.0, 0.0)).unwrap();
    let s1 = Scene::new_instances(backend.clone());
    let inner = g.instantiate().unwrap();
    inner.set_transform(Transform::from_position(Vec3::new(0.0, 0.0, 5.0))).unwrap();
    let inner_id = s1.add(&inner).unwrap();

    let s2 = Scene::new_instances(backend);
    let filler = s1.instantiate().unwrap();
    filler.set_transform(Transform::from_position(Vec3::new(100.0, 0.0, 0.0))).unwrap();
    s2.add(&filler).unwrap();
    let outer = s1.instantiate().unwrap();
    outer.set_transform(Transform::from_position(Vec3::new(0.0, 0.0, 10.0))).unwrap();
    let outer_id = s2.add(&outer).unwrap();
    s2.commit().unwrap();

    let hit = s2
        .index()
        .unwrap()
        .intersect(&down_from(0.0, 0.0), 0.0, f32::INFINITY)
        .unwrap();
    assert_relative_eq!(hit.distance, 85.0, epsilon = 1e-4);
    assert_relative_eq!(hit.point.z, 15.0, epsilon = 1e-4);
    assert_eq!(hit.instance_ids, vec![outer_id, inner_id]);
    assert_eq!(hit.geometry_id, gid);
}

#[test]
fn test_receivers_hear_every_successful_commit() {
    let scene = Scene::new_geometry(host());
    let recorder = Recorder::new();
    scene.add_event_receiver(&recorder);

    scene.add(&square(1.0, 0.0)).unwrap();
    scene.commit().unwrap();
    scene.commit().unwrap();

    assert_eq!(recorder.count(), 2);
    assert_eq!(recorder.last().map(|r| r.rebuilt), Some(false));
}
