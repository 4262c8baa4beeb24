//! Commit protocol of a scene
//!
//! A commit runs in this order:
//! 1. Commit referenced child scenes that are out of date.
//! 2. Decide between no-op, refresh and rebuild from the dirty flags and the
//!    member stamps recorded by the last build.
//! 3. Build into a fresh index through the backend. Nothing in the scene
//!    changes until the build succeeded, so a failed build keeps the last
//!    valid index.
//! 4. Swap the index in, derive depth and dispatch-table layout, and report
//!    what changed.
//! 5. Re-commit the enclosing scene of every live parent instance.
//! 6. Notify this scene's event receivers with its own report.
//!
//! Every commit call carries a `CommitChain` tracking which scenes are
//! still building and which have finished, so propagation commits each scene
//! at most once. An enclosing scene that instances a scene still building
//! further up the chain waits until that build is done.

use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

use log::{debug, trace, warn};

use crate::backend::{BuildError, BuildMode, GeometryInput, InstanceInput};
use crate::spatial::IndexRef;

use super::scene::{SceneState, Stamp};
use super::{Geometry, MapError, Member, PrimitiveFlags, Scene, SceneFlavor, TraversalFlags};

/// Lifecycle state of a scene's index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommitState {
    /// Index matches the members
    Clean,
    /// Members changed since the last successful commit
    Dirty,
    /// A commit is running
    Committing,
    /// The last commit failed; the previous index is kept but stale
    Failed,
}

/// What a commit changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitReport {
    /// Traversal depth differs from before
    pub depth_changed: bool,
    /// Required dispatch-table entries differ from before
    pub dispatch_table_size_changed: bool,
    /// An index build actually ran
    pub rebuilt: bool,
}

impl CommitReport {
    /// Whether a dispatch pipeline configured from this scene must be rebuilt
    pub fn layout_changed(&self) -> bool {
        self.depth_changed || self.dispatch_table_size_changed
    }
}

/// Layout metadata derived on every successful build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct SceneLayout {
    pub depth: u32,
    pub dispatch_entries: u32,
    pub traversal: TraversalFlags,
    pub primitives: PrimitiveFlags,
}

/// Scenes visited by one top-level commit
#[derive(Default)]
struct CommitChain {
    /// Commit started, build not finished
    in_progress: HashSet<u64>,
    /// Build finished, failed or was a no-op
    done: HashSet<u64>,
    /// Enclosing scenes waiting on a scene in `in_progress`
    deferred: Vec<Rc<Scene>>,
}

impl CommitChain {
    fn settled(&self, token: u64) -> bool {
        self.in_progress.contains(&token) || self.done.contains(&token)
    }

    fn blocks(&self, scene: &Scene) -> bool {
        scene.reaches_any(|token| self.in_progress.contains(&token))
    }

    fn defer(&mut self, scene: Rc<Scene>) {
        if !self.deferred.iter().any(|s| s.token == scene.token) {
            self.deferred.push(scene);
        }
    }
}

struct BuiltIndex {
    index: IndexRef,
    layout: SceneLayout,
    stamps: BTreeMap<u32, Stamp>,
}

impl Scene {
    /// Commit pending changes into a new index
    ///
    /// A commit without pending changes is a no-op and returns an all-false
    /// report. On failure the scene keeps its last valid index, stays dirty
    /// and the error is returned; the scene can be fixed and committed again.
    pub fn commit(&self) -> Result<CommitReport, MapError> {
        let mut chain = CommitChain::default();
        let result = self.commit_in_chain(&mut chain);
        Self::resume_deferred(&mut chain);
        result
    }

    fn commit_in_chain(&self, chain: &mut CommitChain) -> Result<CommitReport, MapError> {
        {
            let mut state = self.state.borrow_mut();
            if state.commit_state == CommitState::Committing {
                return Err(MapError::CommitInProgress(self.token));
            }
            state.commit_state = CommitState::Committing;
        }
        chain.in_progress.insert(self.token);

        let result = self.commit_own(chain);
        chain.in_progress.remove(&self.token);
        chain.done.insert(self.token);
        let report = match result {
            Ok(report) => report,
            Err(err) => {
                self.state.borrow_mut().commit_state = CommitState::Failed;
                warn!("scene {}: commit failed: {}", self.token, err);
                Self::resume_deferred(chain);
                return Err(err);
            }
        };

        if report.rebuilt {
            self.propagate(chain);
        }
        Self::resume_deferred(chain);
        self.notify(&report);
        Ok(report)
    }

    fn commit_own(&self, chain: &mut CommitChain) -> Result<CommitReport, MapError> {
        if self.flavor == SceneFlavor::Instances {
            for child in self.child_scenes() {
                if !chain.settled(child.token) && child.needs_commit() {
                    trace!("scene {}: committing child scene {} first", self.token, child.token);
                    child.commit_in_chain(chain)?;
                }
            }
        }

        let mode = {
            let state = self.state.borrow();
            Self::plan(&state)
        };
        let Some(mode) = mode else {
            self.state.borrow_mut().commit_state = CommitState::Clean;
            trace!("scene {}: nothing to commit", self.token);
            return Ok(CommitReport::default());
        };

        let built = match self.flavor {
            SceneFlavor::Geometries => self.build_geometries(mode)?,
            SceneFlavor::Instances => self.build_instances(mode)?,
        };

        let mut state = self.state.borrow_mut();
        let previous = state.layout;
        state.index = Some(built.index);
        state.layout = Some(built.layout);
        state.stamps = built.stamps;
        state.revision += 1;
        state.added = false;
        state.removed = false;
        state.commit_state = CommitState::Clean;

        let report = CommitReport {
            depth_changed: previous.map_or(true, |p| p.depth != built.layout.depth),
            dispatch_table_size_changed: previous
                .map_or(true, |p| p.dispatch_entries != built.layout.dispatch_entries),
            rebuilt: true,
        };
        debug!(
            "scene {}: {:?} of {} members -> revision {}, depth {}, dispatch entries {}",
            self.token,
            mode,
            state.members.len(),
            state.revision,
            built.layout.depth,
            built.layout.dispatch_entries
        );
        Ok(report)
    }

    /// Build mode for the pending changes, `None` when up to date
    fn plan(state: &SceneState) -> Option<BuildMode> {
        if state.index.is_none() || state.added || state.removed {
            return Some(BuildMode::Rebuild);
        }
        if Self::current_stamps(state) != state.stamps {
            return Some(BuildMode::Refresh);
        }
        None
    }

    fn current_stamps(state: &SceneState) -> BTreeMap<u32, Stamp> {
        state
            .members
            .iter()
            .map(|(id, member)| {
                let stamp = match member {
                    Member::Geometry(g) => (g.version(), 0),
                    Member::Instance(i) => (i.scene().revision(), i.transform_version()),
                };
                (*id, stamp)
            })
            .collect()
    }

    fn build_geometries(&self, mode: BuildMode) -> Result<BuiltIndex, MapError> {
        let (geometries, previous): (Vec<(u32, Rc<Geometry>)>, Option<IndexRef>) = {
            let state = self.state.borrow();
            let geometries = state
                .members
                .iter()
                .filter_map(|(id, member)| member.as_geometry().map(|g| (*id, Rc::clone(g))))
                .collect();
            (geometries, state.index.clone())
        };

        let inputs: Vec<GeometryInput> = geometries
            .iter()
            .map(|(id, geometry)| GeometryInput {
                member_id: *id,
                shape: geometry.shape(),
                version: geometry.version(),
                cached: geometry.cached_local_index(),
            })
            .collect();

        let output = self
            .backend
            .build_bottom_level(mode, &inputs, previous.as_ref())
            .map_err(|source| self.build_error(source))?;

        let mut layout = SceneLayout {
            depth: 0,
            dispatch_entries: 0,
            traversal: TraversalFlags::for_depth(0),
            primitives: PrimitiveFlags::empty(),
        };
        if output.local_indices.len() != inputs.len() {
            return Err(self.build_error(BuildError::Backend(format!(
                "{} returned {} local indices for {} geometries",
                self.backend.name(),
                output.local_indices.len(),
                inputs.len()
            ))));
        }

        let mut stamps = BTreeMap::new();
        for ((id, geometry), (input, local)) in
            geometries.iter().zip(inputs.iter().zip(output.local_indices))
        {
            geometry.store_local_index(input.version, local);
            layout.dispatch_entries += self.backend.dispatch_records(&input.shape);
            layout.primitives |= input.shape.primitive_flags();
            stamps.insert(*id, (input.version, 0));
        }

        Ok(BuiltIndex {
            index: output.index,
            layout,
            stamps,
        })
    }

    fn build_instances(&self, mode: BuildMode) -> Result<BuiltIndex, MapError> {
        let (instances, previous) = {
            let state = self.state.borrow();
            let instances: Vec<_> = state
                .members
                .iter()
                .filter_map(|(id, member)| member.as_instance().map(|i| (*id, Rc::clone(i))))
                .collect();
            (instances, state.index.clone())
        };

        let mut inputs = Vec::with_capacity(instances.len());
        let mut stamps = BTreeMap::new();
        let mut child_depth = 0;
        let mut dispatch_entries = 0;
        let mut primitives = PrimitiveFlags::empty();
        for (id, instance) in &instances {
            let child = instance.scene();
            let index = child
                .index()
                .ok_or_else(|| self.build_error(BuildError::ChildIndexUnavailable(child.token)))?;
            inputs.push(InstanceInput {
                member_id: *id,
                transform: instance.transform(),
                child: index,
            });
            stamps.insert(*id, (child.revision(), instance.transform_version()));
            child_depth = child_depth.max(child.depth());
            dispatch_entries = dispatch_entries.max(child.required_dispatch_entries());
            primitives |= child.primitive_flags();
        }

        let index = self
            .backend
            .build_top_level(mode, &inputs, previous.as_ref())
            .map_err(|source| self.build_error(source))?;

        let depth = child_depth + 1;
        Ok(BuiltIndex {
            index,
            layout: SceneLayout {
                depth,
                dispatch_entries,
                traversal: TraversalFlags::for_depth(depth),
                primitives,
            },
            stamps,
        })
    }

    fn build_error(&self, source: BuildError) -> MapError {
        MapError::Build {
            scene: self.token,
            source,
        }
    }

    fn propagate(&self, chain: &mut CommitChain) {
        for instance in self.parents() {
            let Some(enclosing) = instance.enclosing() else {
                trace!("scene {}: parent instance {} is not placed", self.token, instance.token());
                continue;
            };
            if chain.settled(enclosing.token) {
                continue;
            }
            if chain.blocks(&enclosing) {
                trace!(
                    "scene {}: scene {} waits for a child still building",
                    self.token,
                    enclosing.token
                );
                chain.defer(enclosing);
                continue;
            }
            trace!("scene {}: propagating to scene {}", self.token, enclosing.token);
            enclosing.commit_propagated(chain);
        }
    }

    fn commit_propagated(&self, chain: &mut CommitChain) {
        if let Err(err) = self.commit_in_chain(chain) {
            warn!("scene {}: propagated commit failed: {}", self.token, err);
        }
    }

    /// Commit deferred scenes whose children have all finished building
    fn resume_deferred(chain: &mut CommitChain) {
        loop {
            let waiting = std::mem::take(&mut chain.deferred);
            if waiting.is_empty() {
                return;
            }
            let mut progressed = false;
            for scene in waiting {
                if chain.settled(scene.token) {
                    progressed = true;
                } else if chain.blocks(&scene) {
                    chain.defer(scene);
                } else {
                    trace!("resuming deferred commit of scene {}", scene.token);
                    scene.commit_propagated(chain);
                    progressed = true;
                }
            }
            if !progressed {
                return;
            }
        }
    }

    /// Whether a commit of this scene would do anything
    ///
    /// Looks through instanced child scenes as well.
    pub fn needs_commit(&self) -> bool {
        let own = {
            let state = self.state.borrow();
            state.commit_state != CommitState::Clean || Self::plan(&state).is_some()
        };
        own || self.child_scenes().iter().any(|child| child.needs_commit())
    }

    /// Lifecycle state of the index
    pub fn state(&self) -> CommitState {
        self.state.borrow().commit_state
    }

    /// Whether the index is stale
    pub fn is_dirty(&self) -> bool {
        matches!(self.state(), CommitState::Dirty | CommitState::Failed)
    }

    /// Valid index, or `None` while the scene has uncommitted changes
    pub fn index(&self) -> Option<IndexRef> {
        let state = self.state.borrow();
        match state.commit_state {
            CommitState::Clean => state.index.clone(),
            _ => None,
        }
    }

    /// Last successfully built index, even if it is stale
    pub fn last_valid_index(&self) -> Option<IndexRef> {
        self.state.borrow().index.clone()
    }

    /// Number of successful builds
    pub fn revision(&self) -> u64 {
        self.state.borrow().revision
    }

    /// Instancing levels above the geometry indices (0 for a geometry-scene)
    pub fn depth(&self) -> u32 {
        self.state.borrow().layout.map_or(0, |l| l.depth)
    }

    /// Dispatch-table entries a pipeline over this scene needs
    pub fn required_dispatch_entries(&self) -> u32 {
        self.state.borrow().layout.map_or(0, |l| l.dispatch_entries)
    }

    /// Traversal graph shape of the committed scene
    pub fn traversal_flags(&self) -> TraversalFlags {
        self.state.borrow().layout.map_or_else(TraversalFlags::empty, |l| l.traversal)
    }

    /// Primitive kinds reachable from the committed scene
    pub fn primitive_flags(&self) -> PrimitiveFlags {
        self.state.borrow().layout.map_or_else(PrimitiveFlags::empty, |l| l.primitives)
    }
}
