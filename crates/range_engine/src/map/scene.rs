//! Scene membership and instancing

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use log::{debug, trace, warn};
use slotmap::SlotMap;

use crate::backend::BuildBackend;
use crate::foundation::collections::{IdGenerator, WeakSet};
use crate::spatial::IndexRef;

use super::commit::{CommitState, SceneLayout};
use super::events::{ReceiverKey, SceneEventReceiver};
use super::{next_token, Geometry, Instance, MapError};

/// Kind of members a scene holds, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SceneFlavor {
    /// Holds geometries; commits into a bottom-level index
    Geometries,
    /// Holds instances of other scenes; commits into a top-level index
    Instances,
}

/// A member of a scene
#[derive(Debug, Clone)]
pub enum Member {
    /// Member of a geometry-scene
    Geometry(Rc<Geometry>),
    /// Member of an instance-scene
    Instance(Rc<Instance>),
}

impl Member {
    /// Identity of the underlying geometry or instance
    pub fn token(&self) -> u64 {
        match self {
            Self::Geometry(g) => g.token(),
            Self::Instance(i) => i.token(),
        }
    }

    /// Flavor of scene this member belongs in
    pub fn flavor(&self) -> SceneFlavor {
        match self {
            Self::Geometry(_) => SceneFlavor::Geometries,
            Self::Instance(_) => SceneFlavor::Instances,
        }
    }

    /// The geometry, if this is a geometry member
    pub fn as_geometry(&self) -> Option<&Rc<Geometry>> {
        match self {
            Self::Geometry(g) => Some(g),
            Self::Instance(_) => None,
        }
    }

    /// The instance, if this is an instance member
    pub fn as_instance(&self) -> Option<&Rc<Instance>> {
        match self {
            Self::Instance(i) => Some(i),
            Self::Geometry(_) => None,
        }
    }
}

impl PartialEq for Member {
    fn eq(&self, other: &Self) -> bool {
        self.token() == other.token()
    }
}

impl Eq for Member {}

impl Hash for Member {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.token().hash(state);
    }
}

/// Anything that can be looked up or stored in a scene
pub trait SceneMember {
    /// Owned member handle
    fn to_member(&self) -> Member;

    /// Identity used for reverse lookups
    fn member_token(&self) -> u64;
}

impl SceneMember for Rc<Geometry> {
    fn to_member(&self) -> Member {
        Member::Geometry(Rc::clone(self))
    }

    fn member_token(&self) -> u64 {
        self.token()
    }
}

impl SceneMember for Rc<Instance> {
    fn to_member(&self) -> Member {
        Member::Instance(Rc::clone(self))
    }

    fn member_token(&self) -> u64 {
        self.token()
    }
}

impl SceneMember for Member {
    fn to_member(&self) -> Member {
        self.clone()
    }

    fn member_token(&self) -> u64 {
        self.token()
    }
}

/// Per-member snapshot of what the last successful build saw
///
/// Geometries record `(version, 0)`; instances record
/// `(child revision, transform version)`.
pub(super) type Stamp = (u64, u64);

pub(super) struct SceneState {
    pub members: BTreeMap<u32, Member>,
    pub ids: HashMap<u64, u32>,
    pub id_gen: IdGenerator,
    pub added: bool,
    pub removed: bool,
    pub commit_state: CommitState,
    pub index: Option<IndexRef>,
    pub layout: Option<SceneLayout>,
    pub revision: u64,
    pub stamps: BTreeMap<u32, Stamp>,
}

/// A set of geometries or instances committed into one spatial index
///
/// Scenes are always handled through `Rc`; the constructors return one.
/// Membership changes mark the scene dirty and [`Scene::commit`] brings the
/// index back in sync.
pub struct Scene {
    pub(super) token: u64,
    pub(super) flavor: SceneFlavor,
    pub(super) backend: Rc<dyn BuildBackend>,
    self_ref: Weak<Scene>,
    pub(super) state: RefCell<SceneState>,
    pub(super) parents: RefCell<WeakSet<Instance>>,
    pub(super) receivers: RefCell<SlotMap<ReceiverKey, Weak<dyn SceneEventReceiver>>>,
}

impl fmt::Debug for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.try_borrow();
        f.debug_struct("Scene")
            .field("token", &self.token)
            .field("flavor", &self.flavor)
            .field("backend", &self.backend.name())
            .field("members", &state.as_ref().map(|s| s.members.len()).ok())
            .field("state", &state.as_ref().map(|s| s.commit_state).ok())
            .finish()
    }
}

impl Scene {
    /// Create an empty scene of the given flavor
    pub fn new(flavor: SceneFlavor, backend: Rc<dyn BuildBackend>) -> Rc<Self> {
        let scene = Rc::new_cyclic(|self_ref| Self {
            token: next_token(),
            flavor,
            backend,
            self_ref: self_ref.clone(),
            state: RefCell::new(SceneState {
                members: BTreeMap::new(),
                ids: HashMap::new(),
                id_gen: IdGenerator::new(),
                added: false,
                removed: false,
                commit_state: CommitState::Dirty,
                index: None,
                layout: None,
                revision: 0,
                stamps: BTreeMap::new(),
            }),
            parents: RefCell::new(WeakSet::new()),
            receivers: RefCell::new(SlotMap::with_key()),
        });
        debug!("created {:?} scene {} on backend '{}'", flavor, scene.token, scene.backend.name());
        scene
    }

    /// Create an empty geometry-scene
    pub fn new_geometry(backend: Rc<dyn BuildBackend>) -> Rc<Self> {
        Self::new(SceneFlavor::Geometries, backend)
    }

    /// Create an empty instance-scene
    pub fn new_instances(backend: Rc<dyn BuildBackend>) -> Rc<Self> {
        Self::new(SceneFlavor::Instances, backend)
    }

    /// Process-unique identity of this scene
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Kind of members this scene holds
    pub fn flavor(&self) -> SceneFlavor {
        self.flavor
    }

    /// Backend building this scene's index
    pub fn backend(&self) -> &Rc<dyn BuildBackend> {
        &self.backend
    }

    /// Add a member, returning its id
    ///
    /// Fails without changing the scene if the member's kind does not match
    /// the flavor, if it is already a member, if the scene is committing, or
    /// for instances that are placed elsewhere, need an instancing backend or
    /// would close a cycle.
    pub fn add<M: SceneMember>(&self, member: &M) -> Result<u32, MapError> {
        let member = member.to_member();
        if member.flavor() != self.flavor {
            return Err(MapError::FlavorMismatch {
                expected: self.flavor,
                found: member.flavor(),
            });
        }
        if let Some(id) = self.get_opt(&member) {
            return Err(MapError::DuplicateMember(id));
        }
        if let Member::Instance(instance) = &member {
            self.check_instance(instance)?;
        }

        let id = {
            let mut state = self.state.borrow_mut();
            if state.commit_state == CommitState::Committing {
                return Err(MapError::CommitInProgress(self.token));
            }
            let id = state.id_gen.next();
            state.ids.insert(member.token(), id);
            state.members.insert(id, member.clone());
            state.added = true;
            state.commit_state = CommitState::Dirty;
            id
        };

        if let Member::Instance(instance) = &member {
            instance.attach(self.self_ref.clone());
            instance.scene().add_parent(instance);
        }
        trace!("scene {}: added member {} as id {}", self.token, member.token(), id);
        Ok(id)
    }

    fn check_instance(&self, instance: &Rc<Instance>) -> Result<(), MapError> {
        if !self.backend.supports_hierarchy() {
            return Err(MapError::HierarchyUnsupported(self.backend.name().to_string()));
        }
        if instance.enclosing().is_some() {
            return Err(MapError::InstanceAlreadyPlaced(instance.token()));
        }
        let child = instance.scene();
        if child.token == self.token || child.reaches(self.token) {
            return Err(MapError::CyclicInstancing {
                parent: self.token,
                child: child.token,
            });
        }
        Ok(())
    }

    /// Whether the scene with `target` is instanced anywhere below this one
    pub(super) fn reaches(&self, target: u64) -> bool {
        self.reaches_any(|token| token == target)
    }

    /// Whether any scene instanced below this one matches `matches`
    pub(super) fn reaches_any(&self, matches: impl Fn(u64) -> bool) -> bool {
        let mut visited = HashSet::new();
        let mut pending = self.child_scenes();
        while let Some(scene) = pending.pop() {
            if matches(scene.token) {
                return true;
            }
            if visited.insert(scene.token) {
                pending.extend(scene.child_scenes());
            }
        }
        false
    }

    /// Distinct scenes referenced by this scene's instances
    pub(super) fn child_scenes(&self) -> Vec<Rc<Scene>> {
        let state = self.state.borrow();
        let mut seen = HashSet::new();
        state
            .members
            .values()
            .filter_map(Member::as_instance)
            .map(|instance| Rc::clone(instance.scene()))
            .filter(|scene| seen.insert(scene.token))
            .collect()
    }

    /// Id of a member, failing if it is not part of this scene
    pub fn get<M: SceneMember>(&self, member: &M) -> Result<u32, MapError> {
        self.get_opt(member).ok_or(MapError::UnknownMember)
    }

    /// Id of a member, if it is part of this scene
    pub fn get_opt<M: SceneMember>(&self, member: &M) -> Option<u32> {
        self.state.borrow().ids.get(&member.member_token()).copied()
    }

    /// Whether the member is part of this scene
    pub fn has<M: SceneMember>(&self, member: &M) -> bool {
        self.get_opt(member).is_some()
    }

    /// Whether a member with this id exists
    pub fn has_id(&self, id: u32) -> bool {
        self.state.borrow().members.contains_key(&id)
    }

    /// Member stored under `id`
    pub fn member(&self, id: u32) -> Option<Member> {
        self.state.borrow().members.get(&id).cloned()
    }

    /// Remove a member, returning whether it was removed
    ///
    /// Returns `false` both for non-members and while the scene is
    /// committing; check [`Scene::state`] to tell the two apart.
    pub fn remove<M: SceneMember>(&self, member: &M) -> bool {
        self.get_opt(member).and_then(|id| self.remove_id(id)).is_some()
    }

    /// Remove the member stored under `id`
    ///
    /// Returns `None` for unknown ids. Removal is refused while the scene is
    /// committing, which also returns `None` and leaves the member in place.
    pub fn remove_id(&self, id: u32) -> Option<Member> {
        let member = {
            let mut state = self.state.borrow_mut();
            if state.commit_state == CommitState::Committing {
                warn!("scene {}: refusing to remove member {} during commit", self.token, id);
                return None;
            }
            let member = state.members.remove(&id)?;
            state.ids.remove(&member.token());
            state.id_gen.release(id);
            state.stamps.remove(&id);
            state.removed = true;
            state.commit_state = CommitState::Dirty;
            member
        };

        if let Member::Instance(instance) = &member {
            instance.detach();
            instance.scene().remove_parent(instance);
        }
        trace!("scene {}: removed member {} (id {})", self.token, member.token(), id);
        Some(member)
    }

    /// Snapshot of all members ordered by id
    pub fn members(&self) -> BTreeMap<u32, Member> {
        self.state.borrow().members.clone()
    }

    /// Snapshot of the member-to-id mapping
    pub fn ids(&self) -> HashMap<Member, u32> {
        self.state
            .borrow()
            .members
            .iter()
            .map(|(id, member)| (member.clone(), *id))
            .collect()
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.state.borrow().members.len()
    }

    /// Whether the scene has no members
    pub fn is_empty(&self) -> bool {
        self.state.borrow().members.is_empty()
    }

    /// Create an instance of this scene at the identity transform
    ///
    /// The instance is not part of any scene until it is added to an
    /// instance-scene.
    pub fn instantiate(&self) -> Result<Rc<Instance>, MapError> {
        if !self.backend.supports_hierarchy() {
            return Err(MapError::HierarchyUnsupported(self.backend.name().to_string()));
        }
        let scene = self.self_ref.upgrade().ok_or(MapError::SceneDropped(self.token))?;
        Ok(Instance::new(scene))
    }

    /// Register an instance placing this scene somewhere
    pub fn add_parent(&self, instance: &Rc<Instance>) {
        self.parents.borrow_mut().insert(instance.token(), instance);
    }

    pub(super) fn remove_parent(&self, instance: &Instance) {
        self.parents.borrow_mut().remove(instance.token());
    }

    /// Drop parent entries whose instance no longer exists
    pub fn cleanup_parents(&self) -> usize {
        let pruned = self.parents.borrow_mut().prune();
        if pruned > 0 {
            debug!("scene {}: pruned {} stale parent instances", self.token, pruned);
        }
        pruned
    }

    /// Live instances placing this scene
    pub fn parents(&self) -> Vec<Rc<Instance>> {
        self.cleanup_parents();
        self.parents.borrow_mut().upgrade_all()
    }

    /// Mark the index stale after an instance moved
    pub(super) fn mark_moved(&self) {
        let mut state = self.state.borrow_mut();
        if state.commit_state != CommitState::Committing {
            state.commit_state = CommitState::Dirty;
        }
    }
}
