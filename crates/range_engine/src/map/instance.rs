//! Placement of one scene inside another

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::foundation::math::Transform;

use super::{next_token, MapError, Scene};

/// A scene placed under a transform
///
/// Created by [`Scene::instantiate`]. The instance keeps its scene alive; the
/// instance-scene it is added to keeps the instance alive. Both back links
/// (scene to instance, instance to enclosing scene) are weak.
pub struct Instance {
    token: u64,
    scene: Rc<Scene>,
    transform: Cell<Transform>,
    transform_version: Cell<u64>,
    enclosing: RefCell<Weak<Scene>>,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("token", &self.token)
            .field("scene", &self.scene.token())
            .field("transform", &self.transform.get())
            .field("enclosing", &self.enclosing().map(|s| s.token()))
            .finish()
    }
}

impl Instance {
    pub(super) fn new(scene: Rc<Scene>) -> Rc<Self> {
        Rc::new(Self {
            token: next_token(),
            scene,
            transform: Cell::new(Transform::identity()),
            transform_version: Cell::new(0),
            enclosing: RefCell::new(Weak::new()),
        })
    }

    /// Process-unique identity of this instance
    pub fn token(&self) -> u64 {
        self.token
    }

    /// The placed scene
    pub fn scene(&self) -> &Rc<Scene> {
        &self.scene
    }

    /// Current placement
    pub fn transform(&self) -> Transform {
        self.transform.get()
    }

    /// Counter bumped by every [`Instance::set_transform`]
    pub fn transform_version(&self) -> u64 {
        self.transform_version.get()
    }

    /// Move the instance
    ///
    /// The enclosing scene becomes dirty and refreshes on its next commit.
    pub fn set_transform(&self, transform: Transform) -> Result<(), MapError> {
        if !transform.is_invertible() {
            return Err(MapError::DegenerateTransform);
        }
        self.transform.set(transform);
        self.transform_version.set(self.transform_version.get() + 1);
        if let Some(enclosing) = self.enclosing() {
            enclosing.mark_moved();
        }
        Ok(())
    }

    /// Scene this instance has been added to, if it still exists
    pub fn enclosing(&self) -> Option<Rc<Scene>> {
        self.enclosing.borrow().upgrade()
    }

    pub(super) fn attach(&self, scene: Weak<Scene>) {
        *self.enclosing.borrow_mut() = scene;
    }

    pub(super) fn detach(&self) {
        *self.enclosing.borrow_mut() = Weak::new();
    }
}
