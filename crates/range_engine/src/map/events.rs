//! Commit notifications
//!
//! Receivers register with a scene and hear about every successful commit of
//! that scene, synchronously on the committing thread. Scenes hold receivers
//! weakly: dropping the last `Rc` of a receiver unregisters it implicitly.

use std::rc::Rc;

use log::trace;
use slotmap::new_key_type;

use super::{CommitReport, Scene};

new_key_type! {
    /// Handle of a registered receiver, used to remove it again
    pub struct ReceiverKey;
}

/// Commit event handler trait
///
/// Takes `&self`; receivers that record state use interior mutability.
/// A receiver may query the scene it is notified about, but mutating that
/// scene from inside the callback is not supported.
pub trait SceneEventReceiver {
    /// Called after `scene` committed successfully
    fn on_commit(&self, scene: &Scene, report: &CommitReport);
}

impl Scene {
    /// Register a receiver for commit notifications
    ///
    /// Registering the same receiver again returns its existing key.
    pub fn add_event_receiver<R: SceneEventReceiver + 'static>(&self, receiver: &Rc<R>) -> ReceiverKey {
        let target = Rc::as_ptr(receiver).cast::<()>();
        let mut receivers = self.receivers.borrow_mut();
        if let Some((key, _)) = receivers
            .iter()
            .find(|(_, existing)| existing.as_ptr().cast::<()>() == target)
        {
            return key;
        }

        let receiver: Rc<dyn SceneEventReceiver> = Rc::clone(receiver) as Rc<dyn SceneEventReceiver>;
        receivers.insert(Rc::downgrade(&receiver))
    }

    /// Unregister a receiver, returning whether it was registered
    pub fn remove_event_receiver(&self, key: ReceiverKey) -> bool {
        self.receivers.borrow_mut().remove(key).is_some()
    }

    /// Number of registered receivers that are still alive
    pub fn event_receiver_count(&self) -> usize {
        self.receivers
            .borrow()
            .values()
            .filter(|receiver| receiver.strong_count() > 0)
            .count()
    }

    pub(super) fn notify(&self, report: &CommitReport) {
        // Collect first so receivers can register or unregister while notified
        let live: Vec<Rc<dyn SceneEventReceiver>> = {
            let mut receivers = self.receivers.borrow_mut();
            let before = receivers.len();
            receivers.retain(|_, receiver| receiver.strong_count() > 0);
            if receivers.len() < before {
                trace!(
                    "scene {}: pruned {} expired event receivers",
                    self.token,
                    before - receivers.len()
                );
            }
            receivers.values().filter_map(std::rc::Weak::upgrade).collect()
        };

        for receiver in live {
            receiver.on_commit(self, report);
        }
    }
}
