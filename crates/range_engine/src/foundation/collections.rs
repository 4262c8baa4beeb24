//! Specialized collection types
//!
//! [`IdGenerator`] hands out the dense member ids used inside one scene, and
//! [`WeakSet`] keeps non-owning references keyed by a stable identity token.

use std::collections::{BTreeSet, HashMap};
use std::rc::{Rc, Weak};

/// Issues and recycles small dense integer ids
///
/// `next()` always returns the smallest id that is not currently live.
/// Released ids go back into a free pool instead of being compacted, so ids
/// of live members never move.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    next: u32,
    free: BTreeSet<u32>,
}

impl IdGenerator {
    /// Create a generator whose first id is zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the smallest unused id
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> u32 {
        if let Some(id) = self.free.pop_first() {
            return id;
        }
        let id = self.next;
        self.next += 1;
        id
    }

    /// Return an id to the free pool
    ///
    /// Releasing an id that was never issued, or releasing twice, is ignored.
    pub fn release(&mut self, id: u32) {
        if id >= self.next || !self.free.insert(id) {
            return;
        }

        // Shrink the counter while the highest ids are all free
        while self.next > 0 && self.free.remove(&(self.next - 1)) {
            self.next -= 1;
        }
    }

    /// Whether `id` is currently handed out
    pub fn is_live(&self, id: u32) -> bool {
        id < self.next && !self.free.contains(&id)
    }

    /// Number of live ids
    pub fn live_count(&self) -> usize {
        self.next as usize - self.free.len()
    }
}

/// Set of weak references keyed by an identity token
///
/// Entries never keep their targets alive. Expired entries stay until
/// [`WeakSet::prune`] runs or a snapshot is taken with [`WeakSet::upgrade_all`].
#[derive(Debug)]
pub struct WeakSet<T: ?Sized> {
    entries: HashMap<u64, Weak<T>>,
}

impl<T: ?Sized> Default for WeakSet<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<T: ?Sized> WeakSet<T> {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a weak reference under `token`
    ///
    /// Returns false if a live entry with the same token already existed.
    pub fn insert(&mut self, token: u64, target: &Rc<T>) -> bool {
        match self.entries.get(&token) {
            Some(existing) if existing.strong_count() > 0 => false,
            _ => {
                self.entries.insert(token, Rc::downgrade(target));
                true
            }
        }
    }

    /// Remove the entry for `token`, returning whether one existed
    pub fn remove(&mut self, token: u64) -> bool {
        self.entries.remove(&token).is_some()
    }

    /// Whether an entry exists for `token` (live or not)
    pub fn contains(&self, token: u64) -> bool {
        self.entries.contains_key(&token)
    }

    /// Drop every entry whose target has expired, returning how many went
    pub fn prune(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, weak| weak.strong_count() > 0);
        before - self.entries.len()
    }

    /// Prune and return strong references to every live target
    pub fn upgrade_all(&mut self) -> Vec<Rc<T>> {
        self.prune();
        self.entries.values().filter_map(Weak::upgrade).collect()
    }

    /// Number of entries, including expired ones not yet pruned
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
