//! Dispatch layout tracking
//!
//! A dispatch pipeline over a map is configured from the map's traversal
//! depth, dispatch-table size and primitive kinds. [`LayoutCache`] listens to
//! commits of the map and re-reads those values when a commit reports a
//! layout change, or when a rebuild left the primitive kinds different from
//! the cached ones.

use std::cell::Cell;

use log::debug;

use crate::map::{CommitReport, PrimitiveFlags, Scene, SceneEventReceiver, TraversalFlags};

/// Values a dispatch pipeline is configured from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineLayout {
    /// Traversal levels to reserve: the scene depth plus the geometry level
    pub max_traversal_depth: u32,
    /// Dispatch-table records required by the map
    pub dispatch_entries: u32,
    /// Traversal graph shape
    pub traversal_flags: TraversalFlags,
    /// Primitive kinds that need intersection programs
    pub primitive_flags: PrimitiveFlags,
}

impl PipelineLayout {
    /// Read the layout of a committed scene
    pub fn from_scene(scene: &Scene) -> Self {
        Self {
            max_traversal_depth: scene.depth() + 1,
            dispatch_entries: scene.required_dispatch_entries(),
            traversal_flags: scene.traversal_flags(),
            primitive_flags: scene.primitive_flags(),
        }
    }
}

/// Event receiver caching the [`PipelineLayout`] of one map
#[derive(Debug, Default)]
pub struct LayoutCache {
    layout: Cell<Option<PipelineLayout>>,
    reconfigurations: Cell<u32>,
}

impl LayoutCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Current layout, `None` before the map first committed
    pub fn layout(&self) -> Option<PipelineLayout> {
        self.layout.get()
    }

    /// How many times the layout was re-read
    pub fn reconfigurations(&self) -> u32 {
        self.reconfigurations.get()
    }

    /// Re-read the layout from `scene`
    pub fn reconfigure(&self, scene: &Scene) {
        let layout = PipelineLayout::from_scene(scene);
        debug!(
            "pipeline layout for scene {}: depth {}, {} dispatch entries",
            scene.token(),
            layout.max_traversal_depth,
            layout.dispatch_entries
        );
        self.layout.set(Some(layout));
        self.reconfigurations.set(self.reconfigurations.get() + 1);
    }

    /// Forget the cached layout
    pub fn clear(&self) {
        self.layout.set(None);
    }
}

impl SceneEventReceiver for LayoutCache {
    fn on_commit(&self, scene: &Scene, report: &CommitReport) {
        let stale = match self.layout.get() {
            None => true,
            Some(_) if report.layout_changed() => true,
            // Primitive kinds can change without touching depth or table size
            Some(cached) => report.rebuilt && cached != PipelineLayout::from_scene(scene),
        };
        if stale {
            self.reconfigure(scene);
        }
    }
}
