//! Error types of the scene graph

use crate::backend::BuildError;

use super::SceneFlavor;

/// Shape validation errors
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    /// Triangle list length is not a multiple of three
    #[error("index count {0} is not a multiple of three")]
    IndexCount(usize),

    /// A triangle refers to a vertex that does not exist
    #[error("index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange {
        /// Offending index value
        index: u32,
        /// Number of vertices in the mesh
        vertex_count: usize,
    },

    /// Point sets need a positive, finite radius
    #[error("point radius must be positive and finite, got {0}")]
    InvalidRadius(f32),

    /// In-place vertex updates must keep the vertex count
    #[error("vertex update changes topology: expected {expected} vertices, got {actual}")]
    TopologyChanged {
        /// Vertex count of the current shape
        expected: usize,
        /// Vertex count of the update
        actual: usize,
    },
}

/// Scene graph errors
///
/// Every variant except [`MapError::Build`] is a precondition violation
/// detected before the scene is changed.
#[derive(thiserror::Error, Debug)]
pub enum MapError {
    /// Member kind does not match the scene flavor
    #[error("cannot add {found:?} member to {expected:?} scene")]
    FlavorMismatch {
        /// Flavor of the scene
        expected: SceneFlavor,
        /// Flavor the member belongs to
        found: SceneFlavor,
    },

    /// The member is already part of this scene
    #[error("member already present with id {0}")]
    DuplicateMember(u32),

    /// The member is not part of this scene
    #[error("member not found in scene")]
    UnknownMember,

    /// An instance lives in at most one enclosing scene
    #[error("instance {0} is already placed in another scene")]
    InstanceAlreadyPlaced(u64),

    /// Adding the instance would make a scene reachable from itself
    #[error("instancing scene {child} inside scene {parent} would create a cycle")]
    CyclicInstancing {
        /// Scene receiving the instance
        parent: u64,
        /// Scene referenced by the instance
        child: u64,
    },

    /// The scene's backend cannot build instance hierarchies
    #[error("backend '{0}' does not support instancing")]
    HierarchyUnsupported(String),

    /// Transform cannot be inverted for ray queries
    #[error("transform is not invertible")]
    DegenerateTransform,

    /// Membership may not change while the scene is committing
    #[error("scene {0} is committing")]
    CommitInProgress(u64),

    /// The scene handle is no longer owned by any `Rc`
    #[error("scene {0} has been dropped")]
    SceneDropped(u64),

    /// Index build failed; the previous index is kept
    #[error("commit of scene {scene} failed: {source}")]
    Build {
        /// Scene whose commit failed
        scene: u64,
        /// Backend error
        #[source]
        source: BuildError,
    },
}
