//! # Build Backend Abstraction
//!
//! This module provides the layer between the scene graph and concrete index
//! builders. A scene hands its members to a [`BuildBackend`] on commit and
//! gets back an immutable [`IndexRef`] it can swap in atomically.
//!
//! ## Architecture
//!
//! - **Two levels**: a bottom-level build indexes the geometries of a
//!   geometry-scene; a top-level build indexes the instances of an
//!   instance-scene over the already built indices of their child scenes.
//! - **Capabilities**: backends report whether they can build top-level
//!   indices at all, and how many dispatch-table records a geometry needs.
//! - **Pure builds**: backends never touch the scene graph. Everything they
//!   need arrives as plain inputs and everything they produce goes back in the
//!   result, so a failed build leaves no trace.
//!
//! Two backends ship with the crate: [`HostBackend`] builds bounding volume
//! hierarchies and supports instancing and refits; [`LinearBackend`] tests
//! every primitive and serves as a reference.

mod host;
mod linear;

use std::fmt::Debug;
use std::sync::Arc;

use crate::foundation::math::Transform;
use crate::map::Shape;
use crate::spatial::IndexRef;

pub use host::{HostBackend, InstanceSetIndex, LocalIndex, GeometrySetIndex};
pub use linear::{LinearBackend, LinearIndex};

/// Result type for backend operations
pub type BuildResult<T> = Result<T, BuildError>;

/// Index build errors
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// Input the backend cannot index
    #[error("degenerate input: {0}")]
    DegenerateInput(String),

    /// An instance refers to a scene without a committed index
    #[error("child scene {0} has no committed index")]
    ChildIndexUnavailable(u64),

    /// The backend lacks the requested capability
    #[error("backend '{backend}' does not support {operation}")]
    Unsupported {
        /// Backend name
        backend: String,
        /// Requested operation
        operation: String,
    },

    /// Backend specific failure
    #[error("backend failure: {0}")]
    Backend(String),
}

/// How much of an existing index a build may reuse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildMode {
    /// Build from scratch; required after membership changes
    Rebuild,
    /// Same members, moved content; backends may refit the previous index
    Refresh,
}

/// One geometry handed to a bottom-level build
#[derive(Debug, Clone)]
pub struct GeometryInput {
    /// Member id of the geometry in the scene being built
    pub member_id: u32,
    /// Shape snapshot
    pub shape: Arc<Shape>,
    /// Shape version of the snapshot
    pub version: u64,
    /// Local index from an earlier build, with the version it was built from
    pub cached: Option<(u64, IndexRef)>,
}

/// Result of a bottom-level build
#[derive(Debug, Clone)]
pub struct BottomLevelOutput {
    /// Index over all geometries of the scene
    pub index: IndexRef,
    /// Local index per input geometry, in input order
    pub local_indices: Vec<IndexRef>,
}

/// One instance handed to a top-level build
#[derive(Debug, Clone)]
pub struct InstanceInput {
    /// Member id of the instance in the scene being built
    pub member_id: u32,
    /// Placement of the child scene
    pub transform: Transform,
    /// Committed index of the child scene
    pub child: IndexRef,
}

/// # Build Backend Trait
///
/// Defines the interface every index builder implements. Scenes hold their
/// backend as `Rc<dyn BuildBackend>` so a whole map can share one builder.
///
/// ## Implementation Notes
///
/// Backends should:
/// - Treat [`BuildMode::Refresh`] as a hint and fall back to a rebuild
///   whenever the previous index cannot be reused
/// - Never mutate a previous index; a refit works on a copy
/// - Report invalid input as [`BuildError`] instead of panicking
pub trait BuildBackend: Debug {
    /// Short backend name used in logs and errors
    fn name(&self) -> &str;

    /// Whether [`BuildBackend::build_top_level`] is available
    fn supports_hierarchy(&self) -> bool;

    /// Dispatch-table records one geometry of this shape requires
    fn dispatch_records(&self, _shape: &Shape) -> u32 {
        1
    }

    /// Build the index of a geometry-scene
    ///
    /// # Arguments
    /// * `mode` - Whether the previous index may be refitted
    /// * `geometries` - Members in ascending id order
    /// * `previous` - Last valid index of the scene, if any
    fn build_bottom_level(
        &self,
        mode: BuildMode,
        geometries: &[GeometryInput],
        previous: Option<&IndexRef>,
    ) -> BuildResult<BottomLevelOutput>;

    /// Build the index of an instance-scene
    ///
    /// # Arguments
    /// * `mode` - Whether the previous index may be refitted
    /// * `instances` - Members in ascending id order
    /// * `previous` - Last valid index of the scene, if any
    fn build_top_level(
        &self,
        mode: BuildMode,
        instances: &[InstanceInput],
        previous: Option<&IndexRef>,
    ) -> BuildResult<IndexRef>;
}

fn check_finite(input: &GeometryInput) -> BuildResult<()> {
    if input.shape.is_finite() {
        Ok(())
    } else {
        Err(BuildError::DegenerateInput(format!(
            "geometry {} has non-finite coordinates",
            input.member_id
        )))
    }
}
