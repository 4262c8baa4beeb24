//! Geometry primitives of a map
//!
//! A [`Geometry`] owns one [`Shape`]: a triangle mesh or a set of points
//! approximated by spheres. Geometries are shared with `Rc` and may be
//! members of several geometry-scenes at once.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use crate::foundation::math::Point3;
use crate::spatial::{Aabb, IndexRef, Sphere, Triangle};

use super::{next_token, GeometryError, PrimitiveFlags};

/// Geometric payload of a [`Geometry`]
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// Triangle list; every three indices form one triangle
    Mesh {
        /// Vertex positions
        vertices: Vec<Point3>,
        /// Triangle vertex indices
        indices: Vec<u32>,
    },
    /// Points hit as spheres of a common radius
    Points {
        /// Sphere centers
        points: Vec<Point3>,
        /// Sphere radius
        radius: f32,
    },
}

impl Shape {
    /// Check indices and radius
    pub fn validate(&self) -> Result<(), GeometryError> {
        match self {
            Self::Mesh { vertices, indices } => {
                if indices.len() % 3 != 0 {
                    return Err(GeometryError::IndexCount(indices.len()));
                }
                if let Some(&index) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
                    return Err(GeometryError::IndexOutOfRange {
                        index,
                        vertex_count: vertices.len(),
                    });
                }
                Ok(())
            }
            Self::Points { radius, .. } => {
                if radius.is_finite() && *radius > 0.0 {
                    Ok(())
                } else {
                    Err(GeometryError::InvalidRadius(*radius))
                }
            }
        }
    }

    /// Primitive kind as a flag
    pub fn primitive_flags(&self) -> PrimitiveFlags {
        match self {
            Self::Mesh { .. } => PrimitiveFlags::TRIANGLES,
            Self::Points { .. } => PrimitiveFlags::SPHERES,
        }
    }

    /// Vertex positions (sphere centers for point sets)
    pub fn vertices(&self) -> &[Point3] {
        match self {
            Self::Mesh { vertices, .. } => vertices,
            Self::Points { points, .. } => points,
        }
    }

    /// Number of triangles or points
    pub fn primitive_count(&self) -> usize {
        match self {
            Self::Mesh { indices, .. } => indices.len() / 3,
            Self::Points { points, .. } => points.len(),
        }
    }

    /// Triangle `index` of a mesh
    pub fn triangle(&self, index: usize) -> Option<Triangle> {
        match self {
            Self::Mesh { vertices, indices } => {
                let tri = indices.get(3 * index..3 * index + 3)?;
                Some(Triangle::new(
                    vertices[tri[0] as usize].coords,
                    vertices[tri[1] as usize].coords,
                    vertices[tri[2] as usize].coords,
                ))
            }
            Self::Points { .. } => None,
        }
    }

    /// Sphere `index` of a point set
    pub fn sphere(&self, index: usize) -> Option<Sphere> {
        match self {
            Self::Points { points, radius } => {
                points.get(index).map(|p| Sphere::new(p.coords, *radius))
            }
            Self::Mesh { .. } => None,
        }
    }

    /// Bounds of every primitive, in primitive order
    pub fn primitive_bounds(&self) -> Vec<Aabb> {
        match self {
            Self::Mesh { .. } => (0..self.primitive_count())
                .filter_map(|i| self.triangle(i))
                .map(|t| t.bounds())
                .collect(),
            Self::Points { points, radius } => points
                .iter()
                .map(|p| Sphere::new(p.coords, *radius).bounds())
                .collect(),
        }
    }

    /// Bounds of the whole shape
    pub fn bounds(&self) -> Aabb {
        match self {
            Self::Mesh { vertices, .. } => Aabb::from_points(vertices),
            Self::Points { points, radius } => Aabb::from_points(points).inflate(*radius),
        }
    }

    /// Whether every coordinate is finite
    pub fn is_finite(&self) -> bool {
        self.vertices().iter().all(|p| p.coords.iter().all(|c| c.is_finite()))
    }

    fn with_vertices(&self, vertices: Vec<Point3>) -> Self {
        match self {
            Self::Mesh { indices, .. } => Self::Mesh {
                vertices,
                indices: indices.clone(),
            },
            Self::Points { radius, .. } => Self::Points {
                points: vertices,
                radius: *radius,
            },
        }
    }
}

/// Shared geometry of a map
///
/// The shape is kept behind an `Arc` snapshot so index builds can read it
/// without holding a borrow of the geometry. Every vertex update bumps
/// [`Geometry::version`]; the local index cached by a backend is only handed
/// out while its version matches.
#[derive(Debug)]
pub struct Geometry {
    token: u64,
    shape: RefCell<Arc<Shape>>,
    version: Cell<u64>,
    local_index: RefCell<Option<(u64, IndexRef)>>,
}

impl Geometry {
    /// Create a geometry from a validated shape
    pub fn new(shape: Shape) -> Result<Rc<Self>, GeometryError> {
        shape.validate()?;
        Ok(Rc::new(Self {
            token: next_token(),
            shape: RefCell::new(Arc::new(shape)),
            version: Cell::new(0),
            local_index: RefCell::new(None),
        }))
    }

    /// Create a triangle mesh geometry
    pub fn mesh(vertices: Vec<Point3>, indices: Vec<u32>) -> Result<Rc<Self>, GeometryError> {
        Self::new(Shape::Mesh { vertices, indices })
    }

    /// Create a point set geometry
    pub fn points(points: Vec<Point3>, radius: f32) -> Result<Rc<Self>, GeometryError> {
        Self::new(Shape::Points { points, radius })
    }

    /// Process-unique identity of this geometry
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Snapshot of the current shape
    pub fn shape(&self) -> Arc<Shape> {
        Arc::clone(&self.shape.borrow())
    }

    /// Primitive kind of the shape
    pub fn primitive_flags(&self) -> PrimitiveFlags {
        self.shape.borrow().primitive_flags()
    }

    /// Shape version, bumped by every vertex update
    pub fn version(&self) -> u64 {
        self.version.get()
    }

    /// Move vertices in place
    ///
    /// The vertex count must stay the same; scenes containing the geometry
    /// pick up the change with a refresh on their next commit.
    pub fn update_vertices(&self, vertices: Vec<Point3>) -> Result<(), GeometryError> {
        let updated = {
            let shape = self.shape.borrow();
            let expected = shape.vertices().len();
            if vertices.len() != expected {
                return Err(GeometryError::TopologyChanged {
                    expected,
                    actual: vertices.len(),
                });
            }
            shape.with_vertices(vertices)
        };

        *self.shape.borrow_mut() = Arc::new(updated);
        self.version.set(self.version.get() + 1);
        log::trace!("geometry {} moved to version {}", self.token, self.version.get());
        Ok(())
    }

    /// Cached local index, if it was built from the current version
    pub fn local_index(&self) -> Option<IndexRef> {
        match &*self.local_index.borrow() {
            Some((version, index)) if *version == self.version.get() => Some(Arc::clone(index)),
            _ => None,
        }
    }

    /// Cached local index of any version together with that version
    pub(crate) fn cached_local_index(&self) -> Option<(u64, IndexRef)> {
        self.local_index.borrow().as_ref().map(|(version, index)| (*version, Arc::clone(index)))
    }

    pub(crate) fn store_local_index(&self, version: u64, index: IndexRef) {
        *self.local_index.borrow_mut() = Some((version, index));
    }
}
