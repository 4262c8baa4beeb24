//! Math utilities and types
//!
//! Provides the vector, point and transform types shared by the spatial
//! indices, the scene graph and the range simulator.

use serde::{Deserialize, Serialize};

pub use nalgebra::{Matrix3, Matrix4, Quaternion, Unit, Vector3};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Quaternion type for rotations
pub type Quat = Unit<Quaternion<f32>>;

/// Transform representing position, rotation, and scale
///
/// Applied in scale, rotate, translate order, the same convention used for
/// instance placement and sensor offsets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Position in 3D space
    pub position: Vec3,

    /// Rotation quaternion
    pub rotation: Quat,

    /// Scale factors
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Quat::identity(),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    /// Create a new identity transform
    pub fn identity() -> Self {
        Self::default()
    }

    /// Create a transform with only position
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Create a transform with position and rotation
    pub fn from_position_rotation(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            ..Default::default()
        }
    }

    /// Create a transform with a uniform scale applied before the placement
    pub fn with_uniform_scale(mut self, scale: f32) -> Self {
        self.scale = Vec3::new(scale, scale, scale);
        self
    }

    /// Whether every scale component is usable as a divisor
    pub fn is_invertible(&self) -> bool {
        self.scale.iter().all(|s| s.is_finite() && s.abs() > f32::EPSILON)
            && self.position.iter().all(|p| p.is_finite())
    }

    /// Convert to a transformation matrix
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::new_translation(&self.position)
            * self.rotation.to_homogeneous()
            * Mat4::new_nonuniform_scaling(&self.scale)
    }

    /// Matrix mapping world coordinates back into this transform's local frame
    pub fn inverse_matrix(&self) -> Mat4 {
        let inv_scale = Vec3::new(1.0 / self.scale.x, 1.0 / self.scale.y, 1.0 / self.scale.z);
        Mat4::new_nonuniform_scaling(&inv_scale)
            * self.rotation.inverse().to_homogeneous()
            * Mat4::new_translation(&-self.position)
    }

    /// Apply this transform to a point
    pub fn transform_point(&self, point: &Point3) -> Point3 {
        Point3::from(self.position + self.rotation * point.coords.component_mul(&self.scale))
    }

    /// Apply this transform to a vector (no translation)
    pub fn transform_vector(&self, vector: &Vec3) -> Vec3 {
        self.rotation * vector.component_mul(&self.scale)
    }

    /// Combine this transform with another (`self` applied after `other`)
    pub fn combine(&self, other: &Self) -> Self {
        Self {
            position: self.position + self.rotation * (self.scale.component_mul(&other.position)),
            rotation: self.rotation * other.rotation,
            scale: self.scale.component_mul(&other.scale),
        }
    }
}

/// Math constants
pub mod constants {
    /// Pi constant
    pub const PI: f32 = std::f32::consts::PI;

    /// 2 * Pi
    pub const TAU: f32 = 2.0 * PI;

    /// Degrees to radians conversion factor
    pub const DEG_TO_RAD: f32 = PI / 180.0;
}

/// Math utility functions
pub mod utils {
    use super::{constants, Mat4, Point3, Vec3};

    /// Convert degrees to radians
    pub fn deg_to_rad(degrees: f32) -> f32 {
        degrees * constants::DEG_TO_RAD
    }

    /// Transform a point by a homogeneous matrix
    pub fn mat_transform_point(matrix: &Mat4, point: &Point3) -> Point3 {
        matrix.transform_point(point)
    }

    /// Transform a direction by a homogeneous matrix, ignoring translation
    pub fn mat_transform_vector(matrix: &Mat4, vector: &Vec3) -> Vec3 {
        matrix.transform_vector(vector)
    }

    /// Map a local-space normal to world space given the world-to-local matrix
    ///
    /// Uses the transpose of the inverse so non-uniform scales keep normals
    /// perpendicular to the transformed surface.
    pub fn normal_to_world(world_to_local: &Mat4, normal: &Vec3) -> Vec3 {
        let m = world_to_local.fixed_view::<3, 3>(0, 0);
        let n = m.transpose() * normal;
        let len = n.norm();
        if len > 0.0 {
            n / len
        } else {
            n
        }
    }
}
