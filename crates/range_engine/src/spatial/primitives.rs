//! Ray and surface primitives with their intersection tests
//!
//! Rays handed to the primitives may carry a non-unit direction: a world ray
//! mapped into an instance's local frame keeps its world-space parameter `t`,
//! so every test here works in ray parameter units rather than assuming a
//! normalized direction.

use crate::foundation::math::{Mat4, Point3, Vec3};

use super::Aabb;

/// A ray for range queries
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    /// The origin point of the ray
    pub origin: Point3,
    /// The direction of the ray
    pub direction: Vec3,
}

impl Ray {
    /// Creates a new ray with a normalized direction
    pub fn new(origin: Point3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize(),
        }
    }

    /// Creates a ray keeping the direction exactly as given
    pub fn from_parts(origin: Point3, direction: Vec3) -> Self {
        Self { origin, direction }
    }

    /// Get a point along the ray at parameter t
    pub fn point_at(&self, t: f32) -> Point3 {
        self.origin + self.direction * t
    }

    /// The same ray expressed in another frame
    pub fn transformed(&self, matrix: &Mat4) -> Self {
        Self {
            origin: matrix.transform_point(&self.origin),
            direction: matrix.transform_vector(&self.direction),
        }
    }
}

/// Surface intersection in the frame of the primitive that was hit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceHit {
    /// Ray parameter of the hit
    pub t: f32,
    /// Unit surface normal facing the side the ray arrived from
    pub normal: Vec3,
}

/// A triangle of a mesh
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    /// First vertex
    pub v0: Vec3,
    /// Second vertex
    pub v1: Vec3,
    /// Third vertex
    pub v2: Vec3,
}

impl Triangle {
    /// Creates a new triangle
    pub fn new(v0: Vec3, v1: Vec3, v2: Vec3) -> Self {
        Self { v0, v1, v2 }
    }

    /// Calculates the normal of the triangle (right-hand rule)
    pub fn normal(&self) -> Vec3 {
        let edge1 = self.v1 - self.v0;
        let edge2 = self.v2 - self.v0;
        edge1.cross(&edge2).normalize()
    }

    /// Calculates the centroid (center point) of the triangle
    pub fn centroid(&self) -> Vec3 {
        (self.v0 + self.v1 + self.v2) / 3.0
    }

    /// Bounding box of the three vertices
    pub fn bounds(&self) -> Aabb {
        Aabb::new(self.v0, self.v0).grow(&self.v1).grow(&self.v2)
    }

    /// Möller-Trumbore ray-triangle intersection
    ///
    /// Accepts hits with `t_min < t <= t_max`. Both faces are hit.
    pub fn intersect_ray(&self, ray: &Ray, t_min: f32, t_max: f32) -> Option<SurfaceHit> {
        const EPSILON: f32 = 1e-9;

        let edge1 = self.v1 - self.v0;
        let edge2 = self.v2 - self.v0;

        let h = ray.direction.cross(&edge2);
        let a = edge1.dot(&h);

        // Ray parallel to the triangle plane
        if a.abs() < EPSILON {
            return None;
        }

        let f = 1.0 / a;
        let s = ray.origin.coords - self.v0;
        let u = f * s.dot(&h);
        if !(0.0..=1.0).contains(&u) {
            return None;
        }

        let q = s.cross(&edge1);
        let v = f * ray.direction.dot(&q);
        if v < 0.0 || u + v > 1.0 {
            return None;
        }

        let t = f * edge2.dot(&q);
        if t <= t_min || t > t_max {
            return None;
        }

        let mut normal = edge1.cross(&edge2).normalize();
        if normal.dot(&ray.direction) > 0.0 {
            normal = -normal;
        }
        Some(SurfaceHit { t, normal })
    }
}

/// A sphere, used for point sets with a radius
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    /// Center of the sphere
    pub center: Vec3,
    /// Radius of the sphere
    pub radius: f32,
}

impl Sphere {
    /// Creates a new sphere with the given center and radius
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    /// Bounding box of the sphere
    pub fn bounds(&self) -> Aabb {
        Aabb::new(self.center, self.center).inflate(self.radius)
    }

    /// Test ray intersection with this sphere
    ///
    /// Returns the closest root inside `(t_min, t_max]`, so a ray starting
    /// inside the sphere reports the exit point.
    pub fn intersect_ray(&self, ray: &Ray, t_min: f32, t_max: f32) -> Option<SurfaceHit> {
        let oc = ray.origin.coords - self.center;

        // Solve: |origin + t*direction - center|^2 = radius^2
        let a = ray.direction.dot(&ray.direction);
        let half_b = oc.dot(&ray.direction);
        let c = oc.dot(&oc) - self.radius * self.radius;

        let discriminant = half_b * half_b - a * c;
        if discriminant < 0.0 || a == 0.0 {
            return None;
        }

        let sqrt_discriminant = discriminant.sqrt();
        let near = (-half_b - sqrt_discriminant) / a;
        let far = (-half_b + sqrt_discriminant) / a;

        let t = if near > t_min && near <= t_max {
            near
        } else if far > t_min && far <= t_max {
            far
        } else {
            return None;
        };

        let mut normal = (ray.point_at(t).coords - self.center).normalize();
        if normal.dot(&ray.direction) > 0.0 {
            normal = -normal;
        }
        Some(SurfaceHit { t, normal })
    }
}
