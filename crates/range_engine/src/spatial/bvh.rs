//! Bounding volume hierarchy
//!
//! Nodes live in one flat array with the root first. An interior node stores
//! the index of its left child, and the right child always follows it, so
//! children sit after their parent and a refit is a single reverse sweep.

use crate::foundation::math::Vec3;

use super::{Aabb, Ray};

/// Configuration for hierarchy construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BvhSettings {
    /// Maximum primitives per leaf before subdivision
    pub max_leaf_size: usize,
    /// Maximum subdivision depth
    pub max_depth: u32,
}

impl Default for BvhSettings {
    fn default() -> Self {
        Self {
            max_leaf_size: 4,
            max_depth: 48,
        }
    }
}

/// Single node in the hierarchy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BvhNode {
    /// Bounds of everything below this node
    pub bounds: Aabb,
    /// Left child index for interior nodes, first primitive slot for leaves
    first: u32,
    /// Primitive count; zero marks an interior node
    count: u32,
}

impl BvhNode {
    /// Check if this node is a leaf
    pub fn is_leaf(&self) -> bool {
        self.count > 0
    }
}

/// Hierarchy over a list of primitive bounds
///
/// The hierarchy stores primitive indices only; the primitives themselves stay
/// with the owner, which resolves them in the traversal callback.
#[derive(Debug, Clone, Default)]
pub struct Bvh {
    nodes: Vec<BvhNode>,
    primitives: Vec<u32>,
}

struct BuildItem {
    primitive: u32,
    bounds: Aabb,
    centroid: [f32; 3],
}

impl Bvh {
    /// Build a hierarchy over `bounds`, one entry per primitive
    pub fn build(bounds: &[Aabb], settings: BvhSettings) -> Self {
        let mut bvh = Self::default();
        if bounds.is_empty() {
            return bvh;
        }

        let mut items: Vec<BuildItem> = bounds
            .iter()
            .enumerate()
            .map(|(index, b)| {
                let c = b.center();
                BuildItem {
                    primitive: index as u32,
                    bounds: *b,
                    centroid: [c.x, c.y, c.z],
                }
            })
            .collect();

        bvh.nodes.reserve(2 * items.len());
        bvh.nodes.push(BvhNode {
            bounds: Aabb::empty(),
            first: 0,
            count: 0,
        });
        bvh.subdivide(0, &mut items, 0, 0, settings);
        bvh.primitives = items.iter().map(|item| item.primitive).collect();
        bvh
    }

    fn subdivide(
        &mut self,
        node: usize,
        items: &mut [BuildItem],
        offset: usize,
        depth: u32,
        settings: BvhSettings,
    ) {
        let bounds = items.iter().fold(Aabb::empty(), |acc, item| acc.union(&item.bounds));
        let centroid_bounds = items.iter().fold(Aabb::empty(), |acc, item| {
            acc.grow(&Vec3::from(item.centroid))
        });
        self.nodes[node].bounds = bounds;

        let axis = centroid_bounds.longest_axis();
        let spread = centroid_bounds.max[axis] - centroid_bounds.min[axis];
        let stop = items.len() <= settings.max_leaf_size.max(1)
            || depth >= settings.max_depth
            || spread.is_nan()
            || spread <= 0.0;

        if stop {
            self.nodes[node].first = offset as u32;
            self.nodes[node].count = items.len() as u32;
            return;
        }

        // Median split along the longest centroid axis
        let mid = items.len() / 2;
        items.select_nth_unstable_by(mid, |a, b| a.centroid[axis].total_cmp(&b.centroid[axis]));

        let left = self.nodes.len();
        let placeholder = BvhNode {
            bounds: Aabb::empty(),
            first: 0,
            count: 0,
        };
        self.nodes.push(placeholder);
        self.nodes.push(placeholder);
        self.nodes[node].first = left as u32;
        self.nodes[node].count = 0;

        let (lower, upper) = items.split_at_mut(mid);
        self.subdivide(left, lower, offset, depth + 1, settings);
        self.subdivide(left + 1, upper, offset + mid, depth + 1, settings);
    }

    /// Recompute every node's bounds for moved primitives
    ///
    /// The tree shape is kept, so traversal stays correct but may get slower
    /// as primitives drift away from their original neighbors. `bounds` must
    /// have the length the hierarchy was built with.
    pub fn refit(&mut self, bounds: &[Aabb]) {
        debug_assert_eq!(bounds.len(), self.primitives.len());

        for index in (0..self.nodes.len()).rev() {
            let node = self.nodes[index];
            let refitted = if node.is_leaf() {
                let start = node.first as usize;
                let end = start + node.count as usize;
                self.primitives[start..end]
                    .iter()
                    .fold(Aabb::empty(), |acc, &p| acc.union(&bounds[p as usize]))
            } else {
                let left = node.first as usize;
                self.nodes[left].bounds.union(&self.nodes[left + 1].bounds)
            };
            self.nodes[index].bounds = refitted;
        }
    }

    /// Find the closest hit along `ray`
    ///
    /// `intersect` is called with a primitive index and the current closest
    /// parameter and returns the parameter of a closer hit, if any. The
    /// callback keeps whatever payload it needs. Returns the closest parameter
    /// accepted.
    pub fn closest_hit<F>(&self, ray: &Ray, t_min: f32, t_max: f32, mut intersect: F) -> Option<f32>
    where
        F: FnMut(u32, f32) -> Option<f32>,
    {
        let root = self.nodes.first()?;
        root.bounds.intersect_ray(ray, t_min, t_max)?;

        let mut closest = t_max;
        let mut found = false;
        let mut stack: Vec<u32> = Vec::with_capacity(64);
        stack.push(0);

        while let Some(index) = stack.pop() {
            let node = &self.nodes[index as usize];
            if node.bounds.intersect_ray(ray, t_min, closest).is_none() {
                continue;
            }

            if node.is_leaf() {
                let start = node.first as usize;
                let end = start + node.count as usize;
                for &primitive in &self.primitives[start..end] {
                    if let Some(t) = intersect(primitive, closest) {
                        if t <= closest {
                            closest = t;
                            found = true;
                        }
                    }
                }
                continue;
            }

            // Push the farther child first so the nearer one is visited next
            let left = node.first;
            let right = left + 1;
            let near_left = self.nodes[left as usize].bounds.intersect_ray(ray, t_min, closest);
            let near_right = self.nodes[right as usize].bounds.intersect_ray(ray, t_min, closest);
            match (near_left, near_right) {
                (Some(l), Some(r)) if l <= r => {
                    stack.push(right);
                    stack.push(left);
                }
                (Some(_), Some(_)) => {
                    stack.push(left);
                    stack.push(right);
                }
                (Some(_), None) => stack.push(left),
                (None, Some(_)) => stack.push(right),
                (None, None) => {}
            }
        }

        found.then_some(closest)
    }

    /// Bounds of the whole hierarchy
    pub fn bounds(&self) -> Aabb {
        self.nodes.first().map_or_else(Aabb::empty, |root| root.bounds)
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of indexed primitives
    pub fn primitive_count(&self) -> usize {
        self.primitives.len()
    }

    /// Check if the hierarchy indexes nothing
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Depth of the deepest leaf (a lone root leaf has depth 1)
    pub fn depth(&self) -> u32 {
        fn walk(nodes: &[BvhNode], index: usize) -> u32 {
            let node = &nodes[index];
            if node.is_leaf() {
                1
            } else {
                let left = node.first as usize;
                1 + walk(nodes, left).max(walk(nodes, left + 1))
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }

    /// Iterate the nodes in storage order
    pub fn nodes(&self) -> &[BvhNode] {
        &self.nodes
    }
}
