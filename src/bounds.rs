/// Axis-aligned bounding box in 3D. Planar data uses z = 0 on both corners.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl Aabb {
    pub fn new(min: [f64; 3], max: [f64; 3]) -> Self {
        Self { min, max }
    }

    /// An inverted box that any `grow` call will replace.
    pub fn empty() -> Self {
        Self {
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
        }
    }

    /// Extend the box so it contains `p`.
    pub fn grow(&mut self, p: &[f64; 3]) {
        for k in 0..3 {
            if p[k] < self.min[k] { self.min[k] = p[k]; }
            if p[k] > self.max[k] { self.max[k] = p[k]; }
        }
    }

    /// Index of the axis with the largest extent.
    pub fn longest_axis(&self) -> usize {
        let ex = self.max[0] - self.min[0];
        let ey = self.max[1] - self.min[1];
        let ez = self.max[2] - self.min[2];
        if ex >= ey && ex >= ez {
            0
        } else if ey >= ez {
            1
        } else {
            2
        }
    }

    /// Squared distance from `p` to the closest point of the box, zero inside.
    pub fn dist_sq_to_point(&self, p: &[f64; 3]) -> f64 {
        let mut d2 = 0.0;
        for k in 0..3 {
            let d = (self.min[k] - p[k]).max(0.0).max(p[k] - self.max[k]);
            d2 += d * d;
        }
        d2
    }
}

/// Search sphere used to prune tree nodes.
#[derive(Clone, Copy, Debug)]
pub struct AabbSphere {
    pub center: [f64; 3],
    pub radius: f64,
}

impl AabbSphere {
    pub fn new(center: [f64; 3], radius: f64) -> Self {
        Self { center, radius }
    }
}

/// True when the sphere touches or intersects the box.
#[inline]
pub fn overlap(aabb: &Aabb, sphere: &AabbSphere) -> bool {
    aabb.dist_sq_to_point(&sphere.center) <= sphere.radius * sphere.radius
}
